//! Built-in probe kinds.
//!
//! Protocol probes beyond these live outside the engine and register
//! themselves with [`crate::Registry::register`].

pub mod http;
pub mod noop;
pub mod unknown;

pub use http::{Http, HttpRequest};
pub use noop::Noop;
pub use unknown::UnknownKind;

use std::fmt::Display;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

/// Accept either the native JSON type or its string form.
///
/// Templated values are often quoted, so `"Port": "8080"` and `"Port": 8080`
/// must decode to the same thing. An empty string decodes to the default.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr + Default,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr<T> {
        Native(T),
        Text(String),
    }

    match Repr::<T>::deserialize(deserializer)? {
        Repr::Native(value) => Ok(value),
        Repr::Text(text) if text.trim().is_empty() => Ok(T::default()),
        Repr::Text(text) => text.trim().parse().map_err(D::Error::custom),
    }
}
