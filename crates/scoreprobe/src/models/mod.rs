//! Configuration data model.
//!
//! Check configurations are loaded fresh from the definition source for every
//! round and handed to the round scheduler as an immutable [`Snapshot`].

pub mod attribute;
pub mod config;
pub mod metadata;

pub use attribute::{Attribute, AttributeValue, DisplayKind, Permission};
pub use config::{CheckConfig, SAVED_VALUE_KEY, Snapshot};
pub use metadata::CheckMetadata;
