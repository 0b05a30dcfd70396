//! Kind registry: maps a kind string to the probe that implements it.
//!
//! The registry is built once at startup and shared read-only between
//! rounds; it carries no per-round state.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::check::{Check, Configured, Probe};
use crate::fields::{self, FieldSpec, ValidationError};
use crate::models::{CheckConfig, CheckMetadata};
use crate::probes::{Http, Noop, UnknownKind};
use crate::template;

/// Why a check definition could not be turned into a runnable check
#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("definition is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("definition for kind `{0}` is not a JSON object")]
    NotAnObject(&'static str),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

type Constructor = fn(CheckConfig, Value) -> Result<Box<dyn Check>, UnpackError>;

#[derive(Clone, Copy)]
struct Entry {
    construct: Constructor,
    fields: &'static [FieldSpec],
}

/// Registered probe kinds
#[derive(Clone, Default)]
pub struct Registry {
    entries: BTreeMap<&'static str, Entry>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("kinds", &self.kinds()).finish()
    }
}

impl Registry {
    /// A registry with no kinds
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with the built-in `noop` and `http` kinds
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register::<Noop>();
        registry.register::<Http>();
        registry
    }

    /// Register `P` under [`Probe::KIND`], replacing any earlier registration
    pub fn register<P: Probe>(&mut self) -> &mut Self {
        let entry = Entry { construct: construct::<P>, fields: P::FIELDS };
        if self.entries.insert(P::KIND, entry).is_some() {
            warn!(kind = P::KIND, "check kind registered twice, keeping the latest");
        }
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    /// Registered kind strings in sorted order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    /// Field table of a registered kind
    pub fn fields(&self, kind: &str) -> Option<&'static [FieldSpec]> {
        self.entries.get(kind).map(|entry| entry.fields)
    }

    /// Build a runnable check from a configuration.
    ///
    /// The definition is rendered against the configuration's attributes,
    /// decoded, defaulted and validated. An unregistered kind is not an
    /// error: it yields a check that always fails, so the round still emits
    /// a result for it.
    pub fn unpack(&self, config: &CheckConfig) -> Result<Box<dyn Check>, UnpackError> {
        let vars = config.template_vars();
        let rendered = template::render_or_original(&config.definition, &vars, &config.metadata.id);

        let Some(entry) = self.entries.get(config.metadata.kind.as_str()) else {
            warn!(
                check_id = %config.metadata.id,
                kind = %config.metadata.kind,
                "no probe registered for check kind"
            );
            return Ok(Box::new(UnknownKind::new(config.clone())));
        };

        let value: Value = serde_json::from_str(&rendered)?;
        debug!(check_id = %config.metadata.id, "unpacked check definition");
        (entry.construct)(config.clone(), value)
    }
}

fn construct<P: Probe>(config: CheckConfig, value: Value) -> Result<Box<dyn Check>, UnpackError> {
    let definition = decode::<P>(&config.metadata, value)?;
    Ok(Box::new(Configured::new(config, definition)))
}

/// Decode `value` as `P`, then default and validate the decoded fields.
///
/// Zero values are judged after the first decode, so `"0"` or a blank
/// string in a numeric field counts as unset.
pub(crate) fn decode<P: Probe>(metadata: &CheckMetadata, value: Value) -> Result<P, UnpackError> {
    if !value.is_object() {
        return Err(UnpackError::NotAnObject(P::KIND));
    }

    let decoded: P = serde_json::from_value(value)?;
    let Value::Object(mut object) = serde_json::to_value(&decoded)? else {
        return Err(UnpackError::NotAnObject(P::KIND));
    };

    fields::apply(&mut object, P::FIELDS, metadata)?;
    Ok(serde_json::from_value(Value::Object(object))?)
}
