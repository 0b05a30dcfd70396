use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::attribute::Attribute;
use super::metadata::CheckMetadata;

/// Template key reserved for probes that chain sub-requests
pub const SAVED_VALUE_KEY: &str = "SavedValue";

/// Immutable set of check configurations used by one round
pub type Snapshot = Arc<[CheckConfig]>;

/// Everything needed to build one probe instance for one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfig {
    pub metadata: CheckMetadata,

    /// Untemplated check definition (a JSON object once rendered)
    pub definition: String,

    /// Attributes referenced by the definition, unique by key
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl CheckConfig {
    pub fn new(metadata: CheckMetadata, definition: impl Into<String>) -> Self {
        Self { metadata, definition: definition.into(), attributes: Vec::new() }
    }

    /// Add an attribute, replacing any existing attribute with the same key
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.retain(|existing| existing.key != attribute.key);
        self.attributes.push(attribute);
        self
    }

    /// Current value of every attribute, keyed by template variable name
    pub fn merged_attributes(&self) -> BTreeMap<String, String> {
        self.attributes
            .iter()
            .map(|attribute| (attribute.key.clone(), attribute.value().to_string()))
            .collect()
    }

    /// Variables available while rendering the definition.
    ///
    /// `SavedValue` renders back to its own placeholder so that probes can
    /// substitute it later, unless an attribute claims the key.
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        let mut vars = self.merged_attributes();
        vars.entry(SAVED_VALUE_KEY.to_string())
            .or_insert_with(|| format!("{{{{.{SAVED_VALUE_KEY}}}}}"));
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_merged_attributes_use_current_values() {
        let config = CheckConfig::new(CheckMetadata::new("web-team01", "team01", "http"), "{}")
            .with_attribute(
                Attribute::new("web-team01", "team01", "Host")
                    .with_value("old", Utc.timestamp_opt(1, 0).unwrap())
                    .with_value("new", Utc.timestamp_opt(2, 0).unwrap()),
            );

        let merged = config.merged_attributes();
        assert_eq!(merged.get("Host").map(String::as_str), Some("new"));
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_template_vars_reserve_saved_value_placeholder() {
        let config = CheckConfig::new(CheckMetadata::new("web-team01", "team01", "http"), "{}");
        let vars = config.template_vars();
        assert_eq!(vars.get(SAVED_VALUE_KEY).map(String::as_str), Some("{{.SavedValue}}"));
    }

    #[test]
    fn test_attribute_can_claim_saved_value() {
        let config = CheckConfig::new(CheckMetadata::new("web-team01", "team01", "http"), "{}")
            .with_attribute(
                Attribute::new("web-team01", "team01", SAVED_VALUE_KEY)
                    .with_value("fixed", Utc.timestamp_opt(1, 0).unwrap()),
            );
        assert_eq!(config.template_vars().get(SAVED_VALUE_KEY).map(String::as_str), Some("fixed"));
    }

    #[test]
    fn test_with_attribute_replaces_same_key() {
        let now = Utc.timestamp_opt(1, 0).unwrap();
        let config = CheckConfig::new(CheckMetadata::new("c", "g", "noop"), "{}")
            .with_attribute(Attribute::new("c", "g", "Foo").with_value("a", now))
            .with_attribute(Attribute::new("c", "g", "Foo").with_value("b", now));
        assert_eq!(config.attributes.len(), 1);
        assert_eq!(config.merged_attributes()["Foo"], "b");
    }
}
