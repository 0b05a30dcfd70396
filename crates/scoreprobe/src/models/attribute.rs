use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Whether teams can see an attribute and change its value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Teams cannot read or modify the attribute
    #[default]
    None,
    /// Teams can read the attribute and its value
    View,
    /// Teams can read the attribute and change its value
    Update,
}

/// How an attribute value is rendered in UIs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayKind {
    #[default]
    Text,
    Boolean,
    Number,
    Password,
}

/// One value an attribute has held
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub value: String,
    pub created: DateTime<Utc>,
}

impl AttributeValue {
    pub fn new(value: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self { value: value.into(), created }
    }
}

/// A named, versioned variable templated into a check definition.
///
/// Attributes let organizers and teams change the behavior of a check
/// mid-competition. Every edit appends a value; the newest one is current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// The check this attribute parameterizes
    pub check_id: String,

    /// The team this attribute belongs to
    pub group: String,

    /// Template variable name
    pub key: String,

    #[serde(default)]
    pub permission: Permission,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub display_as: DisplayKind,

    /// Every value the attribute has ever had
    #[serde(default)]
    pub values: Vec<AttributeValue>,
}

impl Attribute {
    pub fn new(check_id: impl Into<String>, group: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            check_id: check_id.into(),
            group: group.into(),
            key: key.into(),
            permission: Permission::default(),
            display_name: String::new(),
            description: String::new(),
            display_as: DisplayKind::default(),
            values: Vec::new(),
        }
    }

    /// Identity of the attribute across the whole store
    pub fn id(&self) -> String {
        format!("{}-{}", self.check_id, self.key)
    }

    pub fn with_value(mut self, value: impl Into<String>, created: DateTime<Utc>) -> Self {
        self.values.push(AttributeValue::new(value, created));
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    /// The value with the newest `created` timestamp.
    ///
    /// When several values share the newest timestamp, the one that comes
    /// first in `values` wins.
    pub fn current(&self) -> Option<&AttributeValue> {
        self.values.iter().fold(None, |newest, candidate| match newest {
            Some(newest) if candidate.created <= newest.created => Some(newest),
            _ => Some(candidate),
        })
    }

    /// Current value string, or an empty string if no value was ever set
    pub fn value(&self) -> &str {
        match self.current() {
            Some(current) => &current.value,
            None => {
                error!(check_id = %self.check_id, key = %self.key, "attribute has no values");
                ""
            }
        }
    }
}
