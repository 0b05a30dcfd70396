use serde::{Deserialize, Serialize};

/// Configuration fields common to every check kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckMetadata {
    /// Globally unique identifier for the check
    #[serde(rename = "check_id")]
    pub id: String,

    /// The team this check belongs to
    pub group: String,

    /// Human-readable name displayed in UIs
    pub display_name: String,

    /// Explanation of what the check does
    pub description: String,

    /// Which probe implementation runs the check
    pub kind: String,

    /// Points awarded to the group for a passing check
    pub points: u64,
}

impl CheckMetadata {
    /// Create metadata with the identifying fields set and the rest empty
    pub fn new(id: impl Into<String>, group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_points(mut self, points: u64) -> Self {
        self.points = points;
        self
    }
}
