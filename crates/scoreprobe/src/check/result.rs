use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CheckMetadata;

/// Message carried by results synthesized when the round deadline fires
pub const TIMEOUT_MESSAGE: &str = "check timed out";

/// What a probe reports about one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub passed: bool,
    pub message: String,
    pub details: BTreeMap<String, String>,
}

impl Outcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self { passed: true, message: message.into(), details: BTreeMap::new() }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { passed: false, message: message.into(), details: BTreeMap::new() }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Result of one check in one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Metadata of the check that produced this result
    pub metadata: CheckMetadata,

    /// When the check started running
    pub timestamp: DateTime<Utc>,

    pub passed: bool,

    /// Why the check passed or failed
    pub message: String,

    /// Extra key/value context for team and admin views
    pub details: BTreeMap<String, String>,
}

impl CheckResult {
    /// Stamp a probe outcome with the check's metadata
    pub fn from_outcome(metadata: CheckMetadata, timestamp: DateTime<Utc>, outcome: Outcome) -> Self {
        Self {
            metadata,
            timestamp,
            passed: outcome.passed,
            message: outcome.message,
            details: outcome.details,
        }
    }

    /// A failing result with the given message
    pub fn failure(metadata: CheckMetadata, message: impl Into<String>) -> Self {
        Self::from_outcome(metadata, Utc::now(), Outcome::fail(message))
    }

    /// The canned result for a check that did not finish before the deadline
    pub fn timed_out(metadata: CheckMetadata) -> Self {
        Self::failure(metadata, TIMEOUT_MESSAGE)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn is_timeout(&self) -> bool {
        !self.passed && self.message == TIMEOUT_MESSAGE
    }
}
