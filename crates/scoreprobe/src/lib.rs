//! scoreprobe - check execution engine for scored service health rounds
//!
//! A round takes an immutable snapshot of check configurations, renders each
//! definition against its attributes, validates it against the probe kind's
//! field table and runs every resulting probe concurrently under one shared
//! deadline. Exactly one result is emitted per configuration; results are
//! then projected into the generic, team and admin views.

pub mod check;
pub mod event;
pub mod fields;
pub mod models;
pub mod probes;
pub mod registry;
pub mod round;
pub mod template;

// Re-export main types
pub use check::{Check, CheckResult, Configured, Outcome, Probe, RunContext};
pub use event::{Audience, Projection};
pub use fields::{FieldSpec, Literal, Rule, ValidationError};
pub use models::{Attribute, AttributeValue, CheckConfig, CheckMetadata, Snapshot};
pub use registry::{Registry, UnpackError};
pub use round::{RoundOptions, RoundRunner, RoundSummary};
pub use template::TemplateError;

use std::time::Duration;

/// Hard ceiling for a single round when none is configured
pub const DEFAULT_ROUND_CEILING: Duration = Duration::from_secs(25);

/// How often a round logs the checks that are still outstanding
pub const DEFAULT_STRAGGLER_LOG_INTERVAL: Duration = Duration::from_secs(30);
