use serde::{Deserialize, Serialize};

use crate::check::{Outcome, Probe, RunContext};
use crate::fields::FieldSpec;

/// A probe that always passes and echoes its two fields.
///
/// Useful for exercising attribute templating end to end: `Dynamic` usually
/// references an attribute while `Static` holds a literal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Noop {
    #[serde(rename = "Dynamic")]
    pub dynamic: String,

    #[serde(rename = "Static")]
    pub fixed: String,
}

#[async_trait::async_trait]
impl Probe for Noop {
    const KIND: &'static str = "noop";
    const FIELDS: &'static [FieldSpec] =
        &[FieldSpec::required("Dynamic"), FieldSpec::required("Static")];

    async fn probe(&self, _ctx: &RunContext) -> Outcome {
        Outcome::pass(format!("{}; {}", self.dynamic, self.fixed))
            .with_detail("Dynamic", self.dynamic.clone())
            .with_detail("Static", self.fixed.clone())
    }
}
