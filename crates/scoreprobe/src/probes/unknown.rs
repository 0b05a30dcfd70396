use crate::check::{Check, CheckResult, RunContext};
use crate::models::CheckConfig;

/// Stand-in for a check whose kind is not registered. Always fails.
#[derive(Debug, Clone)]
pub struct UnknownKind {
    config: CheckConfig,
}

impl UnknownKind {
    pub fn new(config: CheckConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Check for UnknownKind {
    fn config(&self) -> &CheckConfig {
        &self.config
    }

    fn set_config(&mut self, config: CheckConfig) {
        self.config = config;
    }

    async fn run(&self, _ctx: RunContext) -> CheckResult {
        CheckResult::failure(
            self.config.metadata.clone(),
            format!("unknown check kind `{}`", self.config.metadata.kind),
        )
    }
}
