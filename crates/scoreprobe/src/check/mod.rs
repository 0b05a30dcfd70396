//! The check capability.
//!
//! A [`Check`] is one configured probe for one round. It never returns an
//! error: every failure mode is reported through a failing [`CheckResult`].
//!
//! Probe kinds implement [`Probe`] and are wrapped in [`Configured`] by the
//! registry, which keeps the generic config round-trip out of every probe.

pub mod result;

pub use result::{CheckResult, Outcome, TIMEOUT_MESSAGE};

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::fields::FieldSpec;
use crate::models::CheckConfig;

/// Cancellation and deadline shared by every check of a round
#[derive(Debug, Clone)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Instant,
}

impl RunContext {
    pub fn new(token: CancellationToken, deadline: Instant) -> Self {
        Self { token, deadline }
    }

    /// A standalone context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(CancellationToken::new(), Instant::now() + timeout)
    }

    /// Time left before the deadline, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Resolves when the round is cancelled or the deadline passes
    pub async fn cancelled(&self) {
        tokio::select! {
            () = self.token.cancelled() => {}
            () = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    /// Run `future` unless the round is cancelled first.
    ///
    /// Returns `None` when cancellation won; the future is dropped at that
    /// point, which closes whatever sockets it owned.
    pub async fn guard<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            () = self.cancelled() => None,
            output = future => Some(output),
        }
    }
}

/// One configured probe, ready to run.
///
/// Implementations must not share mutable state with other checks and
/// should route every blocking call through [`RunContext::guard`]. The
/// scheduler stops waiting at the round deadline and aborts the task, but a
/// probe that blocks its thread cannot be interrupted and keeps running
/// until it returns by itself.
#[async_trait::async_trait]
pub trait Check: Send + Sync {
    /// The configuration this check was built from
    fn config(&self) -> &CheckConfig;

    /// Replace the configuration this check reports against
    fn set_config(&mut self, config: CheckConfig);

    /// Run the check once
    async fn run(&self, ctx: RunContext) -> CheckResult;
}

/// A probe kind: its typed definition, field table and run logic
#[async_trait::async_trait]
pub trait Probe: DeserializeOwned + Serialize + Send + Sync + 'static {
    /// Kind string checks use to select this probe
    const KIND: &'static str;

    /// Field rules applied to the decoded definition
    const FIELDS: &'static [FieldSpec];

    /// Perform the probe
    async fn probe(&self, ctx: &RunContext) -> Outcome;
}

/// A probe definition paired with the configuration it was built from
#[derive(Debug, Clone)]
pub struct Configured<P> {
    config: CheckConfig,
    definition: P,
}

impl<P: Probe> Configured<P> {
    pub fn new(config: CheckConfig, definition: P) -> Self {
        Self { config, definition }
    }
}

#[async_trait::async_trait]
impl<P: Probe> Check for Configured<P> {
    fn config(&self) -> &CheckConfig {
        &self.config
    }

    fn set_config(&mut self, config: CheckConfig) {
        self.config = config;
    }

    async fn run(&self, ctx: RunContext) -> CheckResult {
        let started = Utc::now();
        let outcome = self.definition.probe(&ctx).await;
        CheckResult::from_outcome(self.config.metadata.clone(), started, outcome)
    }
}
