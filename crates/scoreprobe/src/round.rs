//! Round scheduler.
//!
//! Runs every check of a snapshot concurrently under one deadline and
//! emits exactly one result per configuration, in completion order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::check::{Check, CheckResult, RunContext};
use crate::models::{CheckMetadata, Snapshot};
use crate::registry::Registry;
use crate::{DEFAULT_ROUND_CEILING, DEFAULT_STRAGGLER_LOG_INTERVAL};

/// Timing knobs for a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOptions {
    /// Hard deadline for every check, measured from the start of the round
    pub ceiling: Duration,

    /// How often outstanding check ids are logged
    pub straggler_log_interval: Duration,
}

impl Default for RoundOptions {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_ROUND_CEILING,
            straggler_log_interval: DEFAULT_STRAGGLER_LOG_INTERVAL,
        }
    }
}

/// Counters for one finished round.
///
/// `timed_out` and `invalid` are subsets of `failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundSummary {
    /// Number of configurations in the snapshot
    pub expected: usize,

    /// Results handed to the output channel
    pub emitted: usize,

    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,

    /// Configurations that could not be unpacked
    pub invalid: usize,

    pub elapsed: Duration,
}

impl RoundSummary {
    fn record(&mut self, result: &CheckResult) {
        if result.passed {
            self.passed += 1;
        } else {
            self.failed += 1;
            if result.is_timeout() {
                self.timed_out += 1;
            }
        }
    }
}

/// Runs rounds against a shared registry
#[derive(Debug, Clone)]
pub struct RoundRunner {
    registry: Arc<Registry>,
    options: RoundOptions,
}

impl RoundRunner {
    pub fn new(registry: Arc<Registry>, options: RoundOptions) -> Self {
        Self { registry, options }
    }

    /// Run one round over `snapshot`.
    ///
    /// Results are sent to `results` as they complete. `started` receives
    /// the number of checks once every one of them has been launched. The
    /// returned future resolves after the last result has been forwarded,
    /// which is never later than the ceiling plus forwarding time.
    pub async fn run(
        &self,
        snapshot: Snapshot,
        results: mpsc::Sender<CheckResult>,
        started: oneshot::Sender<usize>,
    ) -> RoundSummary {
        let begun = Instant::now();
        let expected = snapshot.len();
        let mut summary = RoundSummary { expected, ..RoundSummary::default() };

        let token = CancellationToken::new();
        let _cancel_on_return = token.clone().drop_guard();
        let ctx = RunContext::new(token.child_token(), begun + self.options.ceiling);

        let (queue_tx, mut queue_rx) = mpsc::channel::<(usize, CheckResult)>(expected.max(1));
        let mut outstanding: HashMap<usize, String> = HashMap::with_capacity(expected);

        for (slot, config) in snapshot.iter().enumerate() {
            outstanding.insert(slot, config.metadata.id.clone());

            match self.registry.unpack(config) {
                Ok(check) => launch(slot, check, ctx.clone(), queue_tx.clone()),
                Err(e) => {
                    summary.invalid += 1;
                    warn!(check_id = %config.metadata.id, "invalid check definition: {e}");
                    let result = CheckResult::failure(
                        config.metadata.clone(),
                        format!("encountered an error when unpacking check definition: {e}"),
                    )
                    .with_detail("error_message", e.to_string());
                    if let Err(e) = queue_tx.try_send((slot, result)) {
                        warn!("failed to queue unpack failure: {e}");
                        outstanding.remove(&slot);
                    }
                }
            }
        }
        drop(queue_tx);

        if started.send(expected).is_err() {
            debug!("round start listener went away");
        }
        info!(checks = expected, "launched round");

        let period = self.options.straggler_log_interval;
        let mut stragglers = interval_at(begun + period, period);
        stragglers.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !outstanding.is_empty() {
            tokio::select! {
                received = queue_rx.recv() => {
                    let Some((slot, result)) = received else {
                        break;
                    };
                    outstanding.remove(&slot);
                    summary.record(&result);
                    match results.send(result).await {
                        Ok(()) => summary.emitted += 1,
                        Err(e) => warn!(check_id = %e.0.metadata.id, "result receiver closed, dropping result"),
                    }
                }
                _ = stragglers.tick() => {
                    let mut waiting: Vec<&str> = outstanding.values().map(String::as_str).collect();
                    waiting.sort_unstable();
                    info!(remaining = waiting.len(), "waiting on checks: {}", waiting.join(", "));
                }
            }
        }

        summary.elapsed = begun.elapsed();
        info!(
            expected = summary.expected,
            passed = summary.passed,
            failed = summary.failed,
            timed_out = summary.timed_out,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "round finished"
        );
        summary
    }
}

/// Spawn `check` and race it against the round deadline
fn launch(
    slot: usize,
    check: Box<dyn Check>,
    ctx: RunContext,
    queue: mpsc::Sender<(usize, CheckResult)>,
) {
    let metadata: CheckMetadata = check.config().metadata.clone();

    tokio::spawn(async move {
        let mut probe = tokio::spawn({
            let ctx = ctx.clone();
            async move { check.run(ctx).await }
        });

        let result = tokio::select! {
            biased;
            joined = &mut probe => match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(check_id = %metadata.id, "check task failed: {e}");
                    CheckResult::failure(metadata, format!("check aborted: {e}"))
                }
            },
            () = ctx.cancelled() => {
                probe.abort();
                debug!(check_id = %metadata.id, "check missed the round deadline");
                CheckResult::timed_out(metadata)
            }
        };

        if queue.send((slot, result)).await.is_err() {
            debug!("round finished before result could be queued");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = RoundOptions::default();
        assert_eq!(options.ceiling, Duration::from_secs(25));
        assert_eq!(options.straggler_log_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_summary_counts_timeouts_as_failures() {
        let metadata = CheckMetadata::new("ssh-01", "team01", "ssh");
        let mut summary = RoundSummary::default();
        summary.record(&CheckResult::timed_out(metadata.clone()));
        summary.record(&CheckResult::failure(metadata, "refused"));

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.passed, 0);
    }

    #[tokio::test]
    async fn test_empty_snapshot_returns_immediately() {
        let runner = RoundRunner::new(Arc::new(Registry::with_builtin()), RoundOptions::default());
        let (tx, mut rx) = mpsc::channel(1);
        let (started_tx, started_rx) = oneshot::channel();

        let summary = runner.run(Snapshot::from(Vec::new()), tx, started_tx).await;

        assert_eq!(summary.expected, 0);
        assert_eq!(started_rx.await.unwrap(), 0);
        assert!(rx.recv().await.is_none());
    }
}
