/// Orchestrator module - drives rounds and definition refreshes
///
/// Two tasks cooperate:
/// - the round task ticks every round interval and runs a round over the
///   newest snapshot it has
/// - the refresh task reloads check definitions and hands fresh snapshots
///   to the round task over a single-slot queue
///
/// Results from every round flow through one queue into the publisher.


use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use scoreprobe::{CheckResult, Registry, RoundOptions, RoundRunner, RoundSummary, Snapshot};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::sink::{self, ResultSink};
use crate::source::{CheckSource, Filesystem};

/// Results buffered between the rounds and the publisher
const RESULT_QUEUE_CAPACITY: usize = 256;

/// When rounds and refreshes happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    pub refresh: Duration,
    pub startup_retry: Duration,
    /// Stop after this many rounds
    pub rounds: Option<u64>,
}

/// What a finished run accomplished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub rounds: u64,
    pub published: u64,
}

/// Main orchestrator for the agent
pub struct Orchestrator {
    source: Arc<dyn CheckSource>,
    sink: Arc<dyn ResultSink>,
    runner: RoundRunner,
    schedule: Schedule,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn CheckSource>,
        sink: Arc<dyn ResultSink>,
        runner: RoundRunner,
        schedule: Schedule,
    ) -> Self {
        Self { source, sink, runner, schedule }
    }

    /// Build an orchestrator with the filesystem source and configured sink
    pub fn from_config(config: &Config, rounds: Option<u64>) -> Result<Self> {
        let source = Arc::new(Filesystem::new(config.source.path.clone(), config.teams.clone()));
        let sink = sink::build(&config.sink).context("failed to set up result sink")?;
        let options = RoundOptions {
            ceiling: config.round.ceiling(),
            straggler_log_interval: config.round.straggler_log(),
        };
        let runner = RoundRunner::new(Arc::new(Registry::with_builtin()), options);
        let schedule = Schedule {
            interval: config.round.interval(),
            refresh: config.round.refresh(),
            startup_retry: config.round.startup_retry(),
            rounds,
        };

        Ok(Self::new(source, sink, runner, schedule))
    }

    /// Run until `shutdown` is cancelled or the round limit is reached
    pub async fn run(self, shutdown: CancellationToken) -> Result<RunReport> {
        info!("Starting scoreprobe orchestrator...");

        let Some(initial) = self.bootstrap(&shutdown).await else {
            info!("shutdown requested before check definitions were loaded");
            return Ok(RunReport::default());
        };

        let (snapshot_tx, snapshot_rx) = mpsc::channel::<Snapshot>(1);
        let (results_tx, results_rx) = mpsc::channel::<CheckResult>(RESULT_QUEUE_CAPACITY);

        let publisher = tokio::spawn(sink::publish(self.sink.clone(), results_rx));

        let refresh_stop = shutdown.child_token();
        let refresher = tokio::spawn(refresh_loop(
            self.source.clone(),
            self.schedule.refresh,
            snapshot_tx,
            refresh_stop.clone(),
        ));

        let rounds = self.round_loop(initial, snapshot_rx, results_tx, &shutdown).await;

        refresh_stop.cancel();
        if let Err(e) = refresher.await {
            error!("refresh task failed: {e}");
        }

        let published = publisher.await.context("result publisher failed")?;
        info!(rounds, published, "orchestrator stopped");

        Ok(RunReport { rounds, published })
    }

    /// Load definitions, retrying until it works or shutdown is requested
    async fn bootstrap(&self, shutdown: &CancellationToken) -> Option<Snapshot> {
        loop {
            match self.source.load_all().await {
                Ok(configs) => {
                    info!(checks = configs.len(), "loaded check definitions");
                    return Some(configs.into());
                }
                Err(e) => warn!(
                    retry_in = ?self.schedule.startup_retry,
                    "failed to load check definitions: {e:#}"
                ),
            }

            tokio::select! {
                () = shutdown.cancelled() => return None,
                () = sleep(self.schedule.startup_retry) => {}
            }
        }
    }

    async fn round_loop(
        &self,
        mut snapshot: Snapshot,
        mut snapshots: mpsc::Receiver<Snapshot>,
        results: mpsc::Sender<CheckResult>,
        shutdown: &CancellationToken,
    ) -> u64 {
        let mut ticker = interval(self.schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: JoinSet<RoundSummary> = JoinSet::new();
        let mut rounds = 0;

        loop {
            if self.schedule.rounds.is_some_and(|limit| rounds >= limit) {
                info!(rounds, "round limit reached");
                break;
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("shutdown requested, no further rounds will start");
                    break;
                }
                Some(fresh) = snapshots.recv() => {
                    debug!(checks = fresh.len(), "received refreshed check definitions");
                    snapshot = fresh;
                }
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => log_round(done),
                _ = ticker.tick() => {
                    while let Ok(fresh) = snapshots.try_recv() {
                        snapshot = fresh;
                    }

                    rounds += 1;
                    let (started_tx, started_rx) = oneshot::channel();
                    let runner = self.runner.clone();
                    let round = snapshot.clone();
                    let results = results.clone();
                    in_flight.spawn(async move { runner.run(round, results, started_tx).await });

                    match started_rx.await {
                        Ok(checks) => info!(round = rounds, checks, "round started"),
                        Err(_) => warn!(round = rounds, "round ended before all checks started"),
                    }
                }
            }
        }

        let waiting_since = Instant::now();
        while let Some(done) = in_flight.join_next().await {
            log_round(done);
        }
        debug!(waited = ?waiting_since.elapsed(), "in-flight rounds finished");

        rounds
    }
}

fn log_round(done: Result<RoundSummary, JoinError>) {
    match done {
        Ok(summary) => info!(
            checks = summary.expected,
            passed = summary.passed,
            failed = summary.failed,
            timed_out = summary.timed_out,
            "round complete"
        ),
        Err(e) => error!("round task failed: {e}"),
    }
}

/// Periodically reload definitions and offer them to the round task
async fn refresh_loop(
    source: Arc<dyn CheckSource>,
    period: Duration,
    snapshots: mpsc::Sender<Snapshot>,
    stop: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                let configs = match source.load_all().await {
                    Ok(configs) => configs,
                    Err(e) => {
                        warn!("failed to refresh check definitions, keeping previous set: {e:#}");
                        continue;
                    }
                };

                debug!(checks = configs.len(), "refreshed check definitions");
                tokio::select! {
                    () = stop.cancelled() => break,
                    sent = snapshots.send(configs.into()) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!("refresh task stopped");
}
