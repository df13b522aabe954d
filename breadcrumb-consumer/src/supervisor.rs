use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use breadcrumb_common::metrics_consts::{ACK_FAILED, IDLE_SECONDS};
use breadcrumb_common::store::BulkStore;
use breadcrumb_common::writer::FlushOutcome;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ConsumerError;
use crate::pipeline::Pipeline;
use crate::source::{EventSource, SourceError};
use crate::summary::RunSummary;

/// Attempts at the last flush before the store is released.
pub const FINAL_FLUSH_ATTEMPTS: u32 = 3;

/// Consecutive receive errors tolerated before the transport is considered lost.
pub const MAX_CONSECUTIVE_RECV_ERRORS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No activity for longer than the idle timeout.
    IdleTimeout,
    /// An operator asked us to stop.
    Interrupted,
    /// The source will not deliver anything else.
    StreamEnded,
    Fatal,
}

/// Time of the last processed event, shared between the consume loop and the watcher.
pub struct ActivityClock {
    origin: Instant,
    last_activity_ms: AtomicU64,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::SeqCst);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::SeqCst));
        self.origin.elapsed().saturating_sub(last)
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RunReport {
    pub reason: StopReason,
    pub summary: RunSummary,
    /// Set when the run ended on a fatal error.
    pub error: Option<ConsumerError>,
}

/// Drives a `Pipeline` from an `EventSource` until the stream goes idle, an
/// interrupt arrives or a fatal error occurs, then drains it.
pub struct Supervisor {
    idle_timeout: Duration,
    poll_interval: Duration,
    state: watch::Sender<LifecycleState>,
}

impl Supervisor {
    pub fn new(idle_timeout: Duration, poll_interval: Duration) -> Self {
        let (state, _) = watch::channel(LifecycleState::Running);

        Self {
            idle_timeout,
            poll_interval,
            state,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub async fn run<E, S, F>(
        &self,
        source: &E,
        pipeline: &mut Pipeline<S>,
        interrupt: F,
    ) -> RunReport
    where
        E: EventSource,
        S: BulkStore,
        F: Future<Output = ()>,
    {
        let start = Instant::now();
        let activity = ActivityClock::new();
        let token = CancellationToken::new();

        info!(idle_timeout = ?self.idle_timeout, "consuming breadcrumbs");

        let (reason, mut fatal) = {
            let consume = consume(source, pipeline, &activity, &token);
            let watcher = self.watch(&activity, interrupt);
            tokio::pin!(consume, watcher);

            tokio::select! {
                reason = &mut watcher => {
                    // Let the in-flight event finish before draining.
                    token.cancel();
                    match consume.await {
                        Err(error) => (StopReason::Fatal, Some(error)),
                        Ok(()) => (reason, None),
                    }
                }
                result = &mut consume => match result {
                    Err(error) => (StopReason::Fatal, Some(error)),
                    Ok(()) => (StopReason::StreamEnded, None),
                },
            }
        };

        self.transition(LifecycleState::Draining, reason);
        source.close().await;

        if let Err(error) = final_flush(pipeline).await {
            error!("final flush failed, staged rows are lost: {}", error);
            fatal.get_or_insert(error);
        }

        pipeline.close().await;
        self.transition(LifecycleState::Stopped, reason);

        let stats = pipeline.stats();
        let summary = RunSummary {
            counters: pipeline.counters(),
            elapsed: start.elapsed(),
            decode_errors: stats.decode_errors,
            first_sightings: stats.first_sightings,
            rejected_pairs: stats.rejected_pairs,
            findings: stats.findings(),
        };

        RunReport {
            reason: if fatal.is_some() {
                StopReason::Fatal
            } else {
                reason
            },
            summary,
            error: fatal,
        }
    }

    async fn watch<F>(&self, activity: &ActivityClock, interrupt: F) -> StopReason
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.poll_interval);
        tokio::pin!(interrupt);

        loop {
            tokio::select! {
                _ = &mut interrupt => {
                    info!("interrupt received");
                    return StopReason::Interrupted;
                }
                _ = interval.tick() => {
                    let idle = activity.idle_for();
                    metrics::gauge!(IDLE_SECONDS).set(idle.as_secs_f64());

                    if idle > self.idle_timeout {
                        info!(?idle, "no breadcrumbs received within the idle timeout");
                        return StopReason::IdleTimeout;
                    }
                }
            }
        }
    }

    fn transition(&self, state: LifecycleState, reason: StopReason) {
        info!(?state, ?reason, "lifecycle transition");
        self.state.send_replace(state);
    }
}

async fn consume<E, S>(
    source: &E,
    pipeline: &mut Pipeline<S>,
    activity: &ActivityClock,
    token: &CancellationToken,
) -> Result<(), ConsumerError>
where
    E: EventSource,
    S: BulkStore,
{
    let mut failures = 0;

    loop {
        let delivery = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            delivery = source.recv() => delivery,
        };

        let delivery = match delivery {
            Ok(delivery) => {
                failures = 0;
                delivery
            }
            Err(SourceError::Closed) => {
                info!("event source closed");
                return Ok(());
            }
            Err(error) => {
                failures += 1;
                warn!(failures, "failed to receive breadcrumb: {}", error);
                if failures >= MAX_CONSECUTIVE_RECV_ERRORS {
                    return Err(ConsumerError::SourceError { failures, error });
                }
                continue;
            }
        };

        // Not raced against cancellation: the event completes its full pass.
        let outcome = pipeline.handle(delivery.payload.as_deref()).await?;
        if outcome.is_activity() {
            activity.touch();
        }

        if let Err(e) = delivery.ack() {
            warn!("failed to acknowledge breadcrumb: {}", e);
            metrics::counter!(ACK_FAILED).increment(1);
        }
    }
}

async fn final_flush<S: BulkStore>(pipeline: &mut Pipeline<S>) -> Result<(), ConsumerError> {
    for attempt in 1..=FINAL_FLUSH_ATTEMPTS {
        match pipeline.flush().await? {
            FlushOutcome::Committed { trips, breadcrumbs } => {
                info!(trips, breadcrumbs, "flushed remaining rows");
                return Ok(());
            }
            FlushOutcome::Empty => return Ok(()),
            FlushOutcome::Failed { .. } => {
                warn!(attempt, "final flush failed");
            }
        }
    }

    let buffered = pipeline.writer().buffered_breadcrumbs();
    error!(buffered, "giving up on final flush");
    Ok(())
}
