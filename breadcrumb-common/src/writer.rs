use std::collections::HashSet;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::metrics_consts::{
    FLUSH_ATTEMPT, FLUSH_TIME, ROWS_DROPPED, ROWS_STAGED, ROWS_WRITTEN, STORE_RECONNECT,
    TRIPS_DEDUPLICATED,
};
use crate::retry::ReconnectPolicy;
use crate::rows::{BreadcrumbRow, NullRowPolicy, TripRow};
use crate::store::{BulkStore, StoreError};

pub const DEFAULT_FLUSH_THRESHOLD: usize = 500;

// upper bound of the random delay added to each reconnect backoff
const RECONNECT_JITTER_MS: u64 = 50;

#[derive(Error, Debug)]
pub enum FlushError {
    #[error("store connection could not be re-established after {attempts} attempts: {error}")]
    ReconnectExhausted { attempts: u32, error: StoreError },
}

#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    /// Breadcrumb rows staged before an automatic flush.
    pub flush_threshold: usize,
    pub null_rows: NullRowPolicy,
    pub reconnect: ReconnectPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            null_rows: NullRowPolicy::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Result of one flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Both buffers were written and cleared.
    Committed { trips: u64, breadcrumbs: u64 },
    /// Nothing was staged.
    Empty,
    /// The load was rolled back and the buffers kept for the next flush.
    Failed { reconnected: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendReport {
    pub trip_staged: bool,
    pub breadcrumb_staged: bool,
    /// Set when this append crossed the flush threshold.
    pub flush: Option<FlushOutcome>,
}

/// Stages trip and breadcrumb rows and bulk loads them into a `BulkStore`.
///
/// The writer is the only owner of the store connection. A failed flush never
/// clears the buffers, and a dropped connection is re-established before
/// `flush` returns.
pub struct BatchWriter<S> {
    store: S,
    config: WriterConfig,
    trip_buffer: Vec<TripRow>,
    breadcrumb_buffer: Vec<BreadcrumbRow>,
    staged_trip_ids: HashSet<String>,
    // trip ids known to be stored, refreshed on every flush cycle
    durable_trip_ids: HashSet<String>,
}

impl<S: BulkStore> BatchWriter<S> {
    pub fn new(store: S, config: WriterConfig) -> Self {
        Self {
            store,
            config,
            trip_buffer: Vec::new(),
            breadcrumb_buffer: Vec::with_capacity(config.flush_threshold),
            staged_trip_ids: HashSet::new(),
            durable_trip_ids: HashSet::new(),
        }
    }

    /// Stage one breadcrumb and, when derived, its trip row.
    /// Flushes once the breadcrumb buffer reaches the configured threshold.
    pub async fn append(
        &mut self,
        trip: Option<TripRow>,
        breadcrumb: BreadcrumbRow,
    ) -> Result<AppendReport, FlushError> {
        let mut report = AppendReport::default();

        if let Some(trip) = trip {
            if self.durable_trip_ids.contains(&trip.trip_id)
                || self.staged_trip_ids.contains(&trip.trip_id)
            {
                metrics::counter!(TRIPS_DEDUPLICATED, &[("stage", "append")]).increment(1);
            } else {
                self.staged_trip_ids.insert(trip.trip_id.clone());
                self.trip_buffer.push(trip);
                metrics::counter!(ROWS_STAGED, &[("table", "trip")]).increment(1);
                report.trip_staged = true;
            }
        }

        if breadcrumb.has_nulls() && self.config.null_rows == NullRowPolicy::Drop {
            debug!("dropping breadcrumb row with null fields: {:?}", breadcrumb);
            metrics::counter!(ROWS_DROPPED).increment(1);
        } else {
            self.breadcrumb_buffer.push(breadcrumb);
            metrics::counter!(ROWS_STAGED, &[("table", "breadcrumb")]).increment(1);
            report.breadcrumb_staged = true;
        }

        if self.breadcrumb_buffer.len() >= self.config.flush_threshold {
            report.flush = Some(self.flush().await?);
        }

        Ok(report)
    }

    /// Write both buffers in one transaction and clear them on commit.
    ///
    /// Store failures are logged and reported as `FlushOutcome::Failed` with the
    /// buffers left intact. Only a connection that cannot be re-established is
    /// an error.
    pub async fn flush(&mut self) -> Result<FlushOutcome, FlushError> {
        if self.trip_buffer.is_empty() && self.breadcrumb_buffer.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let start = Instant::now();
        let result = self.try_flush().await;
        metrics::histogram!(FLUSH_TIME).record(start.elapsed().as_millis() as f64);

        match result {
            Ok((trips, breadcrumbs)) => {
                metrics::counter!(FLUSH_ATTEMPT, &[("result", "success")]).increment(1);
                metrics::counter!(ROWS_WRITTEN, &[("table", "trip")]).increment(trips);
                metrics::counter!(ROWS_WRITTEN, &[("table", "breadcrumb")]).increment(breadcrumbs);
                debug!(trips, breadcrumbs, "flushed staged rows");

                Ok(FlushOutcome::Committed { trips, breadcrumbs })
            }
            Err(error) => {
                metrics::counter!(FLUSH_ATTEMPT, &[("result", "failed")]).increment(1);
                warn!(
                    trips = self.trip_buffer.len(),
                    breadcrumbs = self.breadcrumb_buffer.len(),
                    "flush failed, keeping staged rows: {}",
                    error
                );

                if !error.is_connection() {
                    return Ok(FlushOutcome::Failed { reconnected: false });
                }

                self.reconnect().await?;
                Ok(FlushOutcome::Failed { reconnected: true })
            }
        }
    }

    async fn try_flush(&mut self) -> Result<(u64, u64), StoreError> {
        self.durable_trip_ids = self.store.existing_trip_ids().await?;

        // Trips may have been stored by someone else since they were staged.
        let trips: Vec<TripRow> = self
            .trip_buffer
            .iter()
            .filter(|trip| !self.durable_trip_ids.contains(&trip.trip_id))
            .cloned()
            .collect();
        let skipped = self.trip_buffer.len() - trips.len();
        if skipped > 0 {
            metrics::counter!(TRIPS_DEDUPLICATED, &[("stage", "flush")]).increment(skipped as u64);
        }

        let report = self.store.bulk_load(&trips, &self.breadcrumb_buffer).await?;

        self.durable_trip_ids
            .extend(trips.into_iter().map(|trip| trip.trip_id));
        self.trip_buffer.clear();
        self.breadcrumb_buffer.clear();
        self.staged_trip_ids.clear();

        Ok((report.trips, report.breadcrumbs))
    }

    async fn reconnect(&mut self) -> Result<(), FlushError> {
        let policy = self.config.reconnect;
        let mut attempt = 0;

        loop {
            match self.store.reconnect().await {
                Ok(()) => {
                    metrics::counter!(STORE_RECONNECT, &[("result", "success")]).increment(1);
                    info!(attempt, "re-established store connection");
                    return Ok(());
                }
                Err(error) => {
                    attempt += 1;
                    if attempt >= policy.max_attempts {
                        metrics::counter!(STORE_RECONNECT, &[("result", "exhausted")]).increment(1);
                        error!(attempts = attempt, "giving up on store connection: {}", error);
                        return Err(FlushError::ReconnectExhausted {
                            attempts: attempt,
                            error,
                        });
                    }

                    metrics::counter!(STORE_RECONNECT, &[("result", "retry")]).increment(1);
                    let jitter = rand::random::<u64>() % RECONNECT_JITTER_MS;
                    let delay = policy.time_until_next_attempt(attempt - 1)
                        + Duration::from_millis(jitter);
                    warn!(attempt, ?delay, "store reconnect failed: {}", error);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Release the store connection. Staged rows are not flushed.
    pub async fn close(&mut self) {
        self.store.close().await;
    }

    pub fn buffered_trips(&self) -> usize {
        self.trip_buffer.len()
    }

    pub fn buffered_breadcrumbs(&self) -> usize {
        self.breadcrumb_buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trip_buffer.is_empty() && self.breadcrumb_buffer.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
