use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Postgres, Transaction};
use tracing::{debug, warn};

use crate::rows::{BreadcrumbRow, TripRow, TIMESTAMP_FORMAT};
use crate::store::{BulkStore, LoadReport, StoreError};

const COPY_TRIPS: &str = "COPY trip (trip_id, vehicle_id) FROM STDIN WITH (FORMAT csv)";
const COPY_BREADCRUMBS: &str =
    "COPY breadcrumb (tstamp, latitude, longitude, speed, trip_id) FROM STDIN WITH (FORMAT csv)";
const SELECT_TRIP_IDS: &str = "SELECT trip_id::text FROM trip";

// rough size of one encoded breadcrumb, used to size the copy buffer up front
const ESTIMATED_BREADCRUMB_SIZE: usize = 64;

/// A `BulkStore` backed by a single PostgreSQL connection, loading rows with `COPY`.
pub struct PgBulkStore {
    options: PgConnectOptions,
    connection: Option<PgConnection>,
}

impl PgBulkStore {
    /// Connect to the PostgreSQL database at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|error| StoreError::ConnectionError { error })?;

        Self::connect_with(options).await
    }

    pub async fn connect_with(options: PgConnectOptions) -> Result<Self, StoreError> {
        let connection = PgConnection::connect_with(&options)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Self {
            options,
            connection: Some(connection),
        })
    }

    fn connection(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.connection.as_mut().ok_or(StoreError::Disconnected)
    }
}

#[async_trait]
impl BulkStore for PgBulkStore {
    async fn existing_trip_ids(&mut self) -> Result<HashSet<String>, StoreError> {
        let connection = self.connection()?;

        let trip_ids: Vec<String> = sqlx::query_scalar(SELECT_TRIP_IDS)
            .fetch_all(connection)
            .await
            .map_err(|error| StoreError::from_sqlx("SELECT", error))?;

        Ok(trip_ids.into_iter().collect())
    }

    async fn bulk_load(
        &mut self,
        trips: &[TripRow],
        breadcrumbs: &[BreadcrumbRow],
    ) -> Result<LoadReport, StoreError> {
        let connection = self.connection()?;
        let mut tx = connection
            .begin()
            .await
            .map_err(|error| StoreError::from_sqlx("BEGIN", error))?;

        match copy_batches(&mut tx, trips, breadcrumbs).await {
            Ok(report) => {
                tx.commit()
                    .await
                    .map_err(|error| StoreError::from_sqlx("COMMIT", error))?;
                Ok(report)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!("rollback after failed bulk load also failed: {}", rollback_error);
                }
                Err(error)
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), StoreError> {
        if let Some(connection) = self.connection.take() {
            if let Err(error) = connection.close().await {
                debug!("closing stale connection failed: {}", error);
            }
        }

        let connection = PgConnection::connect_with(&self.options)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;
        self.connection = Some(connection);

        Ok(())
    }

    async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(error) = connection.close().await {
                warn!("failed to close store connection: {}", error);
            }
        }
    }
}

async fn copy_batches(
    tx: &mut Transaction<'_, Postgres>,
    trips: &[TripRow],
    breadcrumbs: &[BreadcrumbRow],
) -> Result<LoadReport, StoreError> {
    let mut report = LoadReport::default();

    if !trips.is_empty() {
        let payload = encode_trips(trips)?;
        report.trips = copy_in(tx, COPY_TRIPS, &payload).await?;
    }

    if !breadcrumbs.is_empty() {
        let payload = encode_breadcrumbs(breadcrumbs)?;
        report.breadcrumbs = copy_in(tx, COPY_BREADCRUMBS, &payload).await?;
    }

    Ok(report)
}

async fn copy_in(
    tx: &mut Transaction<'_, Postgres>,
    statement: &str,
    payload: &[u8],
) -> Result<u64, StoreError> {
    let mut stream = tx
        .copy_in_raw(statement)
        .await
        .map_err(|error| StoreError::from_sqlx("COPY", error))?;

    let sent = stream.send(payload).await.map(|_| ());
    if let Err(error) = sent {
        // abort so the connection is left usable for the rollback
        if let Err(abort_error) = stream.abort("breadcrumb bulk load failed").await {
            debug!("aborting COPY failed: {}", abort_error);
        }
        return Err(StoreError::from_sqlx("COPY", error));
    }

    stream
        .finish()
        .await
        .map_err(|error| StoreError::from_sqlx("COPY", error))
}

/// Encode trips as CSV records in `COPY_TRIPS` column order.
pub fn encode_trips(trips: &[TripRow]) -> Result<Vec<u8>, StoreError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(trips.len() * 24));

    for trip in trips {
        csv_writer
            .write_record([trip.trip_id.as_str(), trip.vehicle_id.as_str()])
            .map_err(|e| StoreError::CsvError("trip", e))?;
    }

    csv_writer
        .into_inner()
        .map_err(|e| StoreError::CsvError("trip_flush", e.into_error().into()))
}

/// Encode breadcrumbs as CSV records in `COPY_BREADCRUMBS` column order.
/// Nulls become empty unquoted fields, which `COPY ... (FORMAT csv)` reads as NULL.
pub fn encode_breadcrumbs(breadcrumbs: &[BreadcrumbRow]) -> Result<Vec<u8>, StoreError> {
    let estimated_buffer_size = breadcrumbs.len() * ESTIMATED_BREADCRUMB_SIZE;
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(estimated_buffer_size));

    for row in breadcrumbs {
        let timestamp = row
            .timestamp
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default();

        csv_writer
            .write_record([
                timestamp,
                optional_field(row.latitude),
                optional_field(row.longitude),
                optional_field(row.speed),
                row.trip_id.clone().unwrap_or_default(),
            ])
            .map_err(|e| StoreError::CsvError("breadcrumb", e))?;
    }

    csv_writer
        .into_inner()
        .map_err(|e| StoreError::CsvError("breadcrumb_flush", e.into_error().into()))
}

fn optional_field(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
