use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::rows::{BreadcrumbRow, TripRow};

/// Enumeration of errors for operations with a `BulkStore`.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError {
        command: &'static str,
        error: sqlx::Error,
    },
    #[error("failed to encode {0} as csv: {1}")]
    CsvError(&'static str, csv::Error),
    #[error("not connected to the store")]
    Disconnected,
    #[error("store rejected the batch: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Wrap a sqlx error, telling lost connections apart from failed statements.
    pub fn from_sqlx(command: &'static str, error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed => StoreError::ConnectionError { error },
            error => StoreError::QueryError { command, error },
        }
    }

    /// Whether recovering from this error requires a new connection.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            StoreError::ConnectionError { .. } | StoreError::Disconnected
        )
    }
}

/// Number of rows a successful `bulk_load` committed per destination.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub trips: u64,
    pub breadcrumbs: u64,
}

/// Durable storage for trips and breadcrumbs, written in bulk.
#[async_trait]
pub trait BulkStore: Send {
    /// Every `trip_id` already stored.
    async fn existing_trip_ids(&mut self) -> Result<HashSet<String>, StoreError>;

    /// Append both batches inside a single transaction.
    /// Either every row is committed or, on error, none is.
    async fn bulk_load(
        &mut self,
        trips: &[TripRow],
        breadcrumbs: &[BreadcrumbRow],
    ) -> Result<LoadReport, StoreError>;

    /// Drop the current connection, if any, and open a new one.
    async fn reconnect(&mut self) -> Result<(), StoreError>;

    /// Release the connection. The store is not used again afterwards.
    async fn close(&mut self);
}
