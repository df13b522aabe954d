use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;

use crate::rows::{BreadcrumbRow, TripRow};
use crate::store::{BulkStore, LoadReport, StoreError};

/// A failure the next store operation should run into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// The connection drops; operations fail until `reconnect` succeeds.
    Disconnect,
    /// The batch is refused, the connection stays up.
    Reject,
}

/// An in-process `BulkStore`, used for dry runs and tests.
///
/// Loads are all-or-nothing and `trip_id` is unique, like the real tables.
#[derive(Debug)]
pub struct MemoryStore {
    trips: Vec<TripRow>,
    breadcrumbs: Vec<BreadcrumbRow>,
    connected: bool,
    load_failures: VecDeque<InjectedFailure>,
    reconnect_failures: u32,
    loads: u64,
    reconnects: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            trips: Vec::new(),
            breadcrumbs: Vec::new(),
            connected: true,
            load_failures: VecDeque::new(),
            reconnect_failures: 0,
            loads: 0,
            reconnects: 0,
        }
    }

    /// Pre-populate the trip table.
    pub fn with_trips(mut self, trips: impl IntoIterator<Item = TripRow>) -> Self {
        self.trips.extend(trips);
        self
    }

    /// Make the next `bulk_load` calls fail, in order.
    pub fn fail_next_load(&mut self, failure: InjectedFailure) {
        self.load_failures.push_back(failure);
    }

    /// Make the next `count` reconnect attempts fail.
    pub fn fail_reconnects(&mut self, count: u32) {
        self.reconnect_failures = count;
    }

    pub fn trips(&self) -> &[TripRow] {
        &self.trips
    }

    pub fn breadcrumbs(&self) -> &[BreadcrumbRow] {
        &self.breadcrumbs
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of committed loads.
    pub fn loads(&self) -> u64 {
        self.loads
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BulkStore for MemoryStore {
    async fn existing_trip_ids(&mut self) -> Result<HashSet<String>, StoreError> {
        if !self.connected {
            return Err(StoreError::Disconnected);
        }

        Ok(self.trips.iter().map(|t| t.trip_id.clone()).collect())
    }

    async fn bulk_load(
        &mut self,
        trips: &[TripRow],
        breadcrumbs: &[BreadcrumbRow],
    ) -> Result<LoadReport, StoreError> {
        if !self.connected {
            return Err(StoreError::Disconnected);
        }

        match self.load_failures.pop_front() {
            Some(InjectedFailure::Disconnect) => {
                self.connected = false;
                return Err(StoreError::Disconnected);
            }
            Some(InjectedFailure::Reject) => {
                return Err(StoreError::Rejected("injected failure".to_owned()));
            }
            None => {}
        }

        let mut trip_ids: HashSet<&str> = self.trips.iter().map(|t| t.trip_id.as_str()).collect();
        for trip in trips {
            if !trip_ids.insert(trip.trip_id.as_str()) {
                return Err(StoreError::Rejected(format!(
                    "duplicate key value violates unique constraint: trip_id={}",
                    trip.trip_id
                )));
            }
        }

        self.trips.extend_from_slice(trips);
        self.breadcrumbs.extend_from_slice(breadcrumbs);
        self.loads += 1;

        Ok(LoadReport {
            trips: trips.len() as u64,
            breadcrumbs: breadcrumbs.len() as u64,
        })
    }

    async fn reconnect(&mut self) -> Result<(), StoreError> {
        if self.reconnect_failures > 0 {
            self.reconnect_failures -= 1;
            self.connected = false;
            return Err(StoreError::Disconnected);
        }

        self.connected = true;
        self.reconnects += 1;
        Ok(())
    }

    async fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip(trip_id: &str) -> TripRow {
        TripRow {
            trip_id: trip_id.to_owned(),
            vehicle_id: "3010".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_trip_rolls_back_whole_load() {
        let mut store = MemoryStore::new().with_trips([trip("1")]);

        let result = store.bulk_load(&[trip("2"), trip("1")], &[]).await;

        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert_eq!(store.trips(), &[trip("1")]);
        assert_eq!(store.loads(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_until_reconnect() {
        let mut store = MemoryStore::new();
        store.fail_next_load(InjectedFailure::Disconnect);

        let result = store.bulk_load(&[trip("1")], &[]).await;
        assert!(matches!(result, Err(ref e) if e.is_connection()));
        assert!(!store.is_connected());
        assert!(store.existing_trip_ids().await.is_err());

        store.reconnect().await.unwrap();
        store.bulk_load(&[trip("1")], &[]).await.unwrap();
        assert_eq!(store.trips(), &[trip("1")]);
        assert_eq!(store.reconnects(), 1);
    }
}
