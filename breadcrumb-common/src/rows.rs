use chrono::NaiveDateTime;

use crate::event::BreadcrumbEvent;

/// Format of `BreadcrumbRow::timestamp` when written out.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Mapping of a trip to the vehicle that ran it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TripRow {
    pub trip_id: String,
    pub vehicle_id: String,
}

impl TripRow {
    /// Only derived when both ids carry a non-empty value.
    pub fn from_event(event: &BreadcrumbEvent) -> Option<Self> {
        let trip_id = event.trip_id.value().filter(|id| !id.is_empty())?;
        let vehicle_id = event.vehicle_id.value().filter(|id| !id.is_empty())?;

        Some(TripRow {
            trip_id: trip_id.to_string(),
            vehicle_id: vehicle_id.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreadcrumbRow {
    pub timestamp: Option<NaiveDateTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<f64>,
    pub trip_id: Option<String>,
}

impl BreadcrumbRow {
    pub fn has_nulls(&self) -> bool {
        self.timestamp.is_none()
            || self.latitude.is_none()
            || self.longitude.is_none()
            || self.speed.is_none()
            || self.trip_id.is_none()
    }
}

impl From<&BreadcrumbEvent> for BreadcrumbRow {
    fn from(event: &BreadcrumbEvent) -> Self {
        BreadcrumbRow {
            timestamp: event.timestamp(),
            latitude: event.latitude.get(),
            longitude: event.longitude.get(),
            speed: event.speed.get(),
            trip_id: event.trip_id.value().map(ToString::to_string),
        }
    }
}

/// How a breadcrumb row with a null field is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullRowPolicy {
    /// Drop the row before it is staged.
    #[default]
    Drop,
    /// Stage it, nulls are written out as empty fields.
    Substitute,
}

impl NullRowPolicy {
    pub fn from_drop_flag(drop_null_rows: bool) -> Self {
        if drop_null_rows {
            NullRowPolicy::Drop
        } else {
            NullRowPolicy::Substitute
        }
    }
}
