use std::fmt;

use crate::event::BreadcrumbEvent;
use crate::metrics_consts::RECORDS_VALIDATED;

pub const MAX_HDOP: f64 = 10.0;
pub const MAX_SATELLITES: i64 = 20;
pub const SECONDS_PER_DAY: i64 = 86400;

/// Domain rules every breadcrumb must satisfy, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    MissingVehicleId,
    MissingServiceDate,
    MissingCoordinates,
    HdopOutOfRange,
    SatellitesOutOfRange,
    TimeOfDayOutOfRange,
    /// A trip cannot start with a poor fix.
    HdopTooHighAtMidnight,
    /// Zero satellites must come with the worst possible precision.
    HdopTooLowWithoutSatellites,
}

impl Rule {
    pub const ALL: [Rule; 8] = [
        Rule::MissingVehicleId,
        Rule::MissingServiceDate,
        Rule::MissingCoordinates,
        Rule::HdopOutOfRange,
        Rule::SatellitesOutOfRange,
        Rule::TimeOfDayOutOfRange,
        Rule::HdopTooHighAtMidnight,
        Rule::HdopTooLowWithoutSatellites,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::MissingVehicleId => "missing_vehicle_id",
            Rule::MissingServiceDate => "missing_service_date",
            Rule::MissingCoordinates => "missing_coordinates",
            Rule::HdopOutOfRange => "hdop_out_of_range",
            Rule::SatellitesOutOfRange => "satellites_out_of_range",
            Rule::TimeOfDayOutOfRange => "time_of_day_out_of_range",
            Rule::HdopTooHighAtMidnight => "hdop_too_high_at_midnight",
            Rule::HdopTooLowWithoutSatellites => "hdop_too_low_without_satellites",
        }
    }

    /// Whether `event` satisfies this rule.
    pub fn holds(&self, event: &BreadcrumbEvent) -> bool {
        // Cross-field rules read a missing or null HDOP as 0.
        let hdop_or_zero = event.hdop.get().unwrap_or(0.0);

        match self {
            Rule::MissingVehicleId => event.vehicle_id.value().is_some_and(|id| !id.is_empty()),
            Rule::MissingServiceDate => event.service_date.value().is_some_and(|d| !d.is_empty()),
            Rule::MissingCoordinates => event.latitude.has_key() && event.longitude.has_key(),
            Rule::HdopOutOfRange => event
                .hdop
                .get()
                .map_or(true, |hdop| hdop > 0.0 && hdop <= MAX_HDOP),
            Rule::SatellitesOutOfRange => event
                .satellite_count
                .get()
                .map_or(true, |sats| (0..=MAX_SATELLITES).contains(&sats)),
            Rule::TimeOfDayOutOfRange => event
                .seconds_since_midnight
                .get()
                .map_or(true, |seconds| seconds <= SECONDS_PER_DAY),
            Rule::HdopTooHighAtMidnight => {
                !(event.seconds_since_midnight.get() == Some(0) && hdop_or_zero > 5.0)
            }
            Rule::HdopTooLowWithoutSatellites => {
                !(event.satellite_count.get() == Some(0) && hdop_or_zero < MAX_HDOP)
            }
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify `event`, returning the first rule it breaks.
pub fn validate(event: &BreadcrumbEvent) -> Result<(), Rule> {
    match Rule::ALL.into_iter().find(|rule| !rule.holds(event)) {
        Some(rule) => Err(rule),
        None => Ok(()),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ValidationCounters {
    pub passed: u64,
    pub failed: u64,
}

impl ValidationCounters {
    pub fn total(&self) -> u64 {
        self.passed + self.failed
    }
}

/// Applies the rule set and keeps the pass/fail counters for one pipeline run.
#[derive(Debug, Default)]
pub struct Validator {
    counters: ValidationCounters,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&mut self, event: &BreadcrumbEvent) -> Result<(), Rule> {
        let outcome = validate(event);

        match outcome {
            Ok(()) => {
                self.counters.passed += 1;
                metrics::counter!(RECORDS_VALIDATED, &[("result", "passed")]).increment(1);
            }
            Err(rule) => {
                self.counters.failed += 1;
                metrics::counter!(
                    RECORDS_VALIDATED,
                    &[("result", "failed"), ("rule", rule.as_str())]
                )
                .increment(1);
            }
        }

        outcome
    }

    pub fn counters(&self) -> ValidationCounters {
        self.counters
    }
}
