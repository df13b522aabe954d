use std::collections::{BTreeMap, HashSet};
use std::fmt;

use breadcrumb_common::event::BreadcrumbEvent;

pub const MIN_VEHICLES_PER_DATE: usize = 1000;
pub const MAX_VEHICLES_PER_DATE: usize = 5000;
pub const EXPECTED_ACT_TIME_RANGE: (f64, f64) = (20000.0, 60000.0);

/// Observations about one run that are reported next to the validation counters.
/// They never influence validation or staging.
#[derive(Debug, Default)]
pub struct RunStatistics {
    pub decode_errors: u64,
    pub first_sightings: u64,
    pub rejected_pairs: u64,
    vehicles_per_date: BTreeMap<String, HashSet<String>>,
    act_times: Vec<i64>,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a record that was staged.
    pub fn record(&mut self, event: &BreadcrumbEvent) {
        if let (Some(date), Some(vehicle_id)) = (event.service_date.value(), event.vehicle_id.value())
        {
            if !date.is_empty() && !vehicle_id.is_empty() {
                self.vehicles_per_date
                    .entry(date.clone())
                    .or_default()
                    .insert(vehicle_id.to_string());
            }
        }

        if let Some(act_time) = event.seconds_since_midnight.get() {
            self.act_times.push(act_time);
        }
    }

    pub fn vehicles_on(&self, date: &str) -> usize {
        self.vehicles_per_date.get(date).map_or(0, HashSet::len)
    }

    pub fn median_act_time(&self) -> Option<f64> {
        if self.act_times.is_empty() {
            return None;
        }

        let mut sorted = self.act_times.clone();
        sorted.sort_unstable();
        let middle = sorted.len() / 2;

        let median = if sorted.len() % 2 == 0 {
            (sorted[middle - 1] as f64 + sorted[middle] as f64) / 2.0
        } else {
            sorted[middle] as f64
        };
        Some(median)
    }

    pub fn findings(&self) -> Vec<Finding> {
        let mut findings = Vec::new();

        for (date, vehicles) in &self.vehicles_per_date {
            let count = vehicles.len();
            if count < MIN_VEHICLES_PER_DATE {
                findings.push(Finding::TooFewVehicles {
                    date: date.clone(),
                    count,
                });
            }
            if count > MAX_VEHICLES_PER_DATE {
                findings.push(Finding::TooManyVehicles {
                    date: date.clone(),
                    count,
                });
            }
        }

        if let Some(median) = self.median_act_time() {
            let (low, high) = EXPECTED_ACT_TIME_RANGE;
            findings.push(Finding::MedianActTime {
                median,
                within_range: (low..=high).contains(&median),
            });
        }

        findings
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    TooFewVehicles { date: String, count: usize },
    TooManyVehicles { date: String, count: usize },
    MedianActTime { median: f64, within_range: bool },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Finding::TooFewVehicles { date, count } => {
                write!(f, "Too few vehicles on {date}: {count}")
            }
            Finding::TooManyVehicles { date, count } => {
                write!(f, "Too many vehicles on {date}: {count}")
            }
            Finding::MedianActTime {
                median,
                within_range: true,
            } => write!(f, "Median ACT_TIME {median} is within expected range"),
            Finding::MedianActTime {
                median,
                within_range: false,
            } => write!(f, "Median ACT_TIME {median} is outside expected range"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breadcrumb_common::event::{Field, Identifier};

    fn breadcrumb(vehicle_id: i64, date: &str, act_time: i64) -> BreadcrumbEvent {
        BreadcrumbEvent {
            vehicle_id: Field::Present(Identifier::from(vehicle_id)),
            service_date: Field::Present(date.to_owned()),
            seconds_since_midnight: Field::Present(act_time),
            ..Default::default()
        }
    }

    #[test]
    fn test_median_act_time() {
        let mut stats = RunStatistics::new();
        assert_eq!(stats.median_act_time(), None);

        for act_time in [30000, 10000, 20000] {
            stats.record(&breadcrumb(1, "14DEC2022:00:00:00", act_time));
        }
        assert_eq!(stats.median_act_time(), Some(20000.0));

        stats.record(&breadcrumb(1, "14DEC2022:00:00:00", 40000));
        assert_eq!(stats.median_act_time(), Some(25000.0));
    }

    #[test]
    fn test_median_act_time_of_extreme_values() {
        let mut stats = RunStatistics::new();
        stats.record(&breadcrumb(1, "14DEC2022:00:00:00", i64::MAX));
        stats.record(&breadcrumb(1, "14DEC2022:00:00:00", i64::MAX - 1));

        assert_eq!(stats.median_act_time(), Some(i64::MAX as f64));
    }

    #[test]
    fn test_findings() {
        let mut stats = RunStatistics::new();
        stats.record(&breadcrumb(3010, "14DEC2022:00:00:00", 5000));
        stats.record(&breadcrumb(3010, "14DEC2022:00:00:00", 5005));
        stats.record(&breadcrumb(3011, "14DEC2022:00:00:00", 5010));

        assert_eq!(stats.vehicles_on("14DEC2022:00:00:00"), 2);
        assert_eq!(
            stats.findings(),
            vec![
                Finding::TooFewVehicles {
                    date: "14DEC2022:00:00:00".to_owned(),
                    count: 2
                },
                Finding::MedianActTime {
                    median: 5005.0,
                    within_range: false
                },
            ]
        );
        assert_eq!(
            stats.findings()[1].to_string(),
            "Median ACT_TIME 5005 is outside expected range"
        );
    }
}
