use std::fmt;
use std::time::Duration;

use breadcrumb_common::validation::ValidationCounters;

use crate::stats::Finding;

/// Operator facing report printed on every termination path.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub counters: ValidationCounters,
    pub elapsed: Duration,
    pub decode_errors: u64,
    pub first_sightings: u64,
    pub rejected_pairs: u64,
    pub findings: Vec<Finding>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "--- Post-run Assertions ---")?;
        for finding in &self.findings {
            writeln!(f, "{finding}")?;
        }
        writeln!(f, "Discarded payloads: {}", self.decode_errors)?;
        writeln!(f, "First sightings: {}", self.first_sightings)?;
        writeln!(f, "Rejected pairs: {}", self.rejected_pairs)?;

        writeln!(f)?;
        writeln!(f, "--- Validation Summary ---")?;
        writeln!(f, "Passed: {}", self.counters.passed)?;
        writeln!(f, "Failed: {}", self.counters.failed)?;
        writeln!(f, "Total: {}", self.counters.total())?;
        write!(f, "Total runtime: {:.2} seconds", self.elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_format() {
        let summary = RunSummary {
            counters: ValidationCounters {
                passed: 8,
                failed: 2,
            },
            elapsed: Duration::from_millis(12_340),
            decode_errors: 1,
            first_sightings: 3,
            rejected_pairs: 0,
            findings: vec![Finding::MedianActTime {
                median: 30000.0,
                within_range: true,
            }],
        };

        let rendered = summary.to_string();
        assert!(rendered.contains("Median ACT_TIME 30000 is within expected range\n"));
        assert!(rendered.ends_with(
            "--- Validation Summary ---\nPassed: 8\nFailed: 2\nTotal: 10\nTotal runtime: 12.34 seconds"
        ));
    }
}
