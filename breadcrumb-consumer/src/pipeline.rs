use breadcrumb_common::event::BreadcrumbEvent;
use breadcrumb_common::metrics_consts::{EVENTS_RECEIVED, EVENT_PARSE_ERROR};
use breadcrumb_common::pairing::{AnchorPolicy, Observation, PairingEngine, DEFAULT_MAX_SPEED};
use breadcrumb_common::rows::{BreadcrumbRow, TripRow};
use breadcrumb_common::store::BulkStore;
use breadcrumb_common::validation::{ValidationCounters, Validator};
use breadcrumb_common::writer::{BatchWriter, FlushError, FlushOutcome};
use tracing::{debug, warn};

use crate::stats::RunStatistics;

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub max_speed: f64,
    pub anchor_policy: AnchorPolicy,
    /// Stage records that failed validation too.
    pub persist_invalid: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_speed: DEFAULT_MAX_SPEED,
            anchor_policy: AnchorPolicy::default(),
            persist_invalid: false,
        }
    }
}

/// What happened to one inbound payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventOutcome {
    /// Empty or malformed payload.
    Discarded,
    FirstSighting,
    Rejected { speed: f64 },
    Paired { speed: f64, passed: usize, staged: usize },
}

impl EventOutcome {
    /// Whether the event counts as activity for idle detection.
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            EventOutcome::FirstSighting | EventOutcome::Paired { .. }
        )
    }
}

/// Owns all per-run state: pending breadcrumbs, counters and staging buffers.
///
/// `handle` takes `&mut self`, so one event is processed end to end before the
/// next one starts.
pub struct Pipeline<S> {
    pairing: PairingEngine,
    validator: Validator,
    writer: BatchWriter<S>,
    stats: RunStatistics,
    persist_invalid: bool,
}

impl<S: BulkStore> Pipeline<S> {
    pub fn new(config: PipelineConfig, writer: BatchWriter<S>) -> Self {
        Self {
            pairing: PairingEngine::new(config.max_speed, config.anchor_policy),
            validator: Validator::new(),
            writer,
            stats: RunStatistics::new(),
            persist_invalid: config.persist_invalid,
        }
    }

    /// Run one payload through pairing, validation and staging.
    /// Errors only when the store is lost for good.
    pub async fn handle(&mut self, payload: Option<&[u8]>) -> Result<EventOutcome, FlushError> {
        metrics::counter!(EVENTS_RECEIVED).increment(1);

        let event = match payload.map(BreadcrumbEvent::decode) {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!("discarding undecodable payload: {}", e);
                metrics::counter!(EVENT_PARSE_ERROR, &[("reason", "json")]).increment(1);
                self.stats.decode_errors += 1;
                return Ok(EventOutcome::Discarded);
            }
            None => {
                warn!("discarding delivery without payload");
                metrics::counter!(EVENT_PARSE_ERROR, &[("reason", "empty")]).increment(1);
                self.stats.decode_errors += 1;
                return Ok(EventOutcome::Discarded);
            }
        };

        let pair = match self.pairing.observe(event) {
            Observation::FirstSighting => {
                self.stats.first_sightings += 1;
                return Ok(EventOutcome::FirstSighting);
            }
            Observation::Rejected { speed } => {
                warn!("skipping pairing with unrealistic speed: {:.2} m/s", speed);
                self.stats.rejected_pairs += 1;
                return Ok(EventOutcome::Rejected { speed });
            }
            Observation::Paired(pair) => pair,
        };

        let speed = pair.speed;
        let mut passed = 0;
        let mut staged = 0;

        for record in pair.into_records() {
            let valid = match self.validator.validate(&record) {
                Ok(()) => {
                    passed += 1;
                    true
                }
                Err(rule) => {
                    debug!(rule = rule.as_str(), "breadcrumb failed validation");
                    false
                }
            };

            if !valid && !self.persist_invalid {
                continue;
            }

            let report = self
                .writer
                .append(TripRow::from_event(&record), BreadcrumbRow::from(&record))
                .await?;
            if report.breadcrumb_staged {
                self.stats.record(&record);
                staged += 1;
            }
        }

        Ok(EventOutcome::Paired {
            speed,
            passed,
            staged,
        })
    }

    pub async fn flush(&mut self) -> Result<FlushOutcome, FlushError> {
        self.writer.flush().await
    }

    pub async fn close(&mut self) {
        self.writer.close().await;
    }

    pub fn counters(&self) -> ValidationCounters {
        self.validator.counters()
    }

    pub fn stats(&self) -> &RunStatistics {
        &self.stats
    }

    pub fn pairing(&self) -> &PairingEngine {
        &self.pairing
    }

    pub fn writer(&self) -> &BatchWriter<S> {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breadcrumb_common::event::{Identifier, PairKey};
    use breadcrumb_common::memory::MemoryStore;
    use breadcrumb_common::writer::WriterConfig;
    use serde_json::json;

    fn payload(vehicle_id: i64, trip_id: i64, act_time: i64, meters: f64) -> Vec<u8> {
        json!({
            "VEHICLE_ID": vehicle_id,
            "EVENT_NO_TRIP": trip_id,
            "OPD_DATE": "14DEC2022:00:00:00",
            "ACT_TIME": act_time,
            "METERS": meters,
            "GPS_LATITUDE": 45.502045,
            "GPS_LONGITUDE": -122.575475,
            "GPS_HDOP": 0.8,
            "GPS_SATELLITES": 12
        })
        .to_string()
        .into_bytes()
    }

    fn pipeline(config: PipelineConfig) -> Pipeline<MemoryStore> {
        Pipeline::new(
            config,
            BatchWriter::new(MemoryStore::new(), WriterConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_adjacent_breadcrumbs_are_paired_and_staged() {
        let mut pipeline = pipeline(PipelineConfig::default());

        let first = pipeline.handle(Some(payload(1, 1, 0, 0.0).as_slice())).await.unwrap();
        assert_eq!(first, EventOutcome::FirstSighting);

        let second = pipeline
            .handle(Some(payload(1, 1, 10, 100.0).as_slice()))
            .await
            .unwrap();
        assert_eq!(
            second,
            EventOutcome::Paired {
                speed: 10.0,
                passed: 2,
                staged: 2
            }
        );

        assert_eq!(
            pipeline.counters(),
            ValidationCounters {
                passed: 2,
                failed: 0
            }
        );
        assert_eq!(pipeline.writer().buffered_breadcrumbs(), 2);
        assert_eq!(pipeline.writer().buffered_trips(), 1);

        pipeline.flush().await.unwrap();
        let store = pipeline.writer().store();
        assert_eq!(store.trips().len(), 1);
        assert!(store.breadcrumbs().iter().all(|row| row.speed == Some(10.0)));
    }

    #[tokio::test]
    async fn test_implausible_speed_stages_nothing() {
        let mut pipeline = pipeline(PipelineConfig::default());

        pipeline.handle(Some(payload(1, 1, 0, 0.0).as_slice())).await.unwrap();
        let outcome = pipeline
            .handle(Some(payload(1, 1, 1, 1000.0).as_slice()))
            .await
            .unwrap();

        assert_eq!(outcome, EventOutcome::Rejected { speed: 1000.0 });
        assert!(!outcome.is_activity());
        assert!(pipeline.writer().is_empty());
        assert_eq!(pipeline.counters().total(), 0);

        let key = PairKey {
            vehicle_id: Some(Identifier::from(1)),
            trip_id: Some(Identifier::from(1)),
        };
        assert_eq!(
            pipeline.pairing().pending(&key).unwrap().odometer_meters.get(),
            Some(0.0)
        );
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_discarded_without_counting() {
        let mut pipeline = pipeline(PipelineConfig::default());

        assert_eq!(
            pipeline.handle(Some(&b"{not json"[..])).await.unwrap(),
            EventOutcome::Discarded
        );
        assert_eq!(pipeline.handle(None).await.unwrap(), EventOutcome::Discarded);

        assert_eq!(pipeline.counters().total(), 0);
        assert_eq!(pipeline.stats().decode_errors, 2);
        assert_eq!(pipeline.pairing().pending_keys(), 0);
    }

    #[tokio::test]
    async fn test_dropped_rows_are_left_out_of_run_statistics() {
        let mut pipeline = pipeline(PipelineConfig::default());
        let mut first = serde_json::from_slice::<serde_json::Value>(&payload(7, 1, 0, 0.0))
            .unwrap();
        first["GPS_LATITUDE"] = serde_json::Value::Null;
        let mut second = serde_json::from_slice::<serde_json::Value>(&payload(7, 1, 10, 100.0))
            .unwrap();
        second["GPS_LATITUDE"] = serde_json::Value::Null;

        pipeline.handle(Some(first.to_string().as_bytes())).await.unwrap();
        let outcome = pipeline
            .handle(Some(second.to_string().as_bytes()))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            EventOutcome::Paired {
                speed: 10.0,
                passed: 2,
                staged: 0
            }
        );
        assert_eq!(pipeline.writer().buffered_breadcrumbs(), 0);
        assert_eq!(pipeline.stats().median_act_time(), None);
        assert_eq!(pipeline.stats().vehicles_on("14DEC2022:00:00:00"), 0);
    }

    #[tokio::test]
    async fn test_invalid_records_are_counted_but_not_staged() {
        let mut bad = serde_json::from_slice::<serde_json::Value>(&payload(1, 1, 10, 100.0))
            .unwrap();
        bad["GPS_SATELLITES"] = json!(50);
        let bad = bad.to_string().into_bytes();

        let mut strict = pipeline(PipelineConfig::default());
        strict.handle(Some(payload(1, 1, 0, 0.0).as_slice())).await.unwrap();
        let outcome = strict.handle(Some(bad.as_slice())).await.unwrap();
        assert_eq!(
            outcome,
            EventOutcome::Paired {
                speed: 10.0,
                passed: 1,
                staged: 1
            }
        );
        assert_eq!(
            strict.counters(),
            ValidationCounters {
                passed: 1,
                failed: 1
            }
        );

        let mut lenient = pipeline(PipelineConfig {
            persist_invalid: true,
            ..PipelineConfig::default()
        });
        lenient.handle(Some(payload(1, 1, 0, 0.0).as_slice())).await.unwrap();
        lenient.handle(Some(bad.as_slice())).await.unwrap();
        assert_eq!(lenient.writer().buffered_breadcrumbs(), 2);
    }
}
