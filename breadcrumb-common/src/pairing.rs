use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

use crate::event::{BreadcrumbEvent, Field, PairKey};
use crate::metrics_consts::{FIRST_SIGHTINGS, PAIRS_EMITTED, PAIRS_REJECTED, PENDING_KEYS};

/// No bus moves faster than this, in meters per second.
pub const DEFAULT_MAX_SPEED: f64 = 45.0;

/// What happens to the pending anchor when a pairing is rejected for implausible speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorPolicy {
    /// Keep the last plausible breadcrumb as the anchor.
    #[default]
    Preserve,
    /// Replace the anchor with the rejected breadcrumb.
    Overwrite,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid anchor policy, expected 'preserve' or 'overwrite'")]
pub struct ParseAnchorPolicyError(String);

impl FromStr for AnchorPolicy {
    type Err = ParseAnchorPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "preserve" => Ok(AnchorPolicy::Preserve),
            "overwrite" => Ok(AnchorPolicy::Overwrite),
            invalid => Err(ParseAnchorPolicyError(invalid.to_owned())),
        }
    }
}

/// Two chronologically adjacent breadcrumbs of the same `PairKey`.
/// Both carry the same speed, the one of the segment between them.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedPair {
    pub previous: BreadcrumbEvent,
    pub current: BreadcrumbEvent,
    pub speed: f64,
}

impl DerivedPair {
    pub fn into_records(self) -> [BreadcrumbEvent; 2] {
        [self.previous, self.current]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// First breadcrumb for its key, held back until the next one arrives.
    FirstSighting,
    Paired(DerivedPair),
    /// The derived speed was over the ceiling, nothing is emitted.
    Rejected { speed: f64 },
}

/// Speed over the segment between two breadcrumbs, in meters per second.
/// Zero whenever the time delta is not positive or an input is missing.
pub fn derive_speed(previous: &BreadcrumbEvent, current: &BreadcrumbEvent) -> f64 {
    let (
        Some(previous_meters),
        Some(current_meters),
        Some(previous_time),
        Some(current_time),
    ) = (
        previous.odometer_meters.get(),
        current.odometer_meters.get(),
        previous.seconds_since_midnight.get(),
        current.seconds_since_midnight.get(),
    )
    else {
        return 0.0;
    };

    let delta_time = current_time - previous_time;
    if delta_time <= 0 {
        return 0.0;
    }

    (current_meters - previous_meters) / delta_time as f64
}

/// Holds the last breadcrumb seen for every `PairKey` and pairs each new one against it.
///
/// Keys are never evicted: a vehicle may go quiet for a long time and its next
/// breadcrumb still pairs with the last one seen.
pub struct PairingEngine {
    pending: HashMap<PairKey, BreadcrumbEvent>,
    max_speed: f64,
    anchor_policy: AnchorPolicy,
}

impl PairingEngine {
    pub fn new(max_speed: f64, anchor_policy: AnchorPolicy) -> Self {
        Self {
            pending: HashMap::new(),
            max_speed,
            anchor_policy,
        }
    }

    pub fn observe(&mut self, event: BreadcrumbEvent) -> Observation {
        let observation = match self.pending.entry(event.pair_key()) {
            Entry::Vacant(slot) => {
                slot.insert(event);
                metrics::counter!(FIRST_SIGHTINGS).increment(1);
                Observation::FirstSighting
            }
            Entry::Occupied(mut slot) => {
                let speed = derive_speed(slot.get(), &event);

                if speed > self.max_speed {
                    if self.anchor_policy == AnchorPolicy::Overwrite {
                        slot.insert(event);
                    }
                    metrics::counter!(PAIRS_REJECTED).increment(1);
                    return Observation::Rejected { speed };
                }

                let mut current = event;
                current.speed = Field::Present(speed);
                let mut previous = slot.insert(current.clone());
                previous.speed = Field::Present(speed);

                metrics::counter!(PAIRS_EMITTED).increment(1);
                Observation::Paired(DerivedPair {
                    previous,
                    current,
                    speed,
                })
            }
        };

        metrics::gauge!(PENDING_KEYS).set(self.pending.len() as f64);
        observation
    }

    pub fn pending(&self, key: &PairKey) -> Option<&BreadcrumbEvent> {
        self.pending.get(key)
    }

    pub fn pending_keys(&self) -> usize {
        self.pending.len()
    }
}

impl Default for PairingEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SPEED, AnchorPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Identifier;

    fn breadcrumb(vehicle: &str, trip: &str, time: i64, meters: f64) -> BreadcrumbEvent {
        BreadcrumbEvent {
            vehicle_id: Field::Present(Identifier::from(vehicle)),
            trip_id: Field::Present(Identifier::from(trip)),
            seconds_since_midnight: Field::Present(time),
            odometer_meters: Field::Present(meters),
            ..Default::default()
        }
    }

    #[test]
    fn test_derive_speed() {
        let previous = breadcrumb("V1", "T1", 0, 0.0);

        assert_eq!(derive_speed(&previous, &breadcrumb("V1", "T1", 10, 100.0)), 10.0);
        assert_eq!(derive_speed(&previous, &breadcrumb("V1", "T1", 4, 10.0)), 2.5);
        // Non-positive time deltas yield zero.
        assert_eq!(derive_speed(&previous, &breadcrumb("V1", "T1", 0, 100.0)), 0.0);
        assert_eq!(
            derive_speed(&breadcrumb("V1", "T1", 20, 0.0), &breadcrumb("V1", "T1", 10, 100.0)),
            0.0
        );
    }

    #[test]
    fn test_derive_speed_with_missing_inputs() {
        let previous = breadcrumb("V1", "T1", 0, 0.0);
        let mut current = breadcrumb("V1", "T1", 10, 100.0);
        current.odometer_meters = Field::Null;

        assert_eq!(derive_speed(&previous, &current), 0.0);
    }

    #[test]
    fn test_first_sighting_is_held() {
        let mut engine = PairingEngine::default();
        let first = breadcrumb("V1", "T1", 0, 0.0);

        assert_eq!(engine.observe(first.clone()), Observation::FirstSighting);
        assert_eq!(engine.pending(&first.pair_key()), Some(&first));
        assert_eq!(engine.pending_keys(), 1);
    }

    #[test]
    fn test_adjacent_breadcrumbs_are_paired() {
        let mut engine = PairingEngine::default();
        engine.observe(breadcrumb("V1", "T1", 0, 0.0));

        let Observation::Paired(pair) = engine.observe(breadcrumb("V1", "T1", 10, 100.0)) else {
            panic!("expected a pair");
        };

        assert_eq!(pair.speed, 10.0);
        assert_eq!(pair.previous.speed, Field::Present(10.0));
        assert_eq!(pair.current.speed, Field::Present(10.0));
        assert_eq!(pair.previous.seconds_since_midnight, Field::Present(0));
        assert_eq!(pair.current.seconds_since_midnight, Field::Present(10));

        // The new breadcrumb becomes the anchor for the next one.
        let key = pair.current.pair_key();
        assert_eq!(engine.pending(&key), Some(&pair.current));
    }

    #[test]
    fn test_implausible_speed_preserves_anchor() {
        let mut engine = PairingEngine::default();
        let anchor = breadcrumb("V1", "T1", 0, 0.0);
        engine.observe(anchor.clone());

        assert_eq!(
            engine.observe(breadcrumb("V1", "T1", 1, 1000.0)),
            Observation::Rejected { speed: 1000.0 }
        );
        assert_eq!(engine.pending(&anchor.pair_key()), Some(&anchor));

        // The next plausible breadcrumb pairs against the preserved anchor.
        let Observation::Paired(pair) = engine.observe(breadcrumb("V1", "T1", 20, 200.0)) else {
            panic!("expected a pair");
        };
        assert_eq!(pair.speed, 10.0);
    }

    #[test]
    fn test_implausible_speed_can_overwrite_anchor() {
        let mut engine = PairingEngine::new(DEFAULT_MAX_SPEED, AnchorPolicy::Overwrite);
        engine.observe(breadcrumb("V1", "T1", 0, 0.0));
        let noisy = breadcrumb("V1", "T1", 1, 1000.0);

        assert_eq!(
            engine.observe(noisy.clone()),
            Observation::Rejected { speed: 1000.0 }
        );
        assert_eq!(engine.pending(&noisy.pair_key()), Some(&noisy));
    }

    #[test]
    fn test_speed_at_ceiling_is_accepted() {
        let mut engine = PairingEngine::default();
        engine.observe(breadcrumb("V1", "T1", 0, 0.0));

        assert!(matches!(
            engine.observe(breadcrumb("V1", "T1", 2, 90.0)),
            Observation::Paired(DerivedPair { speed, .. }) if speed == 45.0
        ));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut engine = PairingEngine::default();

        assert_eq!(
            engine.observe(breadcrumb("V1", "T1", 0, 0.0)),
            Observation::FirstSighting
        );
        assert_eq!(
            engine.observe(breadcrumb("V1", "T2", 5, 50.0)),
            Observation::FirstSighting
        );
        assert_eq!(
            engine.observe(breadcrumb("V2", "T1", 5, 50.0)),
            Observation::FirstSighting
        );
        assert_eq!(engine.pending_keys(), 3);
    }

    #[test]
    fn test_missing_trip_still_pairs_by_vehicle() {
        let mut engine = PairingEngine::default();
        let mut first = breadcrumb("V1", "T1", 0, 0.0);
        first.trip_id = Field::Absent;
        let mut second = breadcrumb("V1", "T1", 10, 50.0);
        second.trip_id = Field::Null;

        engine.observe(first);
        assert!(matches!(engine.observe(second), Observation::Paired(_)));
    }

    #[test]
    fn test_parse_anchor_policy() {
        assert_eq!("preserve".parse(), Ok(AnchorPolicy::Preserve));
        assert_eq!("OVERWRITE".parse(), Ok(AnchorPolicy::Overwrite));
        assert!("sometimes".parse::<AnchorPolicy>().is_err());
    }
}
