use std::time;

#[derive(Copy, Clone, Debug)]
/// The policy the `BatchWriter` follows when re-establishing a lost store connection.
pub struct ReconnectPolicy {
    /// Number of reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
}

impl ReconnectPolicy {
    pub fn new(
        max_attempts: u32,
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
    ) -> Self {
        Self {
            max_attempts,
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// Calculate the time to wait after a failed attempt, where `attempt` counts from 0.
    pub fn time_until_next_attempt(&self, attempt: u32) -> time::Duration {
        let candidate_interval = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt));

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: Some(time::Duration::from_secs(30)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_until_maximum() {
        let policy = ReconnectPolicy::new(
            10,
            2,
            time::Duration::from_millis(100),
            Some(time::Duration::from_millis(500)),
        );

        assert_eq!(
            policy.time_until_next_attempt(0),
            time::Duration::from_millis(100)
        );
        assert_eq!(
            policy.time_until_next_attempt(1),
            time::Duration::from_millis(200)
        );
        assert_eq!(
            policy.time_until_next_attempt(2),
            time::Duration::from_millis(400)
        );
        assert_eq!(
            policy.time_until_next_attempt(3),
            time::Duration::from_millis(500)
        );
    }

    #[test]
    fn test_backoff_without_maximum() {
        let policy = ReconnectPolicy::new(3, 3, time::Duration::from_secs(1), None);

        assert_eq!(
            policy.time_until_next_attempt(2),
            time::Duration::from_secs(9)
        );
    }
}
