//! Exponential backoff with a bounded attempt budget.

use std::time::Duration;

use super::config::ReconnectConfig;

/// Pure backoff arithmetic: `min(initial * 2^(attempt - 1), max)`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(initial_backoff: Duration, max_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            max_attempts,
        }
    }

    /// Delay before reconnection attempt number `attempt` (1-based).
    ///
    /// Attempt `0` is treated like attempt `1`. Overflow saturates at `max_backoff`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2_u32
            .checked_pow(exponent)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(
            config.initial_backoff,
            config.max_backoff,
            config.max_attempts,
        )
    }
}

/// A retry the connection driver should schedule.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub attempt: u32,
    pub delay: Duration,
}

/// Attempt counter for the current backoff cycle.
///
/// `attempt` never exceeds the policy's `max_attempts`.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl ReconnectState {
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Record a failed or abnormally closed connection.
    ///
    /// Returns the retry to schedule, or `None` once the attempt budget is spent.
    pub fn advance(&mut self) -> Option<ScheduledRetry> {
        let next = self.attempt.saturating_add(1);
        if !self.policy.should_retry(next) {
            return None;
        }

        self.attempt = next;
        Some(ScheduledRetry {
            attempt: next,
            delay: self.policy.next_delay(next),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dashboard_policy() -> ReconnectPolicy {
        ReconnectPolicy::from(&ReconnectConfig::default())
    }

    #[test]
    fn delay_doubles_from_base() {
        let policy = dashboard_policy();
        let delays: Vec<u128> = (1..=5)
            .map(|attempt| policy.next_delay(attempt).as_millis())
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = dashboard_policy();

        assert_eq!(policy.next_delay(6), Duration::from_secs(30));
        assert_eq!(policy.next_delay(40), Duration::from_secs(30));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn should_retry_up_to_max_attempts() {
        let policy = dashboard_policy();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(5));
        assert!(!policy.should_retry(6));
    }

    #[test]
    fn advance_stops_when_budget_is_spent() {
        let mut state = ReconnectState::new(ReconnectPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(250),
            3,
        ));

        let retries: Vec<ScheduledRetry> = std::iter::from_fn(|| state.advance()).collect();

        assert_eq!(
            retries,
            vec![
                ScheduledRetry {
                    attempt: 1,
                    delay: Duration::from_millis(100)
                },
                ScheduledRetry {
                    attempt: 2,
                    delay: Duration::from_millis(200)
                },
                ScheduledRetry {
                    attempt: 3,
                    delay: Duration::from_millis(250)
                },
            ]
        );
        assert_eq!(state.attempt(), 3);
        assert_eq!(state.advance(), None);
        assert_eq!(state.attempt(), 3);
    }

    #[test]
    fn reset_restarts_the_cycle() {
        let mut state = ReconnectState::new(dashboard_policy());
        _ = state.advance();
        _ = state.advance();

        state.reset();

        let retry = state.advance().unwrap();
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.delay, Duration::from_secs(1));
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut state = ReconnectState::new(ReconnectPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            0,
        ));

        assert_eq!(state.advance(), None);
    }
}
