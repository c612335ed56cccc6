//! Adaptive delay for non-priority resolutions
//!
//! `delay = min(max, base * 2^min(errors, cap) * jitter)`, with jitter drawn
//! uniformly from `[jitter_min, jitter_max)`.

use qtag_common::config::SchedulerSettings;
use rand::Rng;
use std::time::Duration;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub exponent_cap: u32,
    pub jitter_min: f64,
    pub jitter_max: f64,
    pub reset_on_success: bool,
}

impl BackoffPolicy {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            base: settings.base_delay(),
            max: settings.max_delay(),
            exponent_cap: settings.backoff_exponent_cap,
            jitter_min: settings.jitter_min,
            jitter_max: settings.jitter_max,
            reset_on_success: settings.reset_on_success,
        }
    }

    /// Delay after `errors` consecutive failures with the given jitter factor
    pub fn delay_for(&self, errors: u32, jitter: f64) -> Duration {
        let exponent = errors.min(self.exponent_cap).min(62);
        let factor = (1u64 << exponent) as f64 * jitter;
        let millis = self.base.as_millis() as f64 * factor;
        let capped = millis.min(self.max.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn sample_jitter(&self) -> f64 {
        if self.jitter_max > self.jitter_min {
            rand::thread_rng().gen_range(self.jitter_min..self.jitter_max)
        } else {
            self.jitter_min
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&SchedulerSettings::default())
    }
}

/// Process-wide error counter and the delay it currently implies
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffState {
    consecutive_errors: u32,
    current_delay: Duration,
}

impl BackoffState {
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            consecutive_errors: 0,
            current_delay: policy.base,
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Count a failure and widen the delay
    pub fn record_failure(&mut self, policy: &BackoffPolicy) -> Duration {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.current_delay = policy.delay_for(self.consecutive_errors, policy.sample_jitter());
        self.current_delay
    }

    /// Count a success; resets to the base delay when the policy says so
    pub fn record_success(&mut self, policy: &BackoffPolicy) {
        if policy.reset_on_success {
            self.consecutive_errors = 0;
            self.current_delay = policy.base;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_base() {
        let policy = BackoffPolicy::default();
        let state = BackoffState::new(&policy);
        assert_eq!(state.current_delay(), Duration::from_millis(1000));
        assert_eq!(state.consecutive_errors(), 0);
    }

    #[test]
    fn test_delay_doubles_without_jitter() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1, 1.0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2, 1.0), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(3, 1.0), Duration::from_millis(8000));
        assert_eq!(policy.delay_for(4, 1.0), Duration::from_millis(10_000));
    }

    #[test]
    fn test_growth_is_capped() {
        let policy = BackoffPolicy::default();
        let mut state = BackoffState::new(&policy);
        for _ in 0..5 {
            state.record_failure(&policy);
        }
        assert_eq!(state.consecutive_errors(), 5);
        for _ in 0..200 {
            let delay = state.record_failure(&policy);
            assert!(delay <= Duration::from_millis(10_000));
        }
        assert_eq!(policy.delay_for(u32::MAX, 1.2), Duration::from_millis(10_000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let mut state = BackoffState::new(&policy);
            let delay = state.record_failure(&policy);
            assert!(delay >= Duration::from_millis(1600), "{delay:?}");
            assert!(delay < Duration::from_millis(2400), "{delay:?}");
        }
    }

    #[test]
    fn test_success_resets_when_enabled() {
        let policy = BackoffPolicy::default();
        let mut state = BackoffState::new(&policy);
        state.record_failure(&policy);
        state.record_failure(&policy);
        state.record_success(&policy);
        assert_eq!(state.consecutive_errors(), 0);
        assert_eq!(state.current_delay(), policy.base);
    }

    #[test]
    fn test_success_keeps_penalty_when_disabled() {
        let policy = BackoffPolicy {
            reset_on_success: false,
            ..BackoffPolicy::default()
        };
        let mut state = BackoffState::new(&policy);
        state.record_failure(&policy);
        let widened = state.current_delay();
        state.record_success(&policy);
        assert_eq!(state.consecutive_errors(), 1);
        assert_eq!(state.current_delay(), widened);
    }
}
