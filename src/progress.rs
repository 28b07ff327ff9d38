//! C5 — Progress Calculator.
//!
//! Maps `{stage, providerProgress}` onto a monotonic 0-100 percentage and
//! estimates time remaining from a bounded sample history. Generalizes the
//! current/total/percentage bookkeeping shape of
//! `scheduling::queue::JobProgress::update` to the specification's
//! stage-banded mapping and max-with-prior monotonicity rule.

use crate::model::Stage;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

const HISTORY_CAPACITY: usize = 10;

fn clamp_u8(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

fn raw_for(stage: Stage, provider_progress: u8) -> u8 {
    let provider_progress = provider_progress.min(100);
    match stage {
        Stage::Dedup => 0,
        Stage::Queued => 5,
        Stage::ExternalGeneration => {
            clamp_u8(10 + (f64::from(provider_progress) * 0.8).round() as i64)
        }
        Stage::Caching => 90,
        Stage::Completed => 100,
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    progress: u8,
    observed_at: DateTime<Utc>,
}

/// Monotonic progress calculator with bounded rate-estimation history.
pub struct ProgressCalculator {
    last_returned: u8,
    history: VecDeque<Sample>,
}

impl Default for ProgressCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCalculator {
    /// Construct a fresh calculator at 0%.
    pub fn new() -> Self {
        Self {
            last_returned: 0,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Map `(stage, providerProgress)` to an integer 0-100, clamping provider
    /// progress first and never returning less than the last value returned.
    pub fn calculate(&mut self, stage: Stage, provider_progress: u8) -> u8 {
        self.calculate_at(stage, provider_progress, Utc::now())
    }

    /// Same as [`calculate`](Self::calculate) with an explicit observation
    /// time, for deterministic testing.
    pub fn calculate_at(&mut self, stage: Stage, provider_progress: u8, now: DateTime<Utc>) -> u8 {
        let raw = raw_for(stage, provider_progress);
        let value = raw.max(self.last_returned);
        self.last_returned = value;

        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(Sample {
            progress: value,
            observed_at: now,
        });

        value
    }

    /// Estimate milliseconds remaining from the bounded sample history, or
    /// `None` if there aren't enough samples, the rate is non-positive, or
    /// progress is already 100.
    pub fn estimate_remaining_ms(&self, current_progress: u8) -> Option<u64> {
        if current_progress >= 100 {
            return None;
        }
        if self.history.len() < 2 {
            return None;
        }

        let first = self.history.front()?;
        let last = self.history.back()?;

        let progress_delta = f64::from(last.progress) - f64::from(first.progress);
        let time_delta_ms = (last.observed_at - first.observed_at).num_milliseconds();
        if time_delta_ms <= 0 {
            return None;
        }

        let rate_per_ms = progress_delta / time_delta_ms as f64;
        if rate_per_ms <= 0.0 {
            return None;
        }

        let remaining = (100.0 - f64::from(current_progress)) / rate_per_ms;
        Some(remaining.round() as u64)
    }

    /// Reset to 0%, clearing history. The only way to rewind the calculator.
    pub fn reset(&mut self) {
        self.last_returned = 0;
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn s3_monotonic_progress_on_provider_regress() {
        let mut calc = ProgressCalculator::new();
        let t0 = Utc::now();
        assert_eq!(calc.calculate_at(Stage::ExternalGeneration, 50, t0), 50);
        assert_eq!(
            calc.calculate_at(Stage::ExternalGeneration, 30, t0 + Duration::seconds(1)),
            50
        );
        assert_eq!(
            calc.calculate_at(Stage::ExternalGeneration, 100, t0 + Duration::seconds(2)),
            90
        );
        assert_eq!(calc.calculate_at(Stage::Caching, 0, t0 + Duration::seconds(3)), 90);
        assert_eq!(
            calc.calculate_at(Stage::Completed, 0, t0 + Duration::seconds(4)),
            100
        );
    }

    #[test]
    fn provider_progress_is_clamped_before_mapping() {
        let mut calc = ProgressCalculator::new();
        assert_eq!(calc.calculate(Stage::ExternalGeneration, 250), 90);
    }

    #[test]
    fn completed_is_always_exactly_100() {
        let mut calc = ProgressCalculator::new();
        assert_eq!(calc.calculate(Stage::Completed, 0), 100);
    }

    #[test]
    fn reset_clears_history_and_last_value() {
        let mut calc = ProgressCalculator::new();
        calc.calculate(Stage::ExternalGeneration, 80);
        calc.reset();
        assert_eq!(calc.calculate(Stage::Dedup, 0), 0);
    }

    #[test]
    fn estimate_is_none_with_fewer_than_two_samples() {
        let mut calc = ProgressCalculator::new();
        calc.calculate(Stage::ExternalGeneration, 10);
        assert_eq!(calc.estimate_remaining_ms(20), None);
    }

    #[test]
    fn estimate_is_some_with_positive_rate() {
        let mut calc = ProgressCalculator::new();
        let t0 = Utc::now();
        calc.calculate_at(Stage::ExternalGeneration, 0, t0);
        calc.calculate_at(Stage::ExternalGeneration, 50, t0 + Duration::seconds(10));
        // progress went 10 -> 50 over 10s => rate 4%/s; at 50%, 50 remaining / 4%/s = 12.5s
        let estimate = calc.estimate_remaining_ms(50).unwrap();
        assert!(estimate > 0);
    }

    #[test]
    fn estimate_is_none_when_stuck() {
        let mut calc = ProgressCalculator::new();
        let t0 = Utc::now();
        calc.calculate_at(Stage::ExternalGeneration, 50, t0);
        calc.calculate_at(Stage::ExternalGeneration, 50, t0 + Duration::seconds(5));
        assert_eq!(calc.estimate_remaining_ms(50), None);
    }
}
