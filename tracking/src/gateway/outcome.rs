//! Injectable outcome source for the simulated enterprise system

use std::collections::VecDeque;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::payload::ErrorCode;

/// What the next simulated call should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedOutcome {
    Succeed,
    Fail(ErrorCode),
}

/// Decides success or failure of each simulated call.
pub trait OutcomeGenerator: Send + Sync {
    fn next_outcome(&self) -> SimulatedOutcome;

    /// Latency in milliseconds within `min..=max`
    fn latency_ms(&self, min: u64, max: u64) -> u64;
}

/// Fails with a fixed probability, picking a random (or forced) code.
pub struct RandomOutcomes {
    failure_probability: f64,
    forced_code: Option<ErrorCode>,
    rng: Mutex<StdRng>,
}

impl RandomOutcomes {
    pub fn new(failure_probability: f64) -> Self {
        Self {
            failure_probability: if failure_probability.is_nan() {
                0.0
            } else {
                failure_probability.clamp(0.0, 1.0)
            },
            forced_code: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sequence for reproducible runs
    pub fn seeded(failure_probability: f64, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..Self::new(failure_probability)
        }
    }

    /// Every failure reports `code`
    pub fn with_forced_code(mut self, code: ErrorCode) -> Self {
        self.forced_code = Some(code);
        self
    }

    pub fn failure_probability(&self) -> f64 {
        self.failure_probability
    }
}

impl OutcomeGenerator for RandomOutcomes {
    fn next_outcome(&self) -> SimulatedOutcome {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        if !rng.gen_bool(self.failure_probability) {
            return SimulatedOutcome::Succeed;
        }
        let code = self.forced_code.unwrap_or_else(|| {
            ErrorCode::ALL
                .choose(&mut *rng)
                .copied()
                .unwrap_or(ErrorCode::SystemError)
        });
        SimulatedOutcome::Fail(code)
    }

    fn latency_ms(&self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_range(min..=max)
    }
}

/// Replays a fixed list of outcomes, then repeats the fallback.
///
/// Latency is always the configured minimum.
pub struct ScriptedOutcomes {
    script: Mutex<VecDeque<SimulatedOutcome>>,
    fallback: SimulatedOutcome,
}

impl ScriptedOutcomes {
    pub fn new(script: impl IntoIterator<Item = SimulatedOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: SimulatedOutcome::Succeed,
        }
    }

    pub fn always(outcome: SimulatedOutcome) -> Self {
        Self::new([]).with_fallback(outcome)
    }

    pub fn with_fallback(mut self, fallback: SimulatedOutcome) -> Self {
        self.fallback = fallback;
        self
    }
}

impl OutcomeGenerator for ScriptedOutcomes {
    fn next_outcome(&self) -> SimulatedOutcome {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(self.fallback)
    }

    fn latency_ms(&self, min: u64, _max: u64) -> u64 {
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probability_extremes() {
        let never = RandomOutcomes::seeded(0.0, 7);
        let always = RandomOutcomes::seeded(1.0, 7);
        for _ in 0..50 {
            assert_eq!(never.next_outcome(), SimulatedOutcome::Succeed);
            assert!(matches!(always.next_outcome(), SimulatedOutcome::Fail(_)));
        }
    }

    #[test]
    fn test_forced_code_and_latency_bounds() {
        let outcomes = RandomOutcomes::seeded(1.0, 1).with_forced_code(ErrorCode::ConnTimeout);
        for _ in 0..20 {
            assert_eq!(
                outcomes.next_outcome(),
                SimulatedOutcome::Fail(ErrorCode::ConnTimeout)
            );
            let latency = outcomes.latency_ms(5, 15);
            assert!((5..=15).contains(&latency));
        }
        assert_eq!(outcomes.latency_ms(9, 3), 9);
    }

    #[test]
    fn test_probability_is_clamped() {
        assert_eq!(RandomOutcomes::new(3.0).failure_probability(), 1.0);
        assert_eq!(RandomOutcomes::new(-1.0).failure_probability(), 0.0);
    }

    #[test]
    fn test_script_then_fallback() {
        let outcomes = ScriptedOutcomes::new([
            SimulatedOutcome::Fail(ErrorCode::QuantityMismatch),
            SimulatedOutcome::Succeed,
        ])
        .with_fallback(SimulatedOutcome::Fail(ErrorCode::SystemError));

        assert_eq!(
            outcomes.next_outcome(),
            SimulatedOutcome::Fail(ErrorCode::QuantityMismatch)
        );
        assert_eq!(outcomes.next_outcome(), SimulatedOutcome::Succeed);
        assert_eq!(
            outcomes.next_outcome(),
            SimulatedOutcome::Fail(ErrorCode::SystemError)
        );
        assert_eq!(outcomes.latency_ms(4, 40), 4);
    }
}
