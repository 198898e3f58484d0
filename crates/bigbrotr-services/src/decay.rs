//! Validator's probabilistic-selection decay curve (§4.6, Open Question
//! in spec §9, resolved in `DESIGN.md`). A tagged-enum-of-policies
//! generalizing `chem-policies::SelectionParams`'s
//! `#[serde(tag = "policy", content = "params")]` shape from
//! property-selection to candidate-selection.

use serde::{Deserialize, Serialize};

/// A candidate's selection probability as a function of its
/// `failed_attempts` count (§4.6 step 2: "p = max(p_min, base_p ×
/// decay^failed_attempts)").
pub trait DecayPolicy: Send + Sync {
    fn probability(&self, failed_attempts: u32) -> f64;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "policy", content = "params")]
pub enum DecayParams {
    Exponential(ExponentialDecay),
}

impl DecayParams {
    pub fn policy(&self) -> Box<dyn DecayPolicy> {
        match self {
            DecayParams::Exponential(params) => Box::new(params.clone()),
        }
    }
}

/// `p = max(p_min, base_p * decay^failed_attempts)`. `base_p` is the
/// selection probability for a never-failed candidate; `decay` in (0, 1]
/// shrinks it per failure; `p_min` is the floor so a candidate is never
/// permanently unselectable short of exceeding `max_failed_attempts`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ExponentialDecay {
    pub base_p: f64,
    pub decay: f64,
    pub p_min: f64,
}

impl Default for ExponentialDecay {
    fn default() -> Self {
        ExponentialDecay { base_p: 1.0, decay: 0.8, p_min: 0.01 }
    }
}

impl DecayPolicy for ExponentialDecay {
    fn probability(&self, failed_attempts: u32) -> f64 {
        let decayed = self.base_p * self.decay.powi(failed_attempts as i32);
        decayed.max(self.p_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_decreases_monotonically_with_failures() {
        let policy = ExponentialDecay::default();
        let p0 = policy.probability(0);
        let p1 = policy.probability(1);
        let p5 = policy.probability(5);
        assert!(p0 > p1);
        assert!(p1 > p5);
    }

    #[test]
    fn probability_never_drops_below_the_floor() {
        let policy = ExponentialDecay { base_p: 1.0, decay: 0.1, p_min: 0.05 };
        assert_eq!(policy.probability(100), 0.05);
    }

    #[test]
    fn zero_failures_returns_base_p_when_above_floor() {
        let policy = ExponentialDecay { base_p: 0.5, decay: 0.9, p_min: 0.01 };
        assert_eq!(policy.probability(0), 0.5);
    }
}
