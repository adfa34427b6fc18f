//! P-value combination.
//!
//! Every combiner ignores `NaN` inputs. With no usable value the result is
//! `NaN`; with exactly one it is that value.

use std::fmt;

use super::distributions::{binomial_upper_tail, chi_square_sf_even, normal_quantile, normal_sf};
use crate::engine::errors::EngineError;

pub trait PValueCombiner: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Combines two or more p-values. Callers go through [`PValueCombiner::combine`].
    fn combine_many(&self, p_values: &[f64]) -> f64;

    fn combine(&self, p_values: &[f64]) -> f64 {
        let usable: Vec<f64> = p_values.iter().copied().filter(|p| !p.is_nan()).collect();
        match usable.len() {
            0 => f64::NAN,
            1 => usable[0],
            _ => self.combine_many(&usable),
        }
    }
}

/// Fisher's method: `−2 Σ ln p ~ χ²(2k)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fisher;

impl PValueCombiner for Fisher {
    fn name(&self) -> &'static str {
        "fisher"
    }

    fn combine_many(&self, p_values: &[f64]) -> f64 {
        let statistic: f64 = p_values
            .iter()
            .map(|p| -2.0 * p.max(f64::MIN_POSITIVE).ln())
            .sum();
        chi_square_sf_even(statistic, 2 * p_values.len() as u64)
    }
}

/// Stouffer's Z: `Σ Φ⁻¹(1 − p) / √k`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stouffer;

impl PValueCombiner for Stouffer {
    fn name(&self) -> &'static str {
        "stouffer"
    }

    fn combine_many(&self, p_values: &[f64]) -> f64 {
        let z: f64 = p_values
            .iter()
            .map(|p| normal_quantile(1.0 - p.clamp(1e-300, 1.0 - 1e-16)))
            .sum::<f64>()
            / (p_values.len() as f64).sqrt();
        normal_sf(z)
    }
}

/// Tippett/Wilkinson minimum: `1 − (1 − min p)^k`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wilkinson;

impl PValueCombiner for Wilkinson {
    fn name(&self) -> &'static str {
        "wilkinson"
    }

    fn combine_many(&self, p_values: &[f64]) -> f64 {
        let min = p_values.iter().copied().fold(1.0_f64, f64::min);
        // -expm1(k * ln1p(-min)) keeps precision for tiny `min`.
        -((p_values.len() as f64) * (-min).ln_1p()).exp_m1()
    }
}

/// Vote counting: probability of at least as many p-values below `threshold`
/// under the null.
#[derive(Debug, Clone, Copy)]
pub struct VoteCounting {
    threshold: f64,
}

impl VoteCounting {
    pub const DEFAULT_THRESHOLD: f64 = 0.05;

    pub fn new(threshold: f64) -> Result<Self, EngineError> {
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(EngineError::Config(format!(
                "vote_counting_threshold must lie in (0, 1), got {}",
                threshold
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for VoteCounting {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }
}

impl PValueCombiner for VoteCounting {
    fn name(&self) -> &'static str {
        "vote-counting"
    }

    fn combine_many(&self, p_values: &[f64]) -> f64 {
        let votes = p_values.iter().filter(|&&p| p < self.threshold).count() as u64;
        binomial_upper_tail(votes, p_values.len() as u64, self.threshold)
    }
}
