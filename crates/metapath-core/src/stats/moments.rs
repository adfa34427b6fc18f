//! Single-pass moments and sign buckets.

use serde::{Deserialize, Serialize};

/// Welford running mean and variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OnlineMoments {
    count: u64,
    mean: f64,
    m2: f64,
}

impl OnlineMoments {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Chan et al. parallel merge.
    pub fn merge(&mut self, other: &OnlineMoments) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        self.mean += delta * other.count as f64 / total as f64;
        self.m2 += other.m2 + delta * delta * (self.count as f64 * other.count as f64) / total as f64;
        self.count = total;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Unbiased sample variance; 0 with fewer than two values.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}

/// Sign classification of perturbation values around an `ε` dead-zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignBuckets {
    pub activation: u64,
    pub inhibition: u64,
    pub no_change: u64,
}

impl SignBuckets {
    pub fn push(&mut self, value: f64, epsilon: f64) {
        if value > epsilon {
            self.activation += 1;
        } else if value < -epsilon {
            self.inhibition += 1;
        } else {
            self.no_change += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.activation + self.inhibition + self.no_change
    }
}
