//! Streaming median estimators.
//!
//! - [`ExactMedian`]: keeps every value, exact answer, O(n) memory.
//! - [`P2Median`]: Jain–Chlamtac P² estimator, five markers, O(1) memory.

use std::fmt;

/// Incremental median over a stream of values.
pub trait StreamingMedian: Send + fmt::Debug {
    fn push(&mut self, value: f64);

    /// Current median estimate, `NaN` when nothing has been pushed.
    fn median(&self) -> f64;

    fn count(&self) -> usize;
}

/// Creates fresh estimators, one per tracked slot.
pub trait MedianFactory: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn create(&self) -> Box<dyn StreamingMedian>;
}

/// Median of a slice, averaging the middle pair for even lengths.
pub fn exact_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExactMedian {
    values: Vec<f64>,
}

impl StreamingMedian for ExactMedian {
    fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    fn median(&self) -> f64 {
        exact_median(&self.values)
    }

    fn count(&self) -> usize {
        self.values.len()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMedianFactory;

impl MedianFactory for ExactMedianFactory {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn create(&self) -> Box<dyn StreamingMedian> {
        Box::new(ExactMedian::default())
    }
}

const P2_QUANTILE: f64 = 0.5;

/// P² median estimator.
///
/// The first five observations are stored verbatim; afterwards five marker
/// heights are adjusted with piecewise-parabolic interpolation.
#[derive(Debug, Clone)]
pub struct P2Median {
    heights: [f64; 5],
    positions: [f64; 5],
    desired: [f64; 5],
    increments: [f64; 5],
    count: usize,
}

impl Default for P2Median {
    fn default() -> Self {
        let p = P2_QUANTILE;
        Self {
            heights: [0.0; 5],
            positions: [0.0, 1.0, 2.0, 3.0, 4.0],
            desired: [0.0, 2.0 * p, 4.0 * p, 2.0 + 2.0 * p, 4.0],
            increments: [0.0, p / 2.0, p, (1.0 + p) / 2.0, 1.0],
            count: 0,
        }
    }
}

impl P2Median {
    fn parabolic(&self, i: usize, d: f64) -> f64 {
        let q = &self.heights;
        let n = &self.positions;
        q[i] + d / (n[i + 1] - n[i - 1])
            * ((n[i] - n[i - 1] + d) * (q[i + 1] - q[i]) / (n[i + 1] - n[i])
                + (n[i + 1] - n[i] - d) * (q[i] - q[i - 1]) / (n[i] - n[i - 1]))
    }

    fn linear(&self, i: usize, d: f64) -> f64 {
        let j = if d > 0.0 { i + 1 } else { i - 1 };
        self.heights[i]
            + d * (self.heights[j] - self.heights[i]) / (self.positions[j] - self.positions[i])
    }
}

impl StreamingMedian for P2Median {
    fn push(&mut self, value: f64) {
        if self.count < 5 {
            self.heights[self.count] = value;
            self.count += 1;
            if self.count == 5 {
                self.heights.sort_by(f64::total_cmp);
            }
            return;
        }
        self.count += 1;

        let k = if value < self.heights[0] {
            self.heights[0] = value;
            0
        } else if value >= self.heights[4] {
            self.heights[4] = value;
            3
        } else {
            (1..5)
                .find(|&i| value < self.heights[i])
                .map_or(3, |i| i - 1)
        };

        for position in &mut self.positions[k + 1..] {
            *position += 1.0;
        }
        for (desired, inc) in self.desired.iter_mut().zip(self.increments.iter()) {
            *desired += inc;
        }

        for i in 1..4 {
            let d = self.desired[i] - self.positions[i];
            let room_up = self.positions[i + 1] - self.positions[i] > 1.0;
            let room_down = self.positions[i - 1] - self.positions[i] < -1.0;
            if (d >= 1.0 && room_up) || (d <= -1.0 && room_down) {
                let step = d.signum();
                let candidate = self.parabolic(i, step);
                self.heights[i] =
                    if self.heights[i - 1] < candidate && candidate < self.heights[i + 1] {
                        candidate
                    } else {
                        self.linear(i, step)
                    };
                self.positions[i] += step;
            }
        }
    }

    fn median(&self) -> f64 {
        if self.count <= 5 {
            exact_median(&self.heights[..self.count])
        } else {
            self.heights[2]
        }
    }

    fn count(&self) -> usize {
        self.count
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct P2MedianFactory;

impl MedianFactory for P2MedianFactory {
    fn name(&self) -> &'static str {
        "p2"
    }

    fn create(&self) -> Box<dyn StreamingMedian> {
        Box::new(P2Median::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn exact_median_handles_parity() {
        assert!(exact_median(&[]).is_nan());
        assert_eq!(exact_median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(exact_median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn p2_is_exact_for_small_streams() {
        let mut m = P2Median::default();
        for v in [5.0, 1.0, 4.0] {
            m.push(v);
        }
        assert_eq!(m.median(), 4.0);
        assert_eq!(m.count(), 3);
    }

    #[test]
    fn p2_tracks_uniform_median() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut p2 = P2Median::default();
        let mut exact = ExactMedian::default();
        for _ in 0..5_000 {
            let v: f64 = rng.gen_range(-10.0..10.0);
            p2.push(v);
            exact.push(v);
        }
        assert!((p2.median() - exact.median()).abs() < 0.3);
    }

    #[test]
    fn factories_produce_fresh_estimators() {
        let f = P2MedianFactory;
        let mut a = f.create();
        a.push(1.0);
        assert_eq!(f.create().count(), 0);
        assert_eq!(ExactMedianFactory.name(), "exact");
    }
}
