//! Multiple-testing p-value adjustment.
//!
//! `NaN` entries are left in place and do not count toward the number of tests.

use std::fmt;

pub trait PValueAdjuster: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn adjust(&self, p_values: &[f64]) -> Vec<f64>;
}

/// Indices of the finite entries, sorted by ascending p-value.
fn ranked(p_values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..p_values.len())
        .filter(|&i| !p_values[i].is_nan())
        .collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));
    order
}

/// Step-down (Holm-like): running maximum in ascending order.
fn step_down(p_values: &[f64], factor: impl Fn(usize, usize) -> f64) -> Vec<f64> {
    let order = ranked(p_values);
    let m = order.len();
    let mut out = p_values.to_vec();
    let mut running = 0.0_f64;
    for (rank, &i) in order.iter().enumerate() {
        running = running.max((factor(rank, m) * p_values[i]).min(1.0));
        out[i] = running;
    }
    out
}

/// Step-up (Hochberg/BH-like): running minimum in descending order.
fn step_up(p_values: &[f64], factor: impl Fn(usize, usize) -> f64) -> Vec<f64> {
    let order = ranked(p_values);
    let m = order.len();
    let mut out = p_values.to_vec();
    let mut running = 1.0_f64;
    for (rank, &i) in order.iter().enumerate().rev() {
        running = running.min((factor(rank, m) * p_values[i]).min(1.0));
        out[i] = running;
    }
    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdjustment;

impl PValueAdjuster for NoAdjustment {
    fn name(&self) -> &'static str {
        "none"
    }

    fn adjust(&self, p_values: &[f64]) -> Vec<f64> {
        p_values.to_vec()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Bonferroni;

impl PValueAdjuster for Bonferroni {
    fn name(&self) -> &'static str {
        "bonferroni"
    }

    fn adjust(&self, p_values: &[f64]) -> Vec<f64> {
        let m = p_values.iter().filter(|p| !p.is_nan()).count() as f64;
        p_values
            .iter()
            .map(|&p| if p.is_nan() { p } else { (p * m).min(1.0) })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Holm;

impl PValueAdjuster for Holm {
    fn name(&self) -> &'static str {
        "holm"
    }

    fn adjust(&self, p_values: &[f64]) -> Vec<f64> {
        step_down(p_values, |rank, m| (m - rank) as f64)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Hochberg;

impl PValueAdjuster for Hochberg {
    fn name(&self) -> &'static str {
        "hochberg"
    }

    fn adjust(&self, p_values: &[f64]) -> Vec<f64> {
        step_up(p_values, |rank, m| (m - rank) as f64)
    }
}

/// Benjamini–Hochberg false discovery rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BenjaminiHochberg;

impl PValueAdjuster for BenjaminiHochberg {
    fn name(&self) -> &'static str {
        "bh"
    }

    fn adjust(&self, p_values: &[f64]) -> Vec<f64> {
        step_up(p_values, |rank, m| m as f64 / (rank + 1) as f64)
    }
}

/// Benjamini–Yekutieli, valid under arbitrary dependence.
#[derive(Debug, Clone, Copy, Default)]
pub struct BenjaminiYekutieli;

impl PValueAdjuster for BenjaminiYekutieli {
    fn name(&self) -> &'static str {
        "by"
    }

    fn adjust(&self, p_values: &[f64]) -> Vec<f64> {
        let m = p_values.iter().filter(|p| !p.is_nan()).count();
        let harmonic: f64 = (1..=m).map(|k| 1.0 / k as f64).sum();
        step_up(p_values, |rank, m| harmonic * m as f64 / (rank + 1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: [f64; 5] = [0.01, 0.04, 0.03, 0.005, 0.5];

    fn assert_vec(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-12, "{:?} vs {:?}", actual, expected);
        }
    }

    #[test]
    fn bonferroni_caps_at_one() {
        assert_vec(&Bonferroni.adjust(&P), &[0.05, 0.2, 0.15, 0.025, 1.0]);
    }

    #[test]
    fn holm_reference() {
        // sorted: 0.005*5, 0.01*4, 0.03*3, 0.04*2, 0.5*1
        assert_vec(&Holm.adjust(&P), &[0.04, 0.09, 0.09, 0.025, 0.5]);
    }

    #[test]
    fn hochberg_reference() {
        assert_vec(&Hochberg.adjust(&P), &[0.04, 0.08, 0.08, 0.025, 0.5]);
    }

    #[test]
    fn bh_reference() {
        // sorted ranks 1..5: 0.025, 0.025, 0.05, 0.05, 0.5
        assert_vec(
            &BenjaminiHochberg.adjust(&P),
            &[0.025, 0.05, 0.05, 0.025, 0.5],
        );
    }

    #[test]
    fn by_is_at_least_bh() {
        let bh = BenjaminiHochberg.adjust(&P);
        let by = BenjaminiYekutieli.adjust(&P);
        assert!(bh.iter().zip(&by).all(|(a, b)| b >= a));
    }

    #[test]
    fn nan_entries_stay_put() {
        let out = Bonferroni.adjust(&[0.1, f64::NAN, 0.2]);
        assert!(out[1].is_nan());
        assert_vec(&[out[0], out[2]], &[0.2, 0.4]);
        assert_eq!(NoAdjustment.adjust(&[0.3]), vec![0.3]);
    }
}
