//! Statistics kernels shared by the simulation engines.
//!
//! ## Architecture
//!
//! - **median**: streaming median estimators behind [`median::MedianFactory`]
//! - **moments**: Welford moments and sign buckets
//! - **distributions**: normal, chi-square, hypergeometric and binomial tails
//! - **adjust**: multiple-testing adjusters behind [`adjust::PValueAdjuster`]
//! - **combine**: p-value combiners behind [`combine::PValueCombiner`]
//!
//! Estimators are plain values owned by a run; concurrency control belongs to
//! the caller.

pub mod adjust;
pub mod combine;
pub mod distributions;
pub mod median;
pub mod moments;

pub use adjust::PValueAdjuster;
pub use combine::PValueCombiner;
pub use median::{MedianFactory, StreamingMedian};
pub use moments::{OnlineMoments, SignBuckets};

use crate::engine::errors::EngineError;

/// Smallest p-value reported for `repetitions` resamples.
pub fn p_value_floor(repetitions: usize) -> f64 {
    1.0 / (repetitions as f64 * 100.0)
}

/// Empirical p-value `max(count / repetitions, 1 / (repetitions·100))`.
///
/// A result above 1 means more exceedances than resamples were counted, which
/// is a bookkeeping defect and aborts the run.
pub fn empirical_p_value(count: u64, repetitions: usize) -> Result<f64, EngineError> {
    if repetitions == 0 {
        return Err(EngineError::Internal(
            "empirical p-value requested with zero repetitions".into(),
        ));
    }
    let p = (count as f64 / repetitions as f64).max(p_value_floor(repetitions));
    if p > 1.0 {
        return Err(EngineError::Numerical(format!(
            "p-value {} exceeds 1 ({} exceedances over {} repetitions)",
            p, count, repetitions
        )));
    }
    Ok(p)
}
