//! Pseudo-inverse with graceful degradation.
//!
//! Strategy cascade:
//!
//! 1. square input: LU inverse, accepted only when `A·A⁻¹ ≈ I`;
//! 2. SVD pseudo-inverse with a relative singular-value cutoff;
//! 3. Tikhonov-regularized normal equations `(AᵀA + λI)⁻¹Aᵀ`;
//! 4. zero matrix of the transposed shape, with an error logged.

use nalgebra::{DMatrix, SVD};

/// Relative residual accepted for the direct inverse.
const DIRECT_RESIDUAL_TOLERANCE: f64 = 1e-9;
/// Base Tikhonov regularization, scaled by the mean diagonal of `AᵀA`.
const TIKHONOV_LAMBDA: f64 = 1e-10;
/// Largest `‖A‖ₘₐₓ·‖A⁻¹‖ₘₐₓ` accepted from the direct inverse.
const MAX_DIRECT_CONDITION: f64 = 1e12;

/// Moore–Penrose pseudo-inverse of `m`. Returns a `columns × rows` matrix.
pub fn pseudo_inverse(m: &DMatrix<f64>) -> DMatrix<f64> {
    let (rows, columns) = m.shape();
    if rows == 0 || columns == 0 {
        return DMatrix::zeros(columns, rows);
    }

    if rows == columns {
        if let Some(inverse) = direct_inverse(m) {
            return inverse;
        }
    }

    if let Some(p) = svd_pseudo_inverse(m) {
        return p;
    }

    #[cfg(feature = "tracing")]
    tracing::warn!(rows, columns, "SVD pseudo-inverse failed, falling back to Tikhonov");

    if let Some(p) = tikhonov_pseudo_inverse(m) {
        return p;
    }

    #[cfg(feature = "tracing")]
    tracing::error!(
        rows,
        columns,
        "every pseudo-inverse strategy failed, returning a zero matrix"
    );
    DMatrix::zeros(columns, rows)
}

fn all_finite(m: &DMatrix<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}

fn direct_inverse(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let inverse = m.clone().try_inverse()?;
    if !all_finite(&inverse) {
        return None;
    }
    let n = m.nrows();
    let residual = (m * &inverse - DMatrix::<f64>::identity(n, n)).amax();
    let scale = m.amax().max(1.0) * inverse.amax().max(1.0);
    if m.amax() * inverse.amax() > MAX_DIRECT_CONDITION {
        return None;
    }
    (residual <= DIRECT_RESIDUAL_TOLERANCE * scale * n as f64).then_some(inverse)
}

fn svd_pseudo_inverse(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let svd = SVD::try_new(m.clone(), true, true, f64::EPSILON, 0)?;
    let sigma_max = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    let cutoff = f64::EPSILON * m.nrows().max(m.ncols()) as f64 * sigma_max;
    let p = svd.pseudo_inverse(cutoff).ok()?;
    all_finite(&p).then_some(p)
}

fn tikhonov_pseudo_inverse(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let mt = m.transpose();
    let gram = &mt * m;
    let n = gram.nrows();
    let mean_diagonal = gram.trace() / n as f64;
    let lambda = TIKHONOV_LAMBDA * mean_diagonal.max(1.0);
    let regularized = gram + DMatrix::<f64>::identity(n, n) * lambda;
    let p = regularized.try_inverse()? * mt;
    all_finite(&p).then_some(p)
}
