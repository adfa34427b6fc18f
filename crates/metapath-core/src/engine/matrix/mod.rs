//! Backend-agnostic dense matrix contract.
//!
//! ## Architecture
//!
//! - **[`Matrix`]**: nearly-immutable dense `f64` matrix. Every operation returns a
//!   new matrix owned by the caller.
//! - **[`MatrixFactory`]**: creates matrices of one backend and owns the
//!   [`AllocationLedger`] every matrix of that backend reports to.
//! - **[`RawMatrix`]**: row-major exchange format. Conversions between backends
//!   and persistence always go through it.
//!
//! ## Backends
//!
//! - `nalgebra` ([`cpu::NalgebraFactory`]): portable CPU backend.
//! - `ndarray` ([`tensor::NdarrayFactory`]): tensor backend on matrixmultiply
//!   kernels.
//!
//! ## Memory
//!
//! Matrices release their buffers on drop, exactly once, on every exit path.
//! The ledger counts live matrices and bytes so callers (and tests) can check
//! that a run left nothing behind.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::errors::EngineError;

pub mod cpu;
pub mod pinv;
pub mod tensor;

pub use cpu::{NalgebraFactory, NalgebraMatrix};
pub use tensor::{NdarrayFactory, NdarrayMatrix};

/// Row-major dense matrix used to move data between backends and to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMatrix {
    pub rows: usize,
    pub columns: usize,
    pub data: Vec<f64>,
}

impl RawMatrix {
    pub fn new(rows: usize, columns: usize, data: Vec<f64>) -> Result<Self, EngineError> {
        if data.len() != rows * columns {
            return Err(EngineError::Matrix(format!(
                "raw matrix {}x{} needs {} values, got {}",
                rows,
                columns,
                rows * columns,
                data.len()
            )));
        }
        Ok(Self {
            rows,
            columns,
            data,
        })
    }

    pub fn zeros(rows: usize, columns: usize) -> Self {
        Self {
            rows,
            columns,
            data: vec![0.0; rows * columns],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut out = Self::zeros(n, n);
        for i in 0..n {
            out.data[i * n + i] = 1.0;
        }
        out
    }

    /// Builds a matrix whose columns are the given vectors.
    pub fn from_columns(columns: &[Vec<f64>]) -> Result<Self, EngineError> {
        let rows = columns.first().map_or(0, Vec::len);
        if columns.iter().any(|c| c.len() != rows) {
            return Err(EngineError::Matrix("columns of unequal length".into()));
        }
        let mut out = Self::zeros(rows, columns.len());
        for (j, column) in columns.iter().enumerate() {
            for (i, v) in column.iter().enumerate() {
                out.data[i * out.columns + j] = *v;
            }
        }
        Ok(out)
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.data[row * self.columns + column]
    }

    pub fn set(&mut self, row: usize, column: usize, value: f64) {
        self.data[row * self.columns + column] = value;
    }

    pub fn add_to(&mut self, row: usize, column: usize, delta: f64) {
        self.data[row * self.columns + column] += delta;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.columns..(row + 1) * self.columns]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        let columns = self.columns;
        &mut self.data[row * columns..(row + 1) * columns]
    }

    pub fn column(&self, column: usize) -> Vec<f64> {
        (0..self.rows).map(|r| self.get(r, column)).collect()
    }
}

/// Live-allocation accounting for one backend factory.
#[derive(Debug, Default)]
pub struct AllocationLedger {
    live: AtomicUsize,
    live_bytes: AtomicUsize,
    total: AtomicUsize,
}

impl AllocationLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Matrices currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    /// Matrices ever created.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub(crate) fn register(self: &Arc<Self>, rows: usize, columns: usize) -> LedgerEntry {
        let bytes = rows * columns * std::mem::size_of::<f64>();
        self.live.fetch_add(1, Ordering::AcqRel);
        self.live_bytes.fetch_add(bytes, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::AcqRel);
        LedgerEntry {
            ledger: Arc::clone(self),
            bytes,
        }
    }
}

/// Registration of one live matrix; deregisters on drop.
#[derive(Debug)]
pub struct LedgerEntry {
    ledger: Arc<AllocationLedger>,
    bytes: usize,
}

impl LedgerEntry {
    pub fn ledger(&self) -> &Arc<AllocationLedger> {
        &self.ledger
    }
}

impl Drop for LedgerEntry {
    fn drop(&mut self) {
        self.ledger.live.fetch_sub(1, Ordering::AcqRel);
        self.ledger.live_bytes.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// Dense `f64` matrix contract shared by every backend.
///
/// Multiplication naming: `a.post_multiply(b)` is `a × b`, `a.pre_multiply(b)`
/// is `b × a`. Operands of another backend are converted through
/// [`RawMatrix`]; the result always belongs to `self`'s backend.
pub trait Matrix: Send + Sync + fmt::Debug {
    fn backend(&self) -> &'static str;
    fn rows(&self) -> usize;
    fn columns(&self) -> usize;
    fn get(&self, row: usize, column: usize) -> f64;
    fn row(&self, row: usize) -> Vec<f64>;
    fn column(&self, column: usize) -> Vec<f64>;
    fn to_raw(&self) -> RawMatrix;
    fn as_any(&self) -> &dyn Any;

    fn transpose(&self) -> Box<dyn Matrix>;

    /// Moore–Penrose pseudo-inverse. Never fails; see [`pinv::pseudo_inverse`].
    fn pseudo_inverse(&self) -> Box<dyn Matrix>;

    /// `self × rhs`
    fn post_multiply(&self, rhs: &dyn Matrix) -> Result<Box<dyn Matrix>, EngineError>;

    /// `lhs × self`
    fn pre_multiply(&self, lhs: &dyn Matrix) -> Result<Box<dyn Matrix>, EngineError>;

    /// `self × v` for a column vector `v`.
    fn post_multiply_vector(&self, v: &[f64]) -> Result<Vec<f64>, EngineError>;

    /// `vᵀ × self` for a row vector `v`.
    fn pre_multiply_vector(&self, v: &[f64]) -> Result<Vec<f64>, EngineError>;

    /// Elementwise map.
    fn apply(&self, f: &(dyn Fn(f64) -> f64 + Sync)) -> Box<dyn Matrix>;

    /// Elementwise map with `(row, column)` coordinates.
    fn apply_indexed(&self, f: &(dyn Fn(usize, usize, f64) -> f64 + Sync)) -> Box<dyn Matrix>;

    /// Row-wise map. Every produced row must have the same length.
    fn apply_rows(
        &self,
        f: &(dyn Fn(usize, &[f64]) -> Vec<f64> + Sync),
    ) -> Result<Box<dyn Matrix>, EngineError> {
        let raw = self.to_raw();
        let mut data = Vec::with_capacity(raw.data.len());
        let mut width = None;
        for r in 0..raw.rows {
            let mapped = f(r, raw.row(r));
            match width {
                None => width = Some(mapped.len()),
                Some(w) if w != mapped.len() => {
                    return Err(EngineError::Matrix(format!(
                        "apply_rows: row {} has length {}, expected {}",
                        r,
                        mapped.len(),
                        w
                    )))
                }
                Some(_) => {}
            }
            data.extend(mapped);
        }
        let columns = width.unwrap_or(0);
        self.with_raw(RawMatrix::new(raw.rows, columns, data)?)
    }

    /// New matrix of this backend, sharing this matrix's ledger.
    fn with_raw(&self, raw: RawMatrix) -> Result<Box<dyn Matrix>, EngineError>;
}

/// Creates matrices of one backend.
pub trait MatrixFactory: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn ledger(&self) -> &Arc<AllocationLedger>;
    fn from_raw(&self, raw: RawMatrix) -> Result<Box<dyn Matrix>, EngineError>;
    fn zeros(&self, rows: usize, columns: usize) -> Box<dyn Matrix>;
    fn identity(&self, n: usize) -> Box<dyn Matrix>;

    /// Copies a matrix of any backend into this one.
    fn convert(&self, matrix: &dyn Matrix) -> Result<Box<dyn Matrix>, EngineError> {
        self.from_raw(matrix.to_raw())
    }

    fn live_matrices(&self) -> usize {
        self.ledger().live()
    }
}

pub(crate) fn check_product(
    op: &str,
    left: (usize, usize),
    right: (usize, usize),
) -> Result<(), EngineError> {
    if left.1 != right.0 {
        return Err(EngineError::Matrix(format!(
            "{}: cannot multiply {}x{} by {}x{}",
            op, left.0, left.1, right.0, right.1
        )));
    }
    Ok(())
}

pub(crate) fn check_vector(op: &str, expected: usize, got: usize) -> Result<(), EngineError> {
    if expected != got {
        return Err(EngineError::Matrix(format!(
            "{}: vector of length {} where {} was expected",
            op, got, expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_from_columns_is_row_major() {
        let raw = RawMatrix::from_columns(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]])
            .unwrap();
        assert_eq!(raw.rows, 2);
        assert_eq!(raw.columns, 3);
        assert_eq!(raw.row(0), &[1.0, 3.0, 5.0]);
        assert_eq!(raw.column(2), vec![5.0, 6.0]);
    }

    #[test]
    fn raw_rejects_wrong_length() {
        assert!(RawMatrix::new(2, 2, vec![1.0; 3]).is_err());
    }

    #[test]
    fn ledger_tracks_drop() {
        let ledger = AllocationLedger::new();
        let a = ledger.register(2, 2);
        let b = ledger.register(3, 1);
        assert_eq!(ledger.live(), 2);
        assert_eq!(ledger.live_bytes(), 7 * 8);
        drop(a);
        assert_eq!(ledger.live(), 1);
        drop(b);
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.total(), 2);
    }
}
