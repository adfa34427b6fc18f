//! Tensor backend on `ndarray`.
//!
//! Products run on ndarray's matrixmultiply kernels. Decompositions go through
//! [`pinv::pseudo_inverse`] on a temporary nalgebra copy.

use std::any::Any;
use std::borrow::Cow;
use std::sync::Arc;

use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView1};

use super::{
    check_product, check_vector, pinv, AllocationLedger, LedgerEntry, Matrix, MatrixFactory,
    RawMatrix,
};
use crate::engine::errors::EngineError;

pub const NAME: &str = "ndarray";

#[derive(Debug, Clone)]
pub struct NdarrayFactory {
    ledger: Arc<AllocationLedger>,
}

impl Default for NdarrayFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NdarrayFactory {
    pub fn new() -> Self {
        Self {
            ledger: AllocationLedger::new(),
        }
    }
}

fn wrap(ledger: &Arc<AllocationLedger>, data: Array2<f64>) -> Box<dyn Matrix> {
    let (rows, columns) = data.dim();
    let entry = ledger.register(rows, columns);
    Box::new(NdarrayMatrix { data, entry })
}

fn array_from_raw(raw: RawMatrix) -> Result<Array2<f64>, EngineError> {
    Array2::from_shape_vec((raw.rows, raw.columns), raw.data)
        .map_err(|e| EngineError::Matrix(format!("ndarray shape: {}", e)))
}

impl MatrixFactory for NdarrayFactory {
    fn name(&self) -> &'static str {
        NAME
    }

    fn ledger(&self) -> &Arc<AllocationLedger> {
        &self.ledger
    }

    fn from_raw(&self, raw: RawMatrix) -> Result<Box<dyn Matrix>, EngineError> {
        Ok(wrap(&self.ledger, array_from_raw(raw)?))
    }

    fn zeros(&self, rows: usize, columns: usize) -> Box<dyn Matrix> {
        wrap(&self.ledger, Array2::zeros((rows, columns)))
    }

    fn identity(&self, n: usize) -> Box<dyn Matrix> {
        wrap(&self.ledger, Array2::eye(n))
    }
}

#[derive(Debug)]
pub struct NdarrayMatrix {
    data: Array2<f64>,
    entry: LedgerEntry,
}

impl NdarrayMatrix {
    pub fn inner(&self) -> &Array2<f64> {
        &self.data
    }

    fn wrap(&self, data: Array2<f64>) -> Box<dyn Matrix> {
        wrap(self.entry.ledger(), data)
    }
}

fn coerce(m: &dyn Matrix) -> Result<Cow<'_, Array2<f64>>, EngineError> {
    match m.as_any().downcast_ref::<NdarrayMatrix>() {
        Some(n) => Ok(Cow::Borrowed(&n.data)),
        None => Ok(Cow::Owned(array_from_raw(m.to_raw())?)),
    }
}

impl Matrix for NdarrayMatrix {
    fn backend(&self) -> &'static str {
        NAME
    }

    fn rows(&self) -> usize {
        self.data.nrows()
    }

    fn columns(&self) -> usize {
        self.data.ncols()
    }

    fn get(&self, row: usize, column: usize) -> f64 {
        self.data[[row, column]]
    }

    fn row(&self, row: usize) -> Vec<f64> {
        self.data.row(row).to_vec()
    }

    fn column(&self, column: usize) -> Vec<f64> {
        self.data.column(column).to_vec()
    }

    fn to_raw(&self) -> RawMatrix {
        RawMatrix {
            rows: self.data.nrows(),
            columns: self.data.ncols(),
            data: self.data.iter().copied().collect(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn transpose(&self) -> Box<dyn Matrix> {
        self.wrap(self.data.t().to_owned())
    }

    fn pseudo_inverse(&self) -> Box<dyn Matrix> {
        let (rows, columns) = self.data.dim();
        let dense = DMatrix::from_fn(rows, columns, |r, c| self.data[[r, c]]);
        let p = pinv::pseudo_inverse(&dense);
        let (prows, pcolumns) = p.shape();
        self.wrap(Array2::from_shape_fn((prows, pcolumns), |(r, c)| p[(r, c)]))
    }

    fn post_multiply(&self, rhs: &dyn Matrix) -> Result<Box<dyn Matrix>, EngineError> {
        check_product("post_multiply", self.data.dim(), (rhs.rows(), rhs.columns()))?;
        let rhs = coerce(rhs)?;
        Ok(self.wrap(self.data.dot(rhs.as_ref())))
    }

    fn pre_multiply(&self, lhs: &dyn Matrix) -> Result<Box<dyn Matrix>, EngineError> {
        check_product("pre_multiply", (lhs.rows(), lhs.columns()), self.data.dim())?;
        let lhs = coerce(lhs)?;
        Ok(self.wrap(lhs.dot(&self.data)))
    }

    fn post_multiply_vector(&self, v: &[f64]) -> Result<Vec<f64>, EngineError> {
        check_vector("post_multiply_vector", self.data.ncols(), v.len())?;
        Ok(self.data.dot(&ArrayView1::from(v)).to_vec())
    }

    fn pre_multiply_vector(&self, v: &[f64]) -> Result<Vec<f64>, EngineError> {
        check_vector("pre_multiply_vector", self.data.nrows(), v.len())?;
        Ok(ArrayView1::from(v).dot(&self.data).to_vec())
    }

    fn apply(&self, f: &(dyn Fn(f64) -> f64 + Sync)) -> Box<dyn Matrix> {
        self.wrap(self.data.mapv(f))
    }

    fn apply_indexed(&self, f: &(dyn Fn(usize, usize, f64) -> f64 + Sync)) -> Box<dyn Matrix> {
        self.wrap(Array2::from_shape_fn(self.data.dim(), |(r, c)| {
            f(r, c, self.data[[r, c]])
        }))
    }

    fn with_raw(&self, raw: RawMatrix) -> Result<Box<dyn Matrix>, EngineError> {
        Ok(self.wrap(array_from_raw(raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::matrix::NalgebraFactory;

    #[test]
    fn identity_and_products() {
        let f = NdarrayFactory::new();
        let i = f.identity(3);
        let m = f
            .from_raw(RawMatrix::new(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap())
            .unwrap();
        assert_eq!(i.post_multiply(m.as_ref()).unwrap().to_raw(), m.to_raw());
        assert_eq!(m.pre_multiply_vector(&[1.0, 0.0, 1.0]).unwrap(), vec![6.0, 8.0]);
    }

    #[test]
    fn mixed_backend_operands_convert() {
        let nd = NdarrayFactory::new();
        let na = NalgebraFactory::new();
        let a = nd
            .from_raw(RawMatrix::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap())
            .unwrap();
        let b = na.identity(2);
        let c = a.post_multiply(b.as_ref()).unwrap();
        assert_eq!(c.backend(), NAME);
        assert_eq!(c.to_raw(), a.to_raw());
    }

    #[test]
    fn pseudo_inverse_matches_inverse() {
        let f = NdarrayFactory::new();
        let a = f
            .from_raw(RawMatrix::new(2, 2, vec![2.0, 0.0, 0.0, 4.0]).unwrap())
            .unwrap();
        let p = a.pseudo_inverse();
        assert!((p.get(0, 0) - 0.5).abs() < 1e-12);
        assert!((p.get(1, 1) - 0.25).abs() < 1e-12);
        drop((a, p));
        assert_eq!(f.live_matrices(), 0);
    }
}
