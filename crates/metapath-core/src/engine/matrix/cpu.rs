//! Portable CPU backend on `nalgebra`.

use std::any::Any;
use std::borrow::Cow;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use super::{
    check_product, check_vector, pinv, AllocationLedger, LedgerEntry, Matrix, MatrixFactory,
    RawMatrix,
};
use crate::engine::errors::EngineError;

pub const NAME: &str = "nalgebra";

#[derive(Debug, Clone)]
pub struct NalgebraFactory {
    ledger: Arc<AllocationLedger>,
}

impl Default for NalgebraFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NalgebraFactory {
    pub fn new() -> Self {
        Self {
            ledger: AllocationLedger::new(),
        }
    }
}

fn wrap(ledger: &Arc<AllocationLedger>, data: DMatrix<f64>) -> Box<dyn Matrix> {
    let entry = ledger.register(data.nrows(), data.ncols());
    Box::new(NalgebraMatrix { data, entry })
}

fn from_raw_parts(raw: &RawMatrix) -> DMatrix<f64> {
    DMatrix::from_row_slice(raw.rows, raw.columns, &raw.data)
}

impl MatrixFactory for NalgebraFactory {
    fn name(&self) -> &'static str {
        NAME
    }

    fn ledger(&self) -> &Arc<AllocationLedger> {
        &self.ledger
    }

    fn from_raw(&self, raw: RawMatrix) -> Result<Box<dyn Matrix>, EngineError> {
        let raw = RawMatrix::new(raw.rows, raw.columns, raw.data)?;
        Ok(wrap(&self.ledger, from_raw_parts(&raw)))
    }

    fn zeros(&self, rows: usize, columns: usize) -> Box<dyn Matrix> {
        wrap(&self.ledger, DMatrix::zeros(rows, columns))
    }

    fn identity(&self, n: usize) -> Box<dyn Matrix> {
        wrap(&self.ledger, DMatrix::identity(n, n))
    }
}

#[derive(Debug)]
pub struct NalgebraMatrix {
    data: DMatrix<f64>,
    entry: LedgerEntry,
}

impl NalgebraMatrix {
    pub fn inner(&self) -> &DMatrix<f64> {
        &self.data
    }

    fn wrap(&self, data: DMatrix<f64>) -> Box<dyn Matrix> {
        wrap(self.entry.ledger(), data)
    }
}

/// Borrows a same-backend operand, copies anything else.
fn coerce(m: &dyn Matrix) -> Cow<'_, DMatrix<f64>> {
    match m.as_any().downcast_ref::<NalgebraMatrix>() {
        Some(n) => Cow::Borrowed(&n.data),
        None => Cow::Owned(from_raw_parts(&m.to_raw())),
    }
}

impl Matrix for NalgebraMatrix {
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
        self.data[(row, column)]
    }

    fn row(&self, row: usize) -> Vec<f64> {
        self.data.row(row).iter().copied().collect()
    }

    fn column(&self, column: usize) -> Vec<f64> {
        self.data.column(column).iter().copied().collect()
    }

    fn to_raw(&self) -> RawMatrix {
        // Column-major storage of the transpose is row-major storage of self.
        RawMatrix {
            rows: self.data.nrows(),
            columns: self.data.ncols(),
            data: self.data.transpose().as_slice().to_vec(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn transpose(&self) -> Box<dyn Matrix> {
        self.wrap(self.data.transpose())
    }

    fn pseudo_inverse(&self) -> Box<dyn Matrix> {
        self.wrap(pinv::pseudo_inverse(&self.data))
    }

    fn post_multiply(&self, rhs: &dyn Matrix) -> Result<Box<dyn Matrix>, EngineError> {
        check_product("post_multiply", self.data.shape(), (rhs.rows(), rhs.columns()))?;
        let rhs = coerce(rhs);
        Ok(self.wrap(&self.data * rhs.as_ref()))
    }

    fn pre_multiply(&self, lhs: &dyn Matrix) -> Result<Box<dyn Matrix>, EngineError> {
        check_product("pre_multiply", (lhs.rows(), lhs.columns()), self.data.shape())?;
        let lhs = coerce(lhs);
        Ok(self.wrap(lhs.as_ref() * &self.data))
    }

    fn post_multiply_vector(&self, v: &[f64]) -> Result<Vec<f64>, EngineError> {
        check_vector("post_multiply_vector", self.data.ncols(), v.len())?;
        let v = DVector::from_column_slice(v);
        Ok((&self.data * v).as_slice().to_vec())
    }

    fn pre_multiply_vector(&self, v: &[f64]) -> Result<Vec<f64>, EngineError> {
        check_vector("pre_multiply_vector", self.data.nrows(), v.len())?;
        let v = DVector::from_column_slice(v);
        Ok(self.data.tr_mul(&v).as_slice().to_vec())
    }

    fn apply(&self, f: &(dyn Fn(f64) -> f64 + Sync)) -> Box<dyn Matrix> {
        self.wrap(self.data.map(f))
    }

    fn apply_indexed(&self, f: &(dyn Fn(usize, usize, f64) -> f64 + Sync)) -> Box<dyn Matrix> {
        let (rows, columns) = self.data.shape();
        self.wrap(DMatrix::from_fn(rows, columns, |r, c| f(r, c, self.data[(r, c)])))
    }

    fn with_raw(&self, raw: RawMatrix) -> Result<Box<dyn Matrix>, EngineError> {
        let raw = RawMatrix::new(raw.rows, raw.columns, raw.data)?;
        Ok(self.wrap(from_raw_parts(&raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiply_orientation() {
        let f = NalgebraFactory::new();
        let a = f
            .from_raw(RawMatrix::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap())
            .unwrap();
        let b = f
            .from_raw(RawMatrix::new(2, 1, vec![1.0, 1.0]).unwrap())
            .unwrap();
        let ab = a.post_multiply(b.as_ref()).unwrap();
        assert_eq!(ab.column(0), vec![3.0, 7.0]);
        let ab2 = b.pre_multiply(a.as_ref()).unwrap();
        assert_eq!(ab2.to_raw(), ab.to_raw());
        assert!(a.pre_multiply(b.as_ref()).is_err());
    }

    #[test]
    fn vector_products() {
        let f = NalgebraFactory::new();
        let a = f
            .from_raw(RawMatrix::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap())
            .unwrap();
        assert_eq!(a.post_multiply_vector(&[1.0, 0.0, 1.0]).unwrap(), vec![4.0, 10.0]);
        assert_eq!(a.pre_multiply_vector(&[1.0, 1.0]).unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn raw_round_trip_keeps_row_major_order() {
        let f = NalgebraFactory::new();
        let raw = RawMatrix::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let m = f.from_raw(raw.clone()).unwrap();
        assert_eq!(m.get(1, 0), 4.0);
        assert_eq!(m.row(0), vec![1.0, 2.0, 3.0]);
        assert_eq!(m.to_raw(), raw);
        assert_eq!(m.transpose().get(2, 1), 6.0);
    }

    #[test]
    fn every_result_is_released() {
        let f = NalgebraFactory::new();
        {
            let a = f.identity(4);
            let b = a.apply(&|v| v * 2.0);
            let _c = b.pseudo_inverse();
            let _d = a.apply_indexed(&|r, c, v| if r == c { v - 1.0 } else { v });
            assert_eq!(f.live_matrices(), 4);
        }
        assert_eq!(f.live_matrices(), 0);
        assert_eq!(f.ledger().total(), 4);
    }
}
