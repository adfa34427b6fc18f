//! Batched bootstrap pipeline shared by impact analysis and phenotype simulation.
//!
//! ## Architecture
//!
//! - **Generation**: a [`ColumnGenerator`] produces input columns in order.
//!   Global column 0 is always the observed (reference) input.
//! - **Propagation**: each batch `X` (nodes × columns) is pushed through the
//!   node operator `M` and the pathway operator `Bᵀ(M − I)`, giving node
//!   perturbations, node accumulators `MX − X` and pathway accumulators.
//! - **Reduction**: a [`ColumnReducer`] folds every column into its streaming
//!   state. Columns of a batch are reduced in parallel; the observed column is
//!   handed to [`ColumnReducer::observe`] first, before anything else.
//!
//! Batches run strictly in sequence. Matrices created for a batch are dropped
//! before the next one starts.
//!
//! ## Feature gating
//!
//! Parallel column reduction is behind the `parallel` feature. Without it,
//! columns are reduced sequentially.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::engine::errors::{EngineError, StageContext};
use crate::engine::matrix::{Matrix, RawMatrix};

/// Column-major view of one propagated batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    /// Global index of local column 0.
    pub first_column: usize,
    pub inputs: Vec<Vec<f64>>,
    pub node_perturbation: Vec<Vec<f64>>,
    pub node_accumulator: Vec<Vec<f64>>,
    pub pathway_accumulator: Vec<Vec<f64>>,
}

impl BatchOutput {
    pub fn columns(&self) -> usize {
        self.inputs.len()
    }

    pub fn global(&self, local: usize) -> usize {
        self.first_column + local
    }
}

/// Produces input columns, one per global column index, in increasing order.
pub trait ColumnGenerator {
    fn generate(&mut self, column: usize) -> Result<Vec<f64>, EngineError>;
}

/// Streaming reduction of propagated columns.
pub trait ColumnReducer: Sync {
    /// Receives the batch holding global column 0, before any `reduce` call.
    fn observe(&mut self, batch: &BatchOutput) -> Result<(), EngineError>;

    /// Folds one local column. May run concurrently for different columns.
    fn reduce(&self, batch: &BatchOutput, local: usize) -> Result<(), EngineError>;
}

/// Node operator `M` plus pathway operator `Bᵀ (M − I)`.
#[derive(Debug)]
pub struct PropagationOperators<'a> {
    node: &'a dyn Matrix,
    pathway: Box<dyn Matrix>,
}

impl<'a> PropagationOperators<'a> {
    /// `membership` is the node × pathway matrix.
    pub fn new(node: &'a dyn Matrix, membership: &dyn Matrix) -> Result<Self, EngineError> {
        let accumulator = node.apply_indexed(&|r, c, v| if r == c { v - 1.0 } else { v });
        let pathway = accumulator.pre_multiply(membership.transpose().as_ref())?;
        Ok(Self { node, pathway })
    }

    pub fn node(&self) -> &dyn Matrix {
        self.node
    }

    pub fn pathway(&self) -> &dyn Matrix {
        self.pathway.as_ref()
    }

    /// Propagates the columns of `inputs` (nodes × columns).
    pub fn propagate(&self, first_column: usize, inputs: RawMatrix) -> Result<BatchOutput, EngineError> {
        let x = self.node.with_raw(inputs)?;
        let perturbation = x.pre_multiply(self.node)?.to_raw();
        let pathway = x.pre_multiply(self.pathway.as_ref())?.to_raw();
        let inputs = x.to_raw();

        let node_perturbation = columns_of(&perturbation);
        let input_columns = columns_of(&inputs);
        let node_accumulator = node_perturbation
            .iter()
            .zip(&input_columns)
            .map(|(p, x)| p.iter().zip(x).map(|(p, x)| p - x).collect())
            .collect();

        Ok(BatchOutput {
            first_column,
            inputs: input_columns,
            node_perturbation,
            node_accumulator,
            pathway_accumulator: columns_of(&pathway),
        })
    }
}

fn columns_of(raw: &RawMatrix) -> Vec<Vec<f64>> {
    let mut out = vec![Vec::with_capacity(raw.rows); raw.columns];
    for r in 0..raw.rows {
        for (c, v) in raw.row(r).iter().enumerate() {
            out[c].push(*v);
        }
    }
    out
}

/// Sequential batch driver with parallel per-column reduction.
pub struct BootstrapEngine<'a> {
    operators: PropagationOperators<'a>,
    batch_size: usize,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl<'a> BootstrapEngine<'a> {
    /// `threads == None` reduces on the global rayon pool.
    pub fn new(
        operators: PropagationOperators<'a>,
        batch_size: usize,
        threads: Option<usize>,
    ) -> Result<Self, EngineError> {
        if batch_size == 0 {
            return Err(EngineError::Config("batch_size must be > 0".into()));
        }
        #[cfg(feature = "parallel")]
        let pool = match threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| EngineError::Internal(format!("thread pool: {}", e)))?,
            ),
            None => None,
        };
        #[cfg(not(feature = "parallel"))]
        let _ = threads;
        Ok(Self {
            operators,
            batch_size,
            #[cfg(feature = "parallel")]
            pool,
        })
    }

    pub fn operators(&self) -> &PropagationOperators<'a> {
        &self.operators
    }

    /// Runs `total_columns` columns through the pipeline.
    ///
    /// Errors are tagged with the failing batch (`"batch 3 of 10"`).
    pub fn run<G, R>(
        &self,
        total_columns: usize,
        generator: &mut G,
        reducer: &mut R,
    ) -> Result<(), EngineError>
    where
        G: ColumnGenerator,
        R: ColumnReducer,
    {
        let batches = total_columns.div_ceil(self.batch_size);
        #[cfg(feature = "tracing")]
        let report_every = (batches / 10).max(1);

        for b in 0..batches {
            let first = b * self.batch_size;
            let columns = self.batch_size.min(total_columns - first);
            self.run_batch(first, columns, generator, reducer)
                .stage_with(|| format!("batch {} of {}", b + 1, batches))?;

            #[cfg(feature = "tracing")]
            if (b + 1) % report_every == 0 || b + 1 == batches {
                tracing::info!(batch = b + 1, batches, "bootstrap progress");
            }
        }
        Ok(())
    }

    fn run_batch<G, R>(
        &self,
        first: usize,
        columns: usize,
        generator: &mut G,
        reducer: &mut R,
    ) -> Result<(), EngineError>
    where
        G: ColumnGenerator,
        R: ColumnReducer,
    {
        let inputs = (first..first + columns)
            .map(|c| generator.generate(c))
            .collect::<Result<Vec<_>, _>>()?;
        let batch = self
            .operators
            .propagate(first, RawMatrix::from_columns(&inputs)?)?;
        drop(inputs);
        if first == 0 {
            reducer.observe(&batch)?;
        }
        self.reduce_columns(&batch, reducer)
    }

    #[cfg(feature = "parallel")]
    fn reduce_columns<R: ColumnReducer>(
        &self,
        batch: &BatchOutput,
        reducer: &R,
    ) -> Result<(), EngineError> {
        let work = || {
            (0..batch.columns())
                .into_par_iter()
                .try_for_each(|c| reducer.reduce(batch, c))
        };
        match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn reduce_columns<R: ColumnReducer>(
        &self,
        batch: &BatchOutput,
        reducer: &R,
    ) -> Result<(), EngineError> {
        (0..batch.columns()).try_for_each(|c| reducer.reduce(batch, c))
    }
}
