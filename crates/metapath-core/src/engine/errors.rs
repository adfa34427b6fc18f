//! Error types for propagation and simulation runs.

use thiserror::Error;

/// Errors that can occur while building, propagating, or testing perturbations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in the future without breaking changes.
///
/// Data-sparsity conditions (a constrained node missing from the graph, a
/// combiner fed a single p-value, an uncoverable target) are recovered where
/// they occur and never surface here.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or missing run parameter, reported before any heavy computation.
    #[error("configuration error: {0}")]
    Config(String),

    /// A named strategy (weight function, backend, combiner, ...) is not registered.
    #[error("strategy not found: no {kind} named '{name}'")]
    StrategyNotFound { kind: &'static str, name: String },

    /// Structural problem in a graph or repository (duplicate pathway id, ...).
    #[error("graph error: {0}")]
    Graph(String),

    /// Numerical invariant violation. Always fatal for the run.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Dimension mismatch or malformed matrix exchange data.
    #[error("matrix error: {0}")]
    Matrix(String),

    /// Persistence failure (cache directory, result output).
    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    /// Any error annotated with the stage it happened in.
    #[error("{stage}: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<EngineError>,
    },

    /// Internal engine error (programmer error, not user error).
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Wraps the error with the stage that produced it.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        EngineError::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping stage annotations.
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extension for annotating `Result`s with the failing stage.
pub trait StageContext<T> {
    fn stage(self, stage: impl Into<String>) -> Result<T, EngineError>;
    fn stage_with<F, S>(self, stage: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> StageContext<T> for Result<T, EngineError> {
    fn stage(self, stage: impl Into<String>) -> Result<T, EngineError> {
        self.map_err(|e| e.in_stage(stage))
    }

    fn stage_with<F, S>(self, stage: F) -> Result<T, EngineError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.in_stage(stage()))
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapping_keeps_root_cause() {
        let err = EngineError::Numerical("p-value 1.2 > 1".into())
            .in_stage("batch 2 of 5")
            .in_stage("experiment 'liver'");
        assert_eq!(
            err.to_string(),
            "experiment 'liver': batch 2 of 5: numerical error: p-value 1.2 > 1"
        );
        assert!(matches!(err.root(), EngineError::Numerical(_)));
    }

    #[test]
    fn strategy_not_found_names_kind_and_name() {
        let err = EngineError::StrategyNotFound {
            kind: "p-value combiner",
            name: "magic".into(),
        };
        assert_eq!(
            err.to_string(),
            "strategy not found: no p-value combiner named 'magic'"
        );
    }
}
