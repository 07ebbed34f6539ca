use thiserror::Error;

/// Failure kinds surfaced by the experiment loop.
///
/// Everything here either aborts the run or is recovered into a well-defined
/// initial state by the caller; nothing is retried silently.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// The external evaluation produced no usable output (missing or empty
    /// force history, failed solver process). Fatal for the run.
    #[error("evaluation produced no usable solver output: {0}")]
    TransientEvaluation(String),

    /// The persisted log could not be replayed past a damaged data row.
    /// Recovered by the store: state restarts from iteration 0.
    #[error("resume corruption in {path} at line {line}: {detail}")]
    ResumeCorruption {
        path: String,
        line: usize,
        detail: String,
    },

    /// Surrogate regression could not be fit (degenerate training data,
    /// non-positive-definite covariance). Fatal, never retried.
    #[error("surrogate fit failed: {0}")]
    SurrogateFit(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
