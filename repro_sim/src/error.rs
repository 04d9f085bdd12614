//! Error types for the harness.

use repro_core::PlotError;
use repro_env::EnvError;
use thiserror::Error;

/// Errors that abort a run or the whole harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The simulator failed (connection, step, sampling, ...)
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Vehicles were requested but the filtered catalog is empty
    #[error("No vehicle blueprint left after filtering")]
    NoBlueprints,

    #[error("Cannot evaluate an empty run set")]
    EmptyRunSet,

    /// A run cannot be compared position-by-position with run 0
    #[error("Run {run} does not match run 0: {detail}")]
    ShapeMismatch { run: usize, detail: String },

    #[error(transparent)]
    Plot(#[from] PlotError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
