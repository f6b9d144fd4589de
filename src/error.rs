//! Error type shared by every module of the crate.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PplError>;

#[derive(Debug, Error)]
pub enum PplError {
    #[error("Invalid {distribution} parameters: {reason}")]
    InvalidParameter {
        distribution: &'static str,
        reason: String,
    },

    #[error("Empirical distribution is empty")]
    EmptyEmpirical,

    #[error("Trace has no controlled variables to propose from")]
    NoControlledVariables,

    #[error("Chain mismatch: {0}")]
    ChainMismatch(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Plotting failed: {0}")]
    Plot(String),
}
