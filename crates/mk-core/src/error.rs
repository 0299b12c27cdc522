//! Error types for modelkit.

use thiserror::Error;

/// modelkit error type.
///
/// Variants map onto the framework's single-character failure-code
/// convention via [`Error::code`]; fitted models can also carry a
/// non-fatal error mark (see `Model::error`).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed input (dimension mismatch, empty data, bad option value).
    #[error("validation error: {0}")]
    Validation(String),

    /// Singular or infeasible numeric computation (singular design matrix,
    /// zero/NaN density, non-finite objective).
    #[error("computation error: {0}")]
    Computation(String),

    /// Structural mismatch: missing settings group, missing sub-model,
    /// absent or unset parameters where a fitted model is required.
    #[error("structural error: {0}")]
    Structural(String),

    /// Capability absent or configuration not supported by this family.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Bad observation-weight vector (e.g. non-finite total mass).
    #[error("weight error: {0}")]
    Weight(String),
}

impl Error {
    /// The single-character failure code for this error.
    pub fn code(&self) -> char {
        match self {
            Error::Validation(_) => 'v',
            Error::Computation(_) => 'f',
            Error::Structural(_) => 's',
            Error::Unsupported(_) => 'c',
            Error::Weight(_) => 'w',
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
