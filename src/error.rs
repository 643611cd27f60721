//! Error types for the CRPT client.

use thiserror::Error;

use crate::api::SubmitError;
use crate::gate::GateError;

/// Main error type for client operations.
#[derive(Error, Debug)]
pub enum CrptError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Admission was refused or the gate failed to close cleanly
    #[error(transparent)]
    Gate(#[from] GateError),

    /// The registration endpoint rejected or never received the document
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, CrptError>;
