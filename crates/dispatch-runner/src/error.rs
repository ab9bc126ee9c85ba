//! Application error types.

use thiserror::Error;

/// Main application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] inference_client::DispatchError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] cost_ledger::LedgerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for application errors.
pub type AppResult<T> = Result<T, AppError>;
