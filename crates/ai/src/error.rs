//! AI subsystem error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("Blob storage error: {0}")]
    Storage(String),

    #[error("Failed to parse generation output: {0}")]
    Parse(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Billing error: {0}")]
    Billing(#[from] hearth_billing::BillingError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AiError {
    fn from(err: sqlx::Error) -> Self {
        AiError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        AiError::Provider(err.to_string())
    }
}

pub type AiResult<T> = Result<T, AiError>;
