//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    #[error("No active subscription for family")]
    SubscriptionRequired,

    #[error("No upgrade path from {from} to {to}")]
    UnknownUpgradePair { from: String, to: String },

    #[error("Webhook authentication failed")]
    WebhookAuthFailed,

    #[error("Malformed webhook payload: {0}")]
    WebhookMalformed(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Provider(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
