//! API error types and handling
//!
//! Every error maps to a machine-readable flat body: `{"error": "<tag>",
//! "message": "...", ...hints}`. Business conflicts carry recovery hints;
//! internal errors never expose details beyond an opaque message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use hearth_ai::AiError;
use hearth_billing::subscriptions::ActiveSubscriptionConflict;
use hearth_billing::BillingError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,

    // Validation
    #[error("Validation error: {0}")]
    Validation(String),

    // Resources
    #[error("Resource not found")]
    NotFound,
    #[error("Resource already exists")]
    Conflict(String),
    #[error("No family membership")]
    NoFamily,

    // Billing conflicts
    #[error("Family already has an active subscription")]
    ActiveSubscriptionExists(Box<ActiveSubscriptionConflict>),
    #[error("No active subscription")]
    SubscriptionRequired,
    #[error("No upgrade path from {from} to {to}")]
    UnknownUpgradePair { from: String, to: String },

    // Wallet
    #[error("Insufficient wallet funds")]
    InsufficientFunds { balance: i64, required: i64 },

    // Upstream
    #[error("Upstream provider error: {0}")]
    Provider(String),

    // Internal
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    fn status_and_body(&self) -> (StatusCode, Value) {
        match self {
            ApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                json!({"error": "invalid_credentials", "message": self.to_string()}),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({"error": "unauthorized", "message": self.to_string()}),
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                json!({"error": "forbidden", "message": self.to_string()}),
            ),
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({"error": "validation_error", "message": msg}),
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({"error": "not_found", "message": self.to_string()}),
            ),
            ApiError::Conflict(msg) => (
                StatusCode::CONFLICT,
                json!({"error": "conflict", "message": msg}),
            ),
            ApiError::NoFamily => (
                StatusCode::BAD_REQUEST,
                json!({"error": "no_family", "message": "Join or create a family first"}),
            ),
            ApiError::ActiveSubscriptionExists(conflict) => (
                StatusCode::CONFLICT,
                json!({
                    "error": "active_subscription_exists",
                    "extend_available": conflict.extend_available,
                    "upgrade_available": conflict.upgrade_available,
                    "current": conflict.current,
                }),
            ),
            ApiError::SubscriptionRequired => (
                StatusCode::CONFLICT,
                json!({"error": "subscription_required", "message": self.to_string()}),
            ),
            ApiError::UnknownUpgradePair { from, to } => (
                StatusCode::CONFLICT,
                json!({"error": "unknown_upgrade_pair", "from": from, "to": to}),
            ),
            ApiError::InsufficientFunds { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                json!({"error": "insufficient_funds", "balance": balance, "required": required}),
            ),
            ApiError::Provider(msg) => (
                StatusCode::BAD_GATEWAY,
                json!({"error": "provider_error", "message": truncate(msg, 256)}),
            ),
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "internal_error", "message": "Database error"}),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "internal_error", "message": self.to_string()}),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // PostgreSQL unique violation
                    if code == "23505" {
                        return ApiError::Conflict("Resource already exists".to_string());
                    }
                }
                ApiError::Database(db_err.to_string())
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Provider(msg) => ApiError::Provider(msg),
            BillingError::UnknownPlan(plan) => {
                ApiError::Validation(format!("Unknown plan: {plan}"))
            }
            BillingError::SubscriptionRequired => ApiError::SubscriptionRequired,
            BillingError::UnknownUpgradePair { from, to } => {
                ApiError::UnknownUpgradePair { from, to }
            }
            BillingError::WebhookAuthFailed => ApiError::Unauthorized,
            BillingError::WebhookMalformed(msg) => ApiError::Validation(msg),
            BillingError::PaymentNotFound(_) => ApiError::NotFound,
            BillingError::InvalidAmount(msg) => ApiError::Validation(msg),
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::Internal(_) => ApiError::Internal,
        }
    }
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::Provider(msg) | AiError::Storage(msg) => ApiError::Provider(msg),
            AiError::Parse(msg) => ApiError::Provider(msg),
            AiError::UnknownOperation(_) => ApiError::NotFound,
            AiError::Database(msg) => ApiError::Database(msg),
            AiError::Billing(inner) => inner.into(),
            AiError::Internal(_) => ApiError::Internal,
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_funds_carries_balance_and_required() {
        let (status, body) = ApiError::InsufficientFunds {
            balance: 5,
            required: 17,
        }
        .status_and_body();
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"], "insufficient_funds");
        assert_eq!(body["balance"], 5);
        assert_eq!(body["required"], 17);
    }

    #[test]
    fn unknown_upgrade_pair_is_a_conflict() {
        let (status, body) = ApiError::UnknownUpgradePair {
            from: "full".to_string(),
            to: "ai_assistant".to_string(),
        }
        .status_and_body();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "unknown_upgrade_pair");
    }

    #[test]
    fn provider_errors_map_to_bad_gateway() {
        let (status, _) = ApiError::from(BillingError::Provider("boom".to_string()))
            .status_and_body();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}
