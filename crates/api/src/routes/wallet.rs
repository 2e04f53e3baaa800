//! Family wallet routes

use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::{Action, AuthContext, Module},
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub(crate) enum WalletRequest {
    Topup {
        /// Amount in whole currency units
        amount: i64,
        return_url: String,
    },
}

/// GET /wallet - balance and recent transactions
pub async fn wallet_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Value>> {
    let scope = ctx.require_family()?;
    ctx.require(Module::Finance, Action::View)?;

    let balance = state.wallet.balance(scope.family_id).await?;
    let transactions = state.wallet.history(scope.family_id, 50).await?;

    Ok(Json(json!({
        "balance": balance,
        "transactions": transactions,
    })))
}

/// POST /wallet - start a donation payment that credits the wallet
pub async fn wallet_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<WalletRequest>,
) -> ApiResult<Json<Value>> {
    let scope = ctx.require_family()?;
    ctx.require(Module::Finance, Action::Create)?;

    match request {
        WalletRequest::Topup { amount, return_url } => {
            if amount <= 0 {
                return Err(ApiError::Validation(
                    "topup amount must be positive".to_string(),
                ));
            }
            let email: Option<Option<String>> =
                sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
                    .bind(scope.user_id)
                    .fetch_optional(&state.pool)
                    .await?;

            let topup = state
                .webhooks
                .start_topup(
                    scope.family_id,
                    scope.user_id,
                    amount * 100,
                    &state.config.payment_currency,
                    &return_url,
                    email.flatten(),
                )
                .await?;

            Ok(Json(json!({
                "payment_url": topup.payment_url,
                "payment_id": topup.payment_id,
                "amount": amount,
            })))
        }
    }
}
