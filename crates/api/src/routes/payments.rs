//! Payment and subscription routes
//!
//! `POST /payments` is a multiplexer: a body carrying `event` and `object`
//! is a provider webhook (no bearer auth, optional shared secret); anything
//! else is an authorized action dispatched on its `action` tag.

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use hearth_billing::{Activation, CreateOutcome};
use hearth_shared::{PaymentAction, PlanId};

use crate::{
    auth::{self, Action, Module},
    error::{ApiError, ApiResult},
    notify::{Audience, Category, NotificationIntent},
    state::AppState,
};

/// Header a provider callback may carry the shared secret in
const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum PaymentRequest {
    Create {
        plan_type: String,
        return_url: String,
        #[serde(default)]
        force: bool,
    },
    Extend {
        return_url: String,
    },
    Upgrade {
        plan_type: String,
        return_url: String,
    },
    CheckPayment {
        payment_id: Uuid,
    },
}

/// POST /payments
pub async fn payments_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let value: Value = serde_json::from_str(&body)
        .map_err(|e| ApiError::Validation(format!("malformed JSON body: {e}")))?;

    // A webhook envelope is distinguished by its `event` + `object` fields
    if value.get("event").is_some() && value.get("object").is_some() {
        return handle_webhook(&state, &headers, &body).await;
    }
    if value.get("Status").is_some() && value.get("PaymentId").is_some() {
        return handle_webhook(&state, &headers, &body).await;
    }

    let ctx = auth::authenticate(&state.pool, &headers).await?;
    let scope = ctx.require_family()?;
    let request: PaymentRequest = serde_json::from_value(value)
        .map_err(|e| ApiError::Validation(format!("unknown payment action: {e}")))?;

    match request {
        PaymentRequest::Create {
            plan_type,
            return_url,
            force,
        } => {
            ctx.require(Module::Finance, Action::Create)?;
            let plan = PlanId::parse(&plan_type)
                .ok_or_else(|| ApiError::Validation(format!("Unknown plan: {plan_type}")))?;
            let email = user_email(&state, scope.user_id).await?;

            let outcome = state
                .subscriptions
                .create(scope.family_id, scope.user_id, plan, &return_url, force, email)
                .await?;
            match outcome {
                CreateOutcome::Created(created) => Ok(Json(json!({
                    "payment_url": created.payment_url,
                    "payment_id": created.payment_id,
                    "plan": created.plan,
                    "amount": minor_to_units(created.amount_minor),
                }))),
                CreateOutcome::Conflict(conflict) => {
                    Err(ApiError::ActiveSubscriptionExists(Box::new(conflict)))
                }
            }
        }
        PaymentRequest::Extend { return_url } => {
            ctx.require(Module::Finance, Action::Create)?;
            let email = user_email(&state, scope.user_id).await?;
            let extended = state
                .subscriptions
                .extend(scope.family_id, scope.user_id, &return_url, email)
                .await?;
            Ok(Json(json!({
                "payment_url": extended.payment_url,
                "payment_id": extended.payment_id,
                "new_end_date": rfc3339(extended.new_end_date),
                "plan": extended.plan,
                "amount": minor_to_units(extended.amount_minor),
            })))
        }
        PaymentRequest::Upgrade {
            plan_type,
            return_url,
        } => {
            ctx.require(Module::Finance, Action::Create)?;
            let plan = PlanId::parse(&plan_type)
                .ok_or_else(|| ApiError::Validation(format!("Unknown plan: {plan_type}")))?;
            let email = user_email(&state, scope.user_id).await?;
            let upgraded = state
                .subscriptions
                .upgrade(scope.family_id, scope.user_id, plan, &return_url, email)
                .await?;
            Ok(Json(json!({
                "payment_url": upgraded.payment_url,
                "payment_id": upgraded.payment_id,
                "plan": upgraded.plan,
                "amount": minor_to_units(upgraded.amount_minor),
                "refund": minor_to_units(upgraded.refund_minor),
                "original_price": minor_to_units(upgraded.original_price_minor),
            })))
        }
        PaymentRequest::CheckPayment { payment_id } => {
            ctx.require(Module::Finance, Action::View)?;
            let result = state.subscriptions.check_payment(payment_id).await?;
            if let Some(activation) = &result.activation {
                notify_activation(&state, activation);
            }
            Ok(Json(json!({
                "status": result.status,
                "paid": result.paid,
            })))
        }
    }
}

async fn handle_webhook(
    state: &AppState,
    headers: &HeaderMap,
    raw_body: &str,
) -> ApiResult<Json<Value>> {
    let presented_secret = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.webhooks.handle(raw_body, presented_secret).await?;

    if let Some(activation) = &outcome.activation {
        notify_activation(state, activation);
    }

    let mut response = json!({ "received": outcome.received });
    if let Some(activated) = outcome.activated {
        response["activated"] = json!(activated);
    }
    Ok(Json(response))
}

/// Fire-and-forget notification after a settled payment; failures never
/// propagate to the provider response.
fn notify_activation(state: &AppState, activation: &Activation) {
    let intent = match activation {
        Activation::SubscriptionActivated {
            family_id,
            plan_id,
            action,
            ..
        } => {
            let title = match action {
                PaymentAction::Extend => "Subscription renewed".to_string(),
                PaymentAction::Upgrade => "Subscription upgraded".to_string(),
                _ => "Subscription activated".to_string(),
            };
            NotificationIntent {
                audience: Audience::Family(*family_id),
                category: Category::Subscription,
                title,
                body: format!("Plan {} is now active.", plan_id.display_name()),
                target_url: None,
            }
        }
        Activation::WalletToppedUp {
            family_id,
            credited,
            ..
        } => NotificationIntent {
            audience: Audience::Family(*family_id),
            category: Category::Wallet,
            title: "Wallet topped up".to_string(),
            body: format!("The family wallet received {credited} credits."),
            target_url: None,
        },
        Activation::AlreadySettled => return,
    };

    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        notifier.dispatch(&intent).await;
    });
}

/// GET /payments - current subscription status read model
pub async fn payments_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let ctx = auth::authenticate(&state.pool, &headers).await?;
    let scope = ctx.require_family()?;
    ctx.require(Module::Finance, Action::View)?;

    let status = state.subscriptions.status(scope.family_id).await?;
    if !status.has_subscription {
        return Ok(Json(json!({
            "has_subscription": false,
            "plan": "free",
        })));
    }

    let current = status.current.as_ref().ok_or(ApiError::Internal)?;
    Ok(Json(json!({
        "has_subscription": true,
        "plan": current.plan,
        "status": current.status,
        "end_date": rfc3339(current.end_date),
        "days_left": current.days_left,
        "plans": status.plans,
        "buyer_user_id": status.buyer_user_id,
        "buyer_email": status.buyer_email,
    })))
}

async fn user_email(state: &AppState, user_id: Uuid) -> ApiResult<Option<String>> {
    let email: Option<Option<String>> =
        sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&state.pool)
            .await?;
    Ok(email.flatten())
}

fn minor_to_units(amount_minor: i64) -> f64 {
    amount_minor as f64 / 100.0
}

fn rfc3339(dt: time::OffsetDateTime) -> String {
    dt.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn action_tags_deserialize() {
        let create: PaymentRequest = serde_json::from_value(json!({
            "action": "create", "plan_type": "ai_assistant", "return_url": "https://r"
        }))
        .unwrap();
        assert!(matches!(create, PaymentRequest::Create { force: false, .. }));

        let check: PaymentRequest = serde_json::from_value(json!({
            "action": "check_payment", "payment_id": Uuid::new_v4()
        }))
        .unwrap();
        assert!(matches!(check, PaymentRequest::CheckPayment { .. }));
    }

    #[test]
    fn minor_units_render_as_currency() {
        assert_eq!(minor_to_units(36_667), 366.67);
        assert_eq!(minor_to_units(20_000), 200.0);
    }
}
