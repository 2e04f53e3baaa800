// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge case and seed scenario tests for the billing core
//!
//! Pure-logic tests run everywhere; end-to-end scenarios against Postgres are
//! marked `#[ignore]` and expect DATABASE_URL plus a mock provider server.

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use hearth_shared::{PlanId, SpendReason, TxnKind};

use crate::provider::{ProviderClient, YooKassaClient};
use crate::subscriptions::{CreateOutcome, SubscriptionService};
use crate::wallet::WalletService;
use crate::webhooks::WebhookDispatcher;

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    hearth_shared::db::create_pool(&url).await.unwrap()
}

async fn seed_family(pool: &PgPool) -> (Uuid, Uuid) {
    let user_id: Uuid = sqlx::query_scalar("INSERT INTO users (email) VALUES ($1) RETURNING id")
        .bind(format!("billing-{}@test.local", Uuid::new_v4()))
        .fetch_one(pool)
        .await
        .unwrap();
    let family_id: Uuid =
        sqlx::query_scalar("INSERT INTO families (name) VALUES ('Billing family') RETURNING id")
            .fetch_one(pool)
            .await
            .unwrap();
    (family_id, user_id)
}

/// Provider client pointed at a mockito server that accepts every payment
/// creation with a fixed provider payment id.
fn mock_provider(server_url: &str) -> ProviderClient {
    ProviderClient::Yookassa(YooKassaClient::new(
        reqwest::Client::new(),
        "shop".to_string(),
        "secret".to_string(),
        server_url.to_string(),
    ))
}

fn create_payment_mock(server: &mut mockito::ServerGuard, provider_payment_id: &str) -> mockito::Mock {
    server
        .mock("POST", "/payments")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": provider_payment_id,
                "status": "pending",
                "paid": false,
                "confirmation": { "confirmation_url": "https://pay.test/confirm" }
            })
            .to_string(),
        )
        .create()
}

fn succeeded_webhook_body(
    provider_payment_id: &str,
    family_id: Uuid,
    user_id: Uuid,
    plan: PlanId,
    action: &str,
    value: &str,
) -> String {
    json!({
        "event": "payment.succeeded",
        "object": {
            "id": provider_payment_id,
            "status": "succeeded",
            "paid": true,
            "amount": { "value": value, "currency": "RUB" },
            "payment_method": { "type": "bank_card" },
            "metadata": {
                "family_id": family_id.to_string(),
                "user_id": user_id.to_string(),
                "plan_id": plan.as_str(),
                "action": action
            }
        }
    })
    .to_string()
}

// =============================================================================
// S1: simple purchase - create, webhook, active status with 30 days left
// =============================================================================
#[tokio::test]
#[ignore] // Requires database
async fn s1_simple_purchase_activates_on_webhook() {
    let pool = test_pool().await;
    let (family_id, user_id) = seed_family(&pool).await;
    let mut server = mockito::Server::new_async().await;
    let ppid = format!("yk-{}", Uuid::new_v4());
    let _m = create_payment_mock(&mut server, &ppid);

    let provider = mock_provider(&server.url());
    let subs = SubscriptionService::new(pool.clone(), provider.clone(), "RUB".to_string());
    let dispatcher = WebhookDispatcher::new(pool.clone(), provider, None);

    let outcome = subs
        .create(family_id, user_id, PlanId::AiAssistant, "https://app.test/back", false, None)
        .await
        .unwrap();
    let created = match outcome {
        CreateOutcome::Created(c) => c,
        CreateOutcome::Conflict(_) => panic!("fresh family must not conflict"),
    };
    assert_eq!(created.payment_url, "https://pay.test/confirm");
    assert_eq!(created.amount_minor, 20_000);

    let body =
        succeeded_webhook_body(&ppid, family_id, user_id, PlanId::AiAssistant, "create", "200.00");
    let result = dispatcher.handle(&body, None).await.unwrap();
    assert!(result.received);
    assert_eq!(result.activated, Some(true));

    let status = subs.status(family_id).await.unwrap();
    assert!(status.has_subscription);
    let current = status.current.unwrap();
    assert_eq!(current.plan, PlanId::AiAssistant);
    assert_eq!(current.days_left, 30);
}

// =============================================================================
// S2: duplicate purchase blocked without force, allowed with force
// =============================================================================
#[tokio::test]
#[ignore] // Requires database
async fn s2_duplicate_purchase_conflicts_unless_forced() {
    let pool = test_pool().await;
    let (family_id, user_id) = seed_family(&pool).await;
    let mut server = mockito::Server::new_async().await;
    let ppid = format!("yk-{}", Uuid::new_v4());
    let _m = create_payment_mock(&mut server, &ppid);

    let provider = mock_provider(&server.url());
    let subs = SubscriptionService::new(pool.clone(), provider.clone(), "RUB".to_string());
    let dispatcher = WebhookDispatcher::new(pool.clone(), provider, None);

    subs.create(family_id, user_id, PlanId::AiAssistant, "https://app.test", false, None)
        .await
        .unwrap();
    let body =
        succeeded_webhook_body(&ppid, family_id, user_id, PlanId::AiAssistant, "create", "200.00");
    dispatcher.handle(&body, None).await.unwrap();

    let second = subs
        .create(family_id, user_id, PlanId::AiAssistant, "https://app.test", false, None)
        .await
        .unwrap();
    match second {
        CreateOutcome::Conflict(conflict) => {
            assert!(conflict.extend_available);
            assert!(conflict.upgrade_available);
            assert_eq!(conflict.current.plan, PlanId::AiAssistant);
        }
        CreateOutcome::Created(_) => panic!("duplicate purchase must conflict without force"),
    }

    server.reset_async().await;
    let ppid2 = format!("yk-{}", Uuid::new_v4());
    let _m2 = create_payment_mock(&mut server, &ppid2);
    let forced = subs
        .create(family_id, user_id, PlanId::AiAssistant, "https://app.test", true, None)
        .await
        .unwrap();
    assert!(matches!(forced, CreateOutcome::Created(_)));
}

// =============================================================================
// S6: webhook replay is a no-op after the first activation
// =============================================================================
#[tokio::test]
#[ignore] // Requires database
async fn s6_webhook_replay_is_idempotent() {
    let pool = test_pool().await;
    let (family_id, user_id) = seed_family(&pool).await;
    let mut server = mockito::Server::new_async().await;
    let ppid = format!("yk-{}", Uuid::new_v4());
    let _m = create_payment_mock(&mut server, &ppid);

    let provider = mock_provider(&server.url());
    let subs = SubscriptionService::new(pool.clone(), provider.clone(), "RUB".to_string());
    let dispatcher = WebhookDispatcher::new(pool.clone(), provider, None);

    subs.create(family_id, user_id, PlanId::AiAssistant, "https://app.test", false, None)
        .await
        .unwrap();
    let body =
        succeeded_webhook_body(&ppid, family_id, user_id, PlanId::AiAssistant, "create", "200.00");

    let first = dispatcher.handle(&body, None).await.unwrap();
    assert_eq!(first.activated, Some(true));

    let second = dispatcher.handle(&body, None).await.unwrap();
    assert!(second.received);
    assert_eq!(second.activated, None, "replay must not re-activate");

    let active_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM subscriptions WHERE family_id = $1 AND status = 'active'",
    )
    .bind(family_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(active_count, 1);

    let paid_at_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM payments WHERE provider_payment_id = $1 AND status = 'paid' AND paid_at IS NOT NULL",
    )
    .bind(&ppid)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(paid_at_count, 1);
}

// =============================================================================
// Topup webhook credits the wallet exactly once
// =============================================================================
#[tokio::test]
#[ignore] // Requires database
async fn topup_webhook_credits_wallet_once() {
    let pool = test_pool().await;
    let (family_id, user_id) = seed_family(&pool).await;
    let mut server = mockito::Server::new_async().await;
    let ppid = format!("yk-{}", Uuid::new_v4());
    let _m = create_payment_mock(&mut server, &ppid);

    let provider = mock_provider(&server.url());
    let dispatcher = WebhookDispatcher::new(pool.clone(), provider, None);
    let wallet = WalletService::new(pool.clone());

    dispatcher
        .start_topup(family_id, user_id, 10_000, "RUB", "https://app.test", None)
        .await
        .unwrap();

    let body = json!({
        "event": "payment.succeeded",
        "object": {
            "id": ppid,
            "paid": true,
            "status": "succeeded",
            "amount": { "value": "100.00", "currency": "RUB" },
            "metadata": {
                "family_id": family_id.to_string(),
                "user_id": user_id.to_string(),
                "action": "topup"
            }
        }
    })
    .to_string();

    dispatcher.handle(&body, None).await.unwrap();
    dispatcher.handle(&body, None).await.unwrap();

    assert_eq!(wallet.balance(family_id).await.unwrap(), 100);
    let rows = wallet.history(family_id, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, TxnKind::Topup.as_str());
    assert_eq!(rows[0].reason, SpendReason::TopupDonation.as_str());
}

// =============================================================================
// Webhook auth: configured shared secret rejects mismatches
// =============================================================================
#[tokio::test]
#[ignore] // Requires database
async fn webhook_shared_secret_is_enforced() {
    let pool = test_pool().await;
    let server = mockito::Server::new_async().await;
    let provider = mock_provider(&server.url());
    let dispatcher =
        WebhookDispatcher::new(pool, provider, Some("hook-secret".to_string()));

    let body = json!({"event": "payment.succeeded", "object": {"id": "x", "metadata": {}}});
    let denied = dispatcher.handle(&body.to_string(), Some("wrong")).await;
    assert!(denied.is_err());

    let missing = dispatcher.handle(&body.to_string(), None).await;
    assert!(missing.is_err());
}
