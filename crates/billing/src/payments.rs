//! Payment records
//!
//! Row-level helpers shared by the subscription engine and the webhook
//! dispatcher. A payment is a money-movement record linked to a subscription,
//! or standalone for wallet topups (donations).

use serde_json::json;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use hearth_shared::{PaymentAction, PaymentStatus};

use crate::error::BillingResult;
use crate::provider::{PaymentMetadata, ProviderKind};

/// One row of the `payments` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub family_id: Uuid,
    pub user_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub provider: String,
    pub provider_payment_id: String,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub paid_at: Option<OffsetDateTime>,
}

impl PaymentRow {
    /// Action tag carried in the provider metadata; defaults to `create` for
    /// rows written before the tag existed.
    pub fn action(&self) -> PaymentAction {
        self.metadata
            .get("action")
            .and_then(|v| v.as_str())
            .and_then(PaymentAction::parse)
            .unwrap_or(PaymentAction::Create)
    }
}

/// Insert a pending payment inside an open transaction
#[allow(clippy::too_many_arguments)]
pub(crate) async fn insert_pending(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    subscription_id: Option<Uuid>,
    provider: ProviderKind,
    provider_payment_id: &str,
    amount_minor: i64,
    currency: &str,
    description: &str,
    metadata: &PaymentMetadata,
) -> BillingResult<Uuid> {
    let metadata_json = json!({
        "family_id": metadata.family_id,
        "user_id": metadata.user_id,
        "plan_id": metadata.plan_id,
        "action": metadata.action.as_str(),
    });

    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO payments
            (subscription_id, family_id, user_id, amount_minor, currency,
             provider, provider_payment_id, status, description, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9)
        RETURNING id
        "#,
    )
    .bind(subscription_id)
    .bind(metadata.family_id)
    .bind(metadata.user_id)
    .bind(amount_minor)
    .bind(currency)
    .bind(provider.as_str())
    .bind(provider_payment_id)
    .bind(description)
    .bind(metadata_json)
    .fetch_one(&mut **tx)
    .await?;

    Ok(id)
}

/// Lock a payment row by the provider's payment id. Returns None for payments
/// the domain does not own.
pub(crate) async fn lock_by_provider_id(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    provider_payment_id: &str,
) -> BillingResult<Option<PaymentRow>> {
    let row: Option<PaymentRow> = sqlx::query_as(
        r#"
        SELECT id, subscription_id, family_id, user_id, amount_minor, currency,
               provider, provider_payment_id, status, payment_method,
               description, metadata, created_at, paid_at
        FROM payments
        WHERE provider_payment_id = $1
        FOR UPDATE
        "#,
    )
    .bind(provider_payment_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row)
}

/// Lock a payment row by our own id
pub(crate) async fn lock_by_id(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payment_id: Uuid,
) -> BillingResult<Option<PaymentRow>> {
    let row: Option<PaymentRow> = sqlx::query_as(
        r#"
        SELECT id, subscription_id, family_id, user_id, amount_minor, currency,
               provider, provider_payment_id, status, payment_method,
               description, metadata, created_at, paid_at
        FROM payments
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(payment_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row)
}

/// Non-locking fetch by our own id
pub async fn fetch_by_id(pool: &PgPool, payment_id: Uuid) -> BillingResult<Option<PaymentRow>> {
    let row: Option<PaymentRow> = sqlx::query_as(
        r#"
        SELECT id, subscription_id, family_id, user_id, amount_minor, currency,
               provider, provider_payment_id, status, payment_method,
               description, metadata, created_at, paid_at
        FROM payments
        WHERE id = $1
        "#,
    )
    .bind(payment_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Mark a locked payment paid
pub(crate) async fn mark_paid(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payment_id: Uuid,
    payment_method: Option<&str>,
) -> BillingResult<()> {
    sqlx::query(
        "UPDATE payments SET status = 'paid', paid_at = NOW(), payment_method = COALESCE($2, payment_method) WHERE id = $1",
    )
    .bind(payment_id)
    .bind(payment_method)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
