//! Subscription state machine
//!
//! Subscriptions move pending -> active on a paid webhook, active -> upgraded
//! when a replacement plan activates, and active -> expired/cancelled via the
//! sweeper or an explicit cancel. All transitions for a family serialize on
//! row locks taken over the family's active subscription set.

use serde::Serialize;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use hearth_shared::{PaymentAction, PlanId, SpendReason, SubscriptionStatus, TxnKind};

use crate::error::{BillingError, BillingResult};
use crate::payments::{self, PaymentRow};
use crate::provider::{CreatePayment, PaymentMetadata, ProviderClient};
use crate::wallet;

/// One row of the `subscriptions` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub family_id: Uuid,
    pub user_id: Uuid,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub amount_minor: i64,
    pub start_date: Option<OffsetDateTime>,
    pub end_date: OffsetDateTime,
    pub auto_renew: bool,
    pub provider: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Read-model view of an active subscription
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionView {
    pub plan: PlanId,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub end_date: OffsetDateTime,
    pub days_left: i64,
    pub amount_minor: i64,
}

impl SubscriptionView {
    fn from_row(row: &Subscription, now: OffsetDateTime) -> Self {
        Self {
            plan: row.plan_id,
            status: row.status,
            end_date: row.end_date,
            days_left: days_left_ceil(row.end_date, now),
            amount_minor: row.amount_minor,
        }
    }
}

/// Family-level subscription status: the primary view (latest end_date) plus
/// every active plan; multi-plan families hold one entry per plan_id.
#[derive(Debug, Clone, Serialize)]
pub struct FamilySubscriptionStatus {
    pub has_subscription: bool,
    pub current: Option<SubscriptionView>,
    pub plans: Vec<SubscriptionView>,
    pub buyer_user_id: Option<Uuid>,
    pub buyer_email: Option<String>,
}

/// Why a create call was refused
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSubscriptionConflict {
    pub current: SubscriptionView,
    pub extend_available: bool,
    pub upgrade_available: bool,
}

/// Result of a create call
#[derive(Debug)]
pub enum CreateOutcome {
    Created(CreatedSubscriptionPayment),
    Conflict(ActiveSubscriptionConflict),
}

/// A pending subscription waiting on its confirmation payment
#[derive(Debug, Clone, Serialize)]
pub struct CreatedSubscriptionPayment {
    pub payment_id: Uuid,
    pub payment_url: String,
    pub plan: PlanId,
    pub amount_minor: i64,
}

/// Result of an extend call
#[derive(Debug, Clone, Serialize)]
pub struct ExtendedSubscriptionPayment {
    pub payment_id: Uuid,
    pub payment_url: String,
    pub plan: PlanId,
    pub amount_minor: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub new_end_date: OffsetDateTime,
}

/// Result of an upgrade call
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeSubscriptionPayment {
    /// None when proration covered the full price and the upgrade activated
    /// without a payment
    pub payment_id: Option<Uuid>,
    pub payment_url: Option<String>,
    pub plan: PlanId,
    pub amount_minor: i64,
    pub refund_minor: i64,
    pub original_price_minor: i64,
}

/// What a settled payment did; the caller fires notifications from this after
/// the transaction commits.
#[derive(Debug, Clone)]
pub enum Activation {
    SubscriptionActivated {
        subscription_id: Uuid,
        family_id: Uuid,
        user_id: Uuid,
        plan_id: PlanId,
        action: PaymentAction,
    },
    WalletToppedUp {
        family_id: Uuid,
        user_id: Uuid,
        credited: i64,
    },
    /// Payment was already paid; replay acknowledged with no effect
    AlreadySettled,
}

/// Result of a check_payment poll
#[derive(Debug, Clone, Serialize)]
pub struct CheckPaymentResult {
    pub status: String,
    pub paid: bool,
    #[serde(skip)]
    pub activation: Option<Activation>,
}

/// Subscription service
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
    provider: ProviderClient,
    currency: String,
}

impl SubscriptionService {
    pub fn new(pool: PgPool, provider: ProviderClient, currency: String) -> Self {
        Self {
            pool,
            provider,
            currency,
        }
    }

    /// Start a new subscription purchase.
    ///
    /// Refused while the family holds any active subscription unless `force`;
    /// the conflict carries enough for the client to offer extend/upgrade
    /// instead. Adapter failure aborts the transaction and leaves no rows.
    pub async fn create(
        &self,
        family_id: Uuid,
        user_id: Uuid,
        plan_id: PlanId,
        return_url: &str,
        force: bool,
        customer_email: Option<String>,
    ) -> BillingResult<CreateOutcome> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let active = lock_active_rows(&mut tx, family_id).await?;
        if let Some(current) = active.first() {
            if !force {
                let conflict = ActiveSubscriptionConflict {
                    current: SubscriptionView::from_row(current, now),
                    extend_available: true,
                    upgrade_available: current.plan_id.upgrade_target().is_some(),
                };
                tx.rollback().await?;
                return Ok(CreateOutcome::Conflict(conflict));
            }
        }

        let metadata = PaymentMetadata {
            family_id,
            user_id,
            plan_id: Some(plan_id),
            action: PaymentAction::Create,
        };
        let description = format!("Hearth subscription: {}", plan_id.display_name());
        let created = self
            .provider
            .create_payment(&CreatePayment {
                amount_minor: plan_id.price_minor(),
                currency: self.currency.clone(),
                description: description.clone(),
                return_url: return_url.to_string(),
                customer_email,
                metadata: metadata.clone(),
            })
            .await?;

        // Provisional end date; rewritten is not needed on activation because
        // activation only stamps start_date.
        let end_date = now + Duration::days(plan_id.period_days());
        let subscription_id = insert_pending_subscription(
            &mut tx,
            family_id,
            user_id,
            plan_id,
            plan_id.price_minor(),
            end_date,
            self.provider.kind().as_str(),
        )
        .await?;

        let payment_id = payments::insert_pending(
            &mut tx,
            Some(subscription_id),
            self.provider.kind(),
            &created.provider_payment_id,
            plan_id.price_minor(),
            &self.currency,
            &description,
            &metadata,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            family_id = %family_id,
            plan = %plan_id,
            subscription_id = %subscription_id,
            provider_payment_id = %created.provider_payment_id,
            "Subscription purchase started"
        );

        Ok(CreateOutcome::Created(CreatedSubscriptionPayment {
            payment_id,
            payment_url: created.confirmation_url,
            plan: plan_id,
            amount_minor: plan_id.price_minor(),
        }))
    }

    /// Renew the family's current subscription.
    ///
    /// The pending child row chains off the current end_date, not now, so
    /// renewals paid early lose nothing. Calendar days, not wall-clock math.
    pub async fn extend(
        &self,
        family_id: Uuid,
        user_id: Uuid,
        return_url: &str,
        customer_email: Option<String>,
    ) -> BillingResult<ExtendedSubscriptionPayment> {
        let mut tx = self.pool.begin().await?;

        let active = lock_active_rows(&mut tx, family_id).await?;
        let current = active.first().ok_or(BillingError::SubscriptionRequired)?;
        let plan_id = current.plan_id;
        let new_end_date = current.end_date + Duration::days(plan_id.period_days());

        let metadata = PaymentMetadata {
            family_id,
            user_id,
            plan_id: Some(plan_id),
            action: PaymentAction::Extend,
        };
        let description = format!("Hearth subscription renewal: {}", plan_id.display_name());
        let created = self
            .provider
            .create_payment(&CreatePayment {
                amount_minor: plan_id.price_minor(),
                currency: self.currency.clone(),
                description: description.clone(),
                return_url: return_url.to_string(),
                customer_email,
                metadata: metadata.clone(),
            })
            .await?;

        let subscription_id = insert_pending_subscription(
            &mut tx,
            family_id,
            user_id,
            plan_id,
            plan_id.price_minor(),
            new_end_date,
            self.provider.kind().as_str(),
        )
        .await?;

        let payment_id = payments::insert_pending(
            &mut tx,
            Some(subscription_id),
            self.provider.kind(),
            &created.provider_payment_id,
            plan_id.price_minor(),
            &self.currency,
            &description,
            &metadata,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            family_id = %family_id,
            plan = %plan_id,
            new_end_date = %new_end_date,
            "Subscription renewal started"
        );

        Ok(ExtendedSubscriptionPayment {
            payment_id,
            payment_url: created.confirmation_url,
            plan: plan_id,
            amount_minor: plan_id.price_minor(),
            new_end_date,
        })
    }

    /// Upgrade the family's running subscription to a higher plan.
    ///
    /// Only declared upgrade pairs are legal. The unused fraction of the old
    /// plan is credited against the new price; the replacement keeps the
    /// original end_date.
    pub async fn upgrade(
        &self,
        family_id: Uuid,
        user_id: Uuid,
        new_plan_id: PlanId,
        return_url: &str,
        customer_email: Option<String>,
    ) -> BillingResult<UpgradeSubscriptionPayment> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let active = lock_active_rows(&mut tx, family_id).await?;
        let current = active.first().ok_or(BillingError::SubscriptionRequired)?;
        if !current.plan_id.can_upgrade_to(new_plan_id) {
            return Err(BillingError::UnknownUpgradePair {
                from: current.plan_id.to_string(),
                to: new_plan_id.to_string(),
            });
        }

        let days_left = days_left_ceil(current.end_date, now);
        let (refund_minor, cost_minor) =
            prorated_upgrade_cost(current.plan_id, new_plan_id, days_left);

        if cost_minor == 0 {
            // Proration covers the full price: flip the pair immediately, no
            // payment round-trip.
            let subscription_id = insert_pending_subscription(
                &mut tx,
                family_id,
                user_id,
                new_plan_id,
                0,
                current.end_date,
                self.provider.kind().as_str(),
            )
            .await?;
            mark_upgraded(&mut tx, current.id).await?;
            activate_subscription_row(&mut tx, subscription_id).await?;
            tx.commit().await?;

            tracing::info!(
                family_id = %family_id,
                from = %current.plan_id,
                to = %new_plan_id,
                "Upgrade fully covered by proration, activated without payment"
            );

            return Ok(UpgradeSubscriptionPayment {
                payment_id: None,
                payment_url: None,
                plan: new_plan_id,
                amount_minor: 0,
                refund_minor,
                original_price_minor: new_plan_id.price_minor(),
            });
        }

        let metadata = PaymentMetadata {
            family_id,
            user_id,
            plan_id: Some(new_plan_id),
            action: PaymentAction::Upgrade,
        };
        let description = format!(
            "Hearth subscription upgrade: {} -> {}",
            current.plan_id.display_name(),
            new_plan_id.display_name()
        );
        let created = self
            .provider
            .create_payment(&CreatePayment {
                amount_minor: cost_minor,
                currency: self.currency.clone(),
                description: description.clone(),
                return_url: return_url.to_string(),
                customer_email,
                metadata: metadata.clone(),
            })
            .await?;

        // The replacement keeps the original end_date
        let subscription_id = insert_pending_subscription(
            &mut tx,
            family_id,
            user_id,
            new_plan_id,
            cost_minor,
            current.end_date,
            self.provider.kind().as_str(),
        )
        .await?;

        let payment_id = payments::insert_pending(
            &mut tx,
            Some(subscription_id),
            self.provider.kind(),
            &created.provider_payment_id,
            cost_minor,
            &self.currency,
            &description,
            &metadata,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            family_id = %family_id,
            from = %current.plan_id,
            to = %new_plan_id,
            refund_minor = refund_minor,
            cost_minor = cost_minor,
            "Subscription upgrade started"
        );

        Ok(UpgradeSubscriptionPayment {
            payment_id: Some(payment_id),
            payment_url: Some(created.confirmation_url),
            plan: new_plan_id,
            amount_minor: cost_minor,
            refund_minor,
            original_price_minor: new_plan_id.price_minor(),
        })
    }

    /// Family-level read model. Multi-plan families get one entry per active
    /// plan; `current` is the row with the latest end_date.
    pub async fn status(&self, family_id: Uuid) -> BillingResult<FamilySubscriptionStatus> {
        let now = OffsetDateTime::now_utc();
        let rows: Vec<Subscription> = sqlx::query_as(
            r#"
            SELECT id, family_id, user_id, plan_id, status, amount_minor, start_date,
                   end_date, auto_renew, provider, created_at, updated_at
            FROM subscriptions
            WHERE family_id = $1 AND status = 'active' AND end_date > NOW()
            ORDER BY end_date DESC
            "#,
        )
        .bind(family_id)
        .fetch_all(&self.pool)
        .await?;

        let Some(primary) = rows.first() else {
            return Ok(FamilySubscriptionStatus {
                has_subscription: false,
                current: None,
                plans: vec![],
                buyer_user_id: None,
                buyer_email: None,
            });
        };

        let buyer_email: Option<String> =
            sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
                .bind(primary.user_id)
                .fetch_optional(&self.pool)
                .await?
                .flatten();

        Ok(FamilySubscriptionStatus {
            has_subscription: true,
            current: Some(SubscriptionView::from_row(primary, now)),
            plans: rows
                .iter()
                .map(|r| SubscriptionView::from_row(r, now))
                .collect(),
            buyer_user_id: Some(primary.user_id),
            buyer_email,
        })
    }

    /// Poll the provider for a payment the client is waiting on. A payment
    /// the provider reports paid settles through the same path as a webhook.
    pub async fn check_payment(&self, payment_id: Uuid) -> BillingResult<CheckPaymentResult> {
        let payment = payments::fetch_by_id(&self.pool, payment_id)
            .await?
            .ok_or_else(|| BillingError::PaymentNotFound(payment_id.to_string()))?;

        if payment.status == hearth_shared::PaymentStatus::Paid {
            return Ok(CheckPaymentResult {
                status: "paid".to_string(),
                paid: true,
                activation: None,
            });
        }

        let info = self
            .provider
            .get_payment_status(&payment.provider_payment_id)
            .await?;

        if !info.paid {
            return Ok(CheckPaymentResult {
                status: info.status,
                paid: false,
                activation: None,
            });
        }

        let mut tx = self.pool.begin().await?;
        let Some(locked) = payments::lock_by_id(&mut tx, payment_id).await? else {
            return Err(BillingError::PaymentNotFound(payment_id.to_string()));
        };
        let activation =
            settle_paid_payment(&mut tx, &locked, info.payment_method.as_deref()).await?;
        tx.commit().await?;

        Ok(CheckPaymentResult {
            status: "paid".to_string(),
            paid: true,
            activation: Some(activation),
        })
    }

    /// Explicit cancel of the active subscription for a plan
    pub async fn cancel(&self, family_id: Uuid, plan_id: PlanId) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', updated_at = NOW()
            WHERE family_id = $1 AND plan_id = $2 AND status = 'active'
            "#,
        )
        .bind(family_id)
        .bind(plan_id)
        .execute(&self.pool)
        .await?;

        let cancelled = result.rows_affected() > 0;
        if cancelled {
            tracing::info!(family_id = %family_id, plan = %plan_id, "Subscription cancelled");
        }
        Ok(cancelled)
    }

    /// Expire lapsed subscriptions; each (family, plan) pair sweeps
    /// independently. Cooperative periodic task, not a real-time guarantee.
    pub async fn sweep(&self) -> BillingResult<u64> {
        sweep_expired(&self.pool).await
    }
}

/// Mark active subscriptions past their end_date as expired
pub async fn sweep_expired(pool: &PgPool) -> BillingResult<u64> {
    let result = sqlx::query(
        "UPDATE subscriptions SET status = 'expired', updated_at = NOW() WHERE status = 'active' AND end_date <= NOW()",
    )
    .execute(pool)
    .await?;

    let expired = result.rows_affected();
    if expired > 0 {
        tracing::info!(expired = expired, "Subscription sweep expired lapsed rows");
    }
    Ok(expired)
}

/// Settle a locked, not-yet-paid payment: mark it paid and apply its effect
/// (subscription activation or wallet topup) in the same transaction.
///
/// Idempotent: a payment already `paid` settles to `AlreadySettled` with no
/// further writes, which is what makes webhook replay a no-op.
pub(crate) async fn settle_paid_payment(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payment: &PaymentRow,
    payment_method: Option<&str>,
) -> BillingResult<Activation> {
    if payment.status == hearth_shared::PaymentStatus::Paid {
        return Ok(Activation::AlreadySettled);
    }

    payments::mark_paid(tx, payment.id, payment_method).await?;

    match payment.subscription_id {
        Some(subscription_id) => {
            activate_from_payment(tx, payment, subscription_id).await
        }
        None => {
            // Standalone donation payment tops up the family wallet
            let credited = payment.amount_minor / 100;
            if credited > 0 {
                wallet::credit_in_tx(
                    tx,
                    payment.family_id,
                    credited,
                    TxnKind::Topup,
                    SpendReason::TopupDonation,
                    &payment.description,
                    Some(payment.user_id),
                )
                .await?;
            }
            Ok(Activation::WalletToppedUp {
                family_id: payment.family_id,
                user_id: payment.user_id,
                credited,
            })
        }
    }
}

/// Flip the payment's subscription pending -> active. Invoked only from the
/// settle path, inside the dispatcher's transaction.
async fn activate_from_payment(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payment: &PaymentRow,
    subscription_id: Uuid,
) -> BillingResult<Activation> {
    let row: Option<Subscription> = sqlx::query_as(
        r#"
        SELECT id, family_id, user_id, plan_id, status, amount_minor, start_date,
               end_date, auto_renew, provider, created_at, updated_at
        FROM subscriptions
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(subscription_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(subscription) = row else {
        tracing::warn!(
            payment_id = %payment.id,
            subscription_id = %subscription_id,
            "Paid payment references a missing subscription"
        );
        return Ok(Activation::AlreadySettled);
    };

    if subscription.status != SubscriptionStatus::Pending {
        // Already active (replayed webhook racing check_payment) or a
        // terminal state; nothing to do.
        return Ok(Activation::AlreadySettled);
    }

    let action = payment.action();
    match action {
        PaymentAction::Upgrade => {
            // The old half of the upgrade pair becomes `upgraded` in the same
            // transaction the new plan activates.
            let from: Vec<PlanId> = PlanId::all()
                .iter()
                .copied()
                .filter(|p| p.can_upgrade_to(subscription.plan_id))
                .collect();
            for plan in from {
                sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET status = 'upgraded', updated_at = NOW()
                    WHERE family_id = $1 AND plan_id = $2 AND status = 'active'
                    "#,
                )
                .bind(subscription.family_id)
                .bind(plan)
                .execute(&mut **tx)
                .await?;
            }
        }
        PaymentAction::Extend | PaymentAction::Create => {
            // The newly paid row supersedes any running row of the same plan
            // (renewals chain end_date, forced re-purchases restart it);
            // expiring the old row here keeps "one active per (family, plan)"
            // intact.
            sqlx::query(
                r#"
                UPDATE subscriptions
                SET status = 'expired', updated_at = NOW()
                WHERE family_id = $1 AND plan_id = $2 AND status = 'active' AND id <> $3
                "#,
            )
            .bind(subscription.family_id)
            .bind(subscription.plan_id)
            .bind(subscription.id)
            .execute(&mut **tx)
            .await?;
        }
        PaymentAction::Topup => {}
    }

    activate_subscription_row(tx, subscription.id).await?;

    tracing::info!(
        subscription_id = %subscription.id,
        family_id = %subscription.family_id,
        plan = %subscription.plan_id,
        action = action.as_str(),
        "Subscription activated from payment"
    );

    Ok(Activation::SubscriptionActivated {
        subscription_id: subscription.id,
        family_id: subscription.family_id,
        user_id: subscription.user_id,
        plan_id: subscription.plan_id,
        action,
    })
}

async fn activate_subscription_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    subscription_id: Uuid,
) -> BillingResult<()> {
    sqlx::query(
        "UPDATE subscriptions SET status = 'active', start_date = NOW(), updated_at = NOW() WHERE id = $1",
    )
    .bind(subscription_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn mark_upgraded(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    subscription_id: Uuid,
) -> BillingResult<()> {
    sqlx::query(
        "UPDATE subscriptions SET status = 'upgraded', updated_at = NOW() WHERE id = $1",
    )
    .bind(subscription_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_pending_subscription(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    family_id: Uuid,
    user_id: Uuid,
    plan_id: PlanId,
    amount_minor: i64,
    end_date: OffsetDateTime,
    provider: &str,
) -> BillingResult<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO subscriptions (family_id, user_id, plan_id, status, amount_minor, end_date, provider)
        VALUES ($1, $2, $3, 'pending', $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(family_id)
    .bind(user_id)
    .bind(plan_id)
    .bind(amount_minor)
    .bind(end_date)
    .bind(provider)
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

/// Lock the family's active subscription rows, latest end_date first.
/// Serializes create/extend/upgrade against each other and against webhook
/// activation for the same family.
async fn lock_active_rows(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    family_id: Uuid,
) -> BillingResult<Vec<Subscription>> {
    let rows: Vec<Subscription> = sqlx::query_as(
        r#"
        SELECT id, family_id, user_id, plan_id, status, amount_minor, start_date,
               end_date, auto_renew, provider, created_at, updated_at
        FROM subscriptions
        WHERE family_id = $1 AND status = 'active'
        ORDER BY end_date DESC
        FOR UPDATE
        "#,
    )
    .bind(family_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}

/// Proration: the unused fraction of the old plan, valued at
/// `price * days_left / period_days`, credited against the new price and
/// clamped at zero.
pub fn prorated_upgrade_cost(old_plan: PlanId, new_plan: PlanId, days_left: i64) -> (i64, i64) {
    let days_left = days_left.clamp(0, old_plan.period_days());
    let refund = old_plan.price_minor() * days_left / old_plan.period_days();
    let cost = (new_plan.price_minor() - refund).max(0);
    (refund, cost)
}

/// Whole days remaining until `end`, rounded up; never negative
pub fn days_left_ceil(end: OffsetDateTime, now: OffsetDateTime) -> i64 {
    let seconds = (end - now).whole_seconds();
    if seconds <= 0 {
        return 0;
    }
    (seconds + 86_399) / 86_400
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn proration_matches_the_catalog_example() {
        // 20 of 30 days left on ai_assistant (200.00), upgrading to full (500.00):
        // refund = 20000 * 20 / 30 = 13333, cost = 50000 - 13333 = 36667
        let (refund, cost) = prorated_upgrade_cost(PlanId::AiAssistant, PlanId::Full, 20);
        assert_eq!(refund, 13_333);
        assert_eq!(cost, 36_667);
    }

    #[test]
    fn proration_clamps_cost_at_zero() {
        // A hypothetical future pair where the refund exceeds the new price
        // must never produce a negative charge; with the current catalog the
        // clamp engages only at full coverage.
        let (refund, cost) = prorated_upgrade_cost(PlanId::AiAssistant, PlanId::Full, 30);
        assert_eq!(refund, 20_000);
        assert_eq!(cost, 30_000);
        let (_, cost) = prorated_upgrade_cost(PlanId::AiAssistant, PlanId::Full, 0);
        assert_eq!(cost, 50_000);
    }

    #[test]
    fn proration_ignores_days_beyond_the_period() {
        let (refund, _) = prorated_upgrade_cost(PlanId::AiAssistant, PlanId::Full, 90);
        assert_eq!(refund, PlanId::AiAssistant.price_minor());
    }

    #[test]
    fn days_left_rounds_up_partial_days() {
        let now = datetime!(2025-03-01 12:00 UTC);
        assert_eq!(days_left_ceil(now + Duration::days(30), now), 30);
        assert_eq!(
            days_left_ceil(now + Duration::days(19) + Duration::hours(23), now),
            20
        );
        assert_eq!(days_left_ceil(now - Duration::hours(1), now), 0);
    }
}
