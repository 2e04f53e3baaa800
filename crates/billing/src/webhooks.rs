//! Payment webhook dispatcher
//!
//! Single entrypoint for provider callbacks: authenticate, parse, deduplicate
//! by `provider_payment_id`, and settle inside one transaction. Re-delivery of
//! a webhook after the first successful activation is a no-op acknowledged
//! with 200.

use serde::Serialize;
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use hearth_shared::{PaymentAction, SpendReason, TxnKind};

use crate::error::{BillingError, BillingResult};
use crate::payments;
use crate::provider::{
    CreatePayment, CreatedPayment, PaymentMetadata, ProviderClient, WebhookEvent,
};
use crate::subscriptions::{self, Activation};

/// What a webhook delivery did
#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated: Option<bool>,
    #[serde(skip)]
    pub activation: Option<Activation>,
}

impl WebhookOutcome {
    fn acknowledged() -> Self {
        Self {
            received: true,
            activated: None,
            activation: None,
        }
    }
}

/// Webhook dispatcher
#[derive(Clone)]
pub struct WebhookDispatcher {
    pool: PgPool,
    provider: ProviderClient,
    /// Optional shared secret required in the callback URL or header,
    /// compared in constant time
    shared_secret: Option<String>,
}

impl WebhookDispatcher {
    pub fn new(pool: PgPool, provider: ProviderClient, shared_secret: Option<String>) -> Self {
        Self {
            pool,
            provider,
            shared_secret,
        }
    }

    /// Handle one provider callback delivery.
    ///
    /// `presented_secret` is whatever credential the transport carried; it is
    /// only checked when a shared secret is configured.
    pub async fn handle(
        &self,
        raw_body: &str,
        presented_secret: Option<&str>,
    ) -> BillingResult<WebhookOutcome> {
        if let Some(expected) = &self.shared_secret {
            let presented = presented_secret.unwrap_or("");
            let matches: bool = expected
                .as_bytes()
                .ct_eq(presented.as_bytes())
                .into();
            if !matches {
                tracing::warn!("Webhook rejected: shared secret mismatch");
                return Err(BillingError::WebhookAuthFailed);
            }
        }

        let event = self.provider.parse_webhook(raw_body)?;

        let (provider_payment_id, payment_method) = match event {
            WebhookEvent::Ignored { event } => {
                tracing::info!(event = %event, "Webhook event type ignored");
                return Ok(WebhookOutcome::acknowledged());
            }
            WebhookEvent::PaymentSucceeded {
                provider_payment_id,
                payment_method,
                ..
            } => (provider_payment_id, payment_method),
        };

        let mut tx = self.pool.begin().await?;

        let Some(payment) = payments::lock_by_provider_id(&mut tx, &provider_payment_id).await?
        else {
            // The domain does not own this payment; acknowledge so the
            // provider stops redelivering.
            tracing::warn!(
                provider_payment_id = %provider_payment_id,
                "Webhook for unknown payment acknowledged"
            );
            tx.rollback().await?;
            return Ok(WebhookOutcome::acknowledged());
        };

        let activation =
            subscriptions::settle_paid_payment(&mut tx, &payment, payment_method.as_deref())
                .await?;
        tx.commit().await?;

        let activated = match &activation {
            Activation::SubscriptionActivated { .. } => Some(true),
            Activation::WalletToppedUp { .. } => Some(true),
            Activation::AlreadySettled => None,
        };

        tracing::info!(
            provider_payment_id = %provider_payment_id,
            activated = activated.unwrap_or(false),
            "Webhook settled"
        );

        Ok(WebhookOutcome {
            received: true,
            activated,
            activation: Some(activation),
        })
    }

    /// Start a standalone donation payment that tops up the family wallet on
    /// its paid webhook.
    pub async fn start_topup(
        &self,
        family_id: Uuid,
        user_id: Uuid,
        amount_minor: i64,
        currency: &str,
        return_url: &str,
        customer_email: Option<String>,
    ) -> BillingResult<CreatedTopup> {
        if amount_minor <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "topup amount must be positive, got {amount_minor}"
            )));
        }

        let metadata = PaymentMetadata {
            family_id,
            user_id,
            plan_id: None,
            action: PaymentAction::Topup,
        };
        let description = "Hearth wallet topup".to_string();
        let created: CreatedPayment = self
            .provider
            .create_payment(&CreatePayment {
                amount_minor,
                currency: currency.to_string(),
                description: description.clone(),
                return_url: return_url.to_string(),
                customer_email,
                metadata: metadata.clone(),
            })
            .await?;

        let mut tx = self.pool.begin().await?;
        let payment_id = payments::insert_pending(
            &mut tx,
            None,
            self.provider.kind(),
            &created.provider_payment_id,
            amount_minor,
            currency,
            &description,
            &metadata,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            family_id = %family_id,
            amount_minor = amount_minor,
            payment_id = %payment_id,
            "Wallet topup payment started"
        );

        Ok(CreatedTopup {
            payment_id,
            payment_url: created.confirmation_url,
            amount_minor,
        })
    }
}

/// A pending wallet topup waiting on its payment
#[derive(Debug, Clone, Serialize)]
pub struct CreatedTopup {
    pub payment_id: Uuid,
    pub payment_url: String,
    pub amount_minor: i64,
}

/// Admin-issued refund to a family wallet. The no-auto-refund policy for
/// failed AI generations routes through here, never through the orchestrator.
pub async fn admin_refund(
    wallet: &crate::wallet::WalletService,
    family_id: Uuid,
    amount: i64,
    description: &str,
) -> BillingResult<i64> {
    wallet
        .credit(
            family_id,
            amount,
            TxnKind::Refund,
            SpendReason::AdminRefund,
            description,
            None,
        )
        .await
}
