//! Hearth billing: wallet, payments, subscriptions, webhooks
//!
//! The subsystem that must stay correct under concurrency, partial failures
//! and webhook reordering. The wallet service is the only writer of wallet
//! balances; the webhook dispatcher is the only writer of subscription
//! activation.

pub mod error;
pub mod payments;
pub mod provider;
pub mod subscriptions;
pub mod wallet;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

pub use error::{BillingError, BillingResult};
pub use payments::PaymentRow;
pub use provider::{
    CreatePayment, CreatedPayment, PaymentMetadata, PaymentStatusInfo, ProviderClient,
    ProviderKind, TBankClient, WebhookEvent, YooKassaClient,
};
pub use subscriptions::{
    Activation, CheckPaymentResult, CreateOutcome, FamilySubscriptionStatus, SubscriptionService,
};
pub use wallet::{DebitOutcome, WalletService, WalletTransaction};
pub use webhooks::{WebhookDispatcher, WebhookOutcome};
