//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use hearth_ai::{AiOrchestrator, BlobStorage, LlmClient};
use hearth_billing::{
    ProviderClient, SubscriptionService, TBankClient, WalletService, WebhookDispatcher,
    YooKassaClient,
};

use crate::config::Config;
use crate::notify::{channels::Channels, Notifier};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub wallet: WalletService,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookDispatcher,
    pub orchestrator: AiOrchestrator,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let http = reqwest::Client::new();

        let provider = match config.payment_provider.as_str() {
            "tbank" => ProviderClient::Tbank(TBankClient::new(
                http.clone(),
                config.tbank_terminal_key.clone(),
                config.tbank_password.clone(),
                config.tbank_api_url.clone(),
            )),
            _ => ProviderClient::Yookassa(YooKassaClient::new(
                http.clone(),
                config.yookassa_shop_id.clone(),
                config.yookassa_secret_key.clone(),
                config.yookassa_api_url.clone(),
            )),
        };

        let wallet = WalletService::new(pool.clone());
        let subscriptions = SubscriptionService::new(
            pool.clone(),
            provider.clone(),
            config.payment_currency.clone(),
        );
        let webhooks = WebhookDispatcher::new(
            pool.clone(),
            provider,
            config.payment_webhook_secret.clone(),
        );

        let llm = LlmClient::new(
            http.clone(),
            config.llm_api_key.clone(),
            config.llm_folder_id.clone(),
            config.llm_completion_url.clone(),
            config.llm_image_url.clone(),
            config.llm_operation_url.clone(),
        );
        let blob = BlobStorage::new(
            http.clone(),
            config.blob_upload_url.clone(),
            config.blob_cdn_url.clone(),
            config.blob_api_token.clone(),
        );
        let orchestrator = AiOrchestrator::new(pool.clone(), llm, blob, wallet.clone());

        let channels = Channels::new(
            http,
            config.push_gateway_url.clone(),
            config.messenger_gateway_url.clone(),
            config.sms_gateway_url.clone(),
            config.email_gateway_url.clone(),
            config.notify_api_key.clone(),
            config.email_from.clone(),
        );
        let notifier = Notifier::new(pool.clone(), channels);

        Self {
            pool,
            config: Arc::new(config),
            wallet,
            subscriptions,
            webhooks,
            orchestrator,
            notifier,
        }
    }
}
