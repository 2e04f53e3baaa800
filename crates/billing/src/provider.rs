//! Payment provider adapters
//!
//! Pure translation between the domain and the external payment APIs. Two
//! provider contracts are encoded, YooKassa-style and T-Bank-style, behind a
//! single internal interface. The adapter never touches the store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use hearth_shared::{PaymentAction, PlanId};

use crate::error::{BillingError, BillingResult};

/// Which provider a payment was created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Yookassa,
    Tbank,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yookassa => "yookassa",
            Self::Tbank => "tbank",
        }
    }
}

/// Domain payload attached to a provider payment and echoed back in webhooks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub family_id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<PlanId>,
    pub action: PaymentAction,
}

/// Request to create a provider payment
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub return_url: String,
    pub customer_email: Option<String>,
    pub metadata: PaymentMetadata,
}

/// Provider response to payment creation
#[derive(Debug, Clone)]
pub struct CreatedPayment {
    pub provider_payment_id: String,
    pub confirmation_url: String,
    pub status: String,
}

/// Provider-side payment status
#[derive(Debug, Clone)]
pub struct PaymentStatusInfo {
    pub status: String,
    pub paid: bool,
    pub payment_method: Option<String>,
}

/// Parsed webhook envelope
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    PaymentSucceeded {
        provider_payment_id: String,
        metadata: PaymentMetadata,
        amount_minor: i64,
        payment_method: Option<String>,
    },
    /// Recognized envelope, event type we do not act on
    Ignored { event: String },
}

/// Render minor units as a provider decimal string: 36667 -> "366.67"
pub fn format_minor(amount_minor: i64) -> String {
    format!("{}.{:02}", amount_minor / 100, amount_minor % 100)
}

/// Parse a provider decimal string back into minor units
pub fn parse_minor(value: &str) -> Option<i64> {
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        2 => frac.parse().ok()?,
        _ => frac[..2].parse().ok()?,
    };
    Some(whole * 100 + frac)
}

// =============================================================================
// YooKassa
// =============================================================================

/// YooKassa API client
#[derive(Clone)]
pub struct YooKassaClient {
    http: reqwest::Client,
    shop_id: String,
    secret_key: String,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct YkPaymentResponse {
    id: String,
    status: String,
    #[serde(default)]
    paid: bool,
    confirmation: Option<YkConfirmation>,
    payment_method: Option<YkPaymentMethod>,
}

#[derive(Debug, Deserialize)]
struct YkConfirmation {
    confirmation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YkPaymentMethod {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YkWebhookEnvelope {
    event: String,
    object: YkWebhookObject,
}

#[derive(Debug, Deserialize)]
struct YkWebhookObject {
    id: String,
    #[serde(default)]
    metadata: serde_json::Value,
    amount: Option<YkAmount>,
    payment_method: Option<YkPaymentMethod>,
}

#[derive(Debug, Deserialize)]
struct YkAmount {
    value: String,
}

impl YooKassaClient {
    pub fn new(http: reqwest::Client, shop_id: String, secret_key: String, api_url: String) -> Self {
        Self {
            http,
            shop_id,
            secret_key,
            api_url,
        }
    }

    pub async fn create_payment(&self, req: &CreatePayment) -> BillingResult<CreatedPayment> {
        let receipt_email = req
            .customer_email
            .clone()
            .unwrap_or_else(|| "receipts@hearth.family".to_string());

        let body = json!({
            "amount": { "value": format_minor(req.amount_minor), "currency": req.currency },
            "confirmation": { "type": "redirect", "return_url": req.return_url },
            "capture": true,
            "description": req.description,
            "receipt": {
                "customer": { "email": receipt_email },
                "items": [{
                    "description": req.description,
                    "quantity": "1.00",
                    "amount": { "value": format_minor(req.amount_minor), "currency": req.currency },
                    "vat_code": 1,
                    "payment_subject": "service",
                    "payment_mode": "full_payment"
                }]
            },
            "metadata": self.metadata_fields(&req.metadata),
        });

        let response = self
            .http
            .post(format!("{}/payments", self.api_url))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .header("Idempotence-Key", Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BillingError::Provider(format!(
                "payment creation failed with {status}: {}",
                truncate(&text, 256)
            )));
        }

        let payment: YkPaymentResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("malformed create response: {e}")))?;

        let confirmation_url = payment
            .confirmation
            .and_then(|c| c.confirmation_url)
            .ok_or_else(|| {
                BillingError::Provider("create response missing confirmation_url".to_string())
            })?;

        Ok(CreatedPayment {
            provider_payment_id: payment.id,
            confirmation_url,
            status: payment.status,
        })
    }

    pub async fn get_payment_status(
        &self,
        provider_payment_id: &str,
    ) -> BillingResult<PaymentStatusInfo> {
        let response = self
            .http
            .get(format!("{}/payments/{}", self.api_url, provider_payment_id))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BillingError::Provider(format!(
                "status fetch failed with {status}: {}",
                truncate(&text, 256)
            )));
        }

        let payment: YkPaymentResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("malformed status response: {e}")))?;

        Ok(PaymentStatusInfo {
            paid: payment.paid,
            status: payment.status,
            payment_method: payment.payment_method.and_then(|m| m.kind),
        })
    }

    /// Parse a webhook body. Unrecognized event types are `Ignored`, never
    /// errors; only a body that is not a webhook envelope at all fails.
    pub fn parse_webhook(raw_body: &str) -> BillingResult<WebhookEvent> {
        let envelope: YkWebhookEnvelope = serde_json::from_str(raw_body)
            .map_err(|e| BillingError::WebhookMalformed(e.to_string()))?;

        if envelope.event != "payment.succeeded" {
            return Ok(WebhookEvent::Ignored {
                event: envelope.event,
            });
        }

        let metadata: PaymentMetadata = serde_json::from_value(envelope.object.metadata.clone())
            .map_err(|e| BillingError::WebhookMalformed(format!("metadata: {e}")))?;

        let amount_minor = envelope
            .object
            .amount
            .as_ref()
            .and_then(|a| parse_minor(&a.value))
            .unwrap_or(0);

        Ok(WebhookEvent::PaymentSucceeded {
            provider_payment_id: envelope.object.id,
            metadata,
            amount_minor,
            payment_method: envelope.object.payment_method.and_then(|m| m.kind),
        })
    }

    /// YooKassa metadata values must be strings
    fn metadata_fields(&self, metadata: &PaymentMetadata) -> serde_json::Value {
        let mut fields = serde_json::Map::new();
        fields.insert(
            "family_id".to_string(),
            json!(metadata.family_id.to_string()),
        );
        fields.insert("user_id".to_string(), json!(metadata.user_id.to_string()));
        if let Some(plan) = metadata.plan_id {
            fields.insert("plan_id".to_string(), json!(plan.as_str()));
        }
        fields.insert("action".to_string(), json!(metadata.action.as_str()));
        serde_json::Value::Object(fields)
    }
}

// =============================================================================
// T-Bank
// =============================================================================

/// T-Bank (Init/GetState) API client
#[derive(Clone)]
pub struct TBankClient {
    http: reqwest::Client,
    terminal_key: String,
    password: String,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct TbInitResponse {
    #[serde(rename = "Success")]
    success: bool,
    #[serde(rename = "PaymentId", default)]
    payment_id: Option<String>,
    #[serde(rename = "PaymentURL", default)]
    payment_url: Option<String>,
    #[serde(rename = "Status", default)]
    status: Option<String>,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TbWebhookEnvelope {
    #[serde(rename = "PaymentId")]
    payment_id: serde_json::Value,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Amount", default)]
    amount: Option<i64>,
    #[serde(rename = "DATA", default)]
    data: serde_json::Value,
}

impl TBankClient {
    pub fn new(
        http: reqwest::Client,
        terminal_key: String,
        password: String,
        api_url: String,
    ) -> Self {
        Self {
            http,
            terminal_key,
            password,
            api_url,
        }
    }

    pub async fn create_payment(&self, req: &CreatePayment) -> BillingResult<CreatedPayment> {
        let order_id = Uuid::new_v4().to_string();

        let mut token_params = BTreeMap::new();
        token_params.insert("Amount", req.amount_minor.to_string());
        token_params.insert("Description", req.description.clone());
        token_params.insert("OrderId", order_id.clone());
        token_params.insert("Password", self.password.clone());
        token_params.insert("TerminalKey", self.terminal_key.clone());
        let token = sign_token(&token_params);

        let body = json!({
            "TerminalKey": self.terminal_key,
            "Amount": req.amount_minor,
            "OrderId": order_id,
            "Description": req.description,
            "SuccessURL": req.return_url,
            "Token": token,
            "DATA": {
                "family_id": req.metadata.family_id.to_string(),
                "user_id": req.metadata.user_id.to_string(),
                "plan_id": req.metadata.plan_id.map(|p| p.as_str().to_string()),
                "action": req.metadata.action.as_str(),
            },
        });

        let response = self
            .http
            .post(format!("{}/Init", self.api_url))
            .json(&body)
            .send()
            .await?;

        let init: TbInitResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("malformed Init response: {e}")))?;

        if !init.success {
            return Err(BillingError::Provider(format!(
                "Init rejected: {}",
                init.message.unwrap_or_else(|| "no message".to_string())
            )));
        }

        match (init.payment_id, init.payment_url) {
            (Some(id), Some(url)) => Ok(CreatedPayment {
                provider_payment_id: id,
                confirmation_url: url,
                status: init.status.unwrap_or_else(|| "NEW".to_string()),
            }),
            _ => Err(BillingError::Provider(
                "Init response missing PaymentId or PaymentURL".to_string(),
            )),
        }
    }

    pub async fn get_payment_status(
        &self,
        provider_payment_id: &str,
    ) -> BillingResult<PaymentStatusInfo> {
        let mut token_params = BTreeMap::new();
        token_params.insert("Password", self.password.clone());
        token_params.insert("PaymentId", provider_payment_id.to_string());
        token_params.insert("TerminalKey", self.terminal_key.clone());
        let token = sign_token(&token_params);

        let body = json!({
            "TerminalKey": self.terminal_key,
            "PaymentId": provider_payment_id,
            "Token": token,
        });

        let response = self
            .http
            .post(format!("{}/GetState", self.api_url))
            .json(&body)
            .send()
            .await?;

        let state: TbInitResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Provider(format!("malformed GetState response: {e}")))?;

        let status = state.status.unwrap_or_else(|| "UNKNOWN".to_string());
        let paid = status == "CONFIRMED";
        Ok(PaymentStatusInfo {
            status,
            paid,
            payment_method: None,
        })
    }

    pub fn parse_webhook(raw_body: &str) -> BillingResult<WebhookEvent> {
        let envelope: TbWebhookEnvelope = serde_json::from_str(raw_body)
            .map_err(|e| BillingError::WebhookMalformed(e.to_string()))?;

        if envelope.status != "CONFIRMED" {
            return Ok(WebhookEvent::Ignored {
                event: envelope.status,
            });
        }

        let metadata: PaymentMetadata = serde_json::from_value(envelope.data.clone())
            .map_err(|e| BillingError::WebhookMalformed(format!("DATA: {e}")))?;

        // PaymentId arrives as either a number or a string depending on the
        // notification version
        let provider_payment_id = match &envelope.payment_id {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(BillingError::WebhookMalformed(format!(
                    "PaymentId has unexpected shape: {other}"
                )))
            }
        };

        Ok(WebhookEvent::PaymentSucceeded {
            provider_payment_id,
            metadata,
            amount_minor: envelope.amount.unwrap_or(0),
            payment_method: None,
        })
    }
}

/// T-Bank request token: SHA-256 over the values of all root-level params plus
/// the terminal password, concatenated in key order.
fn sign_token(params: &BTreeMap<&str, String>) -> String {
    let mut hasher = Sha256::new();
    for value in params.values() {
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

// =============================================================================
// Unified client
// =============================================================================

/// The configured payment provider behind one internal interface
#[derive(Clone)]
pub enum ProviderClient {
    Yookassa(YooKassaClient),
    Tbank(TBankClient),
}

impl ProviderClient {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Yookassa(_) => ProviderKind::Yookassa,
            Self::Tbank(_) => ProviderKind::Tbank,
        }
    }

    pub async fn create_payment(&self, req: &CreatePayment) -> BillingResult<CreatedPayment> {
        match self {
            Self::Yookassa(c) => c.create_payment(req).await,
            Self::Tbank(c) => c.create_payment(req).await,
        }
    }

    pub async fn get_payment_status(
        &self,
        provider_payment_id: &str,
    ) -> BillingResult<PaymentStatusInfo> {
        match self {
            Self::Yookassa(c) => c.get_payment_status(provider_payment_id).await,
            Self::Tbank(c) => c.get_payment_status(provider_payment_id).await,
        }
    }

    pub fn parse_webhook(&self, raw_body: &str) -> BillingResult<WebhookEvent> {
        match self {
            Self::Yookassa(_) => YooKassaClient::parse_webhook(raw_body),
            Self::Tbank(_) => TBankClient::parse_webhook(raw_body),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn minor_unit_formatting_round_trips() {
        assert_eq!(format_minor(36667), "366.67");
        assert_eq!(format_minor(20000), "200.00");
        assert_eq!(format_minor(5), "0.05");
        assert_eq!(parse_minor("366.67"), Some(36667));
        assert_eq!(parse_minor("200.00"), Some(20000));
        assert_eq!(parse_minor("200"), Some(20000));
        assert_eq!(parse_minor("1.5"), Some(150));
    }

    #[test]
    fn yookassa_webhook_payment_succeeded_parses() {
        let family_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let body = json!({
            "event": "payment.succeeded",
            "object": {
                "id": "2e8b3a1f-000f-5000-9000-1db2b9a9a9ab",
                "status": "succeeded",
                "paid": true,
                "amount": { "value": "200.00", "currency": "RUB" },
                "payment_method": { "type": "bank_card" },
                "metadata": {
                    "family_id": family_id.to_string(),
                    "user_id": user_id.to_string(),
                    "plan_id": "ai_assistant",
                    "action": "create"
                }
            }
        })
        .to_string();

        match YooKassaClient::parse_webhook(&body).unwrap() {
            WebhookEvent::PaymentSucceeded {
                provider_payment_id,
                metadata,
                amount_minor,
                payment_method,
            } => {
                assert_eq!(provider_payment_id, "2e8b3a1f-000f-5000-9000-1db2b9a9a9ab");
                assert_eq!(metadata.family_id, family_id);
                assert_eq!(metadata.plan_id, Some(PlanId::AiAssistant));
                assert_eq!(metadata.action, PaymentAction::Create);
                assert_eq!(amount_minor, 20000);
                assert_eq!(payment_method.as_deref(), Some("bank_card"));
            }
            other => panic!("expected PaymentSucceeded, got {other:?}"),
        }
    }

    #[test]
    fn yookassa_webhook_other_events_are_ignored() {
        let body = json!({
            "event": "payment.waiting_for_capture",
            "object": { "id": "x", "metadata": {} }
        })
        .to_string();

        match YooKassaClient::parse_webhook(&body).unwrap() {
            WebhookEvent::Ignored { event } => assert_eq!(event, "payment.waiting_for_capture"),
            other => panic!("expected Ignored, got {other:?}"),
        }
    }

    #[test]
    fn yookassa_webhook_garbage_is_an_error() {
        assert!(matches!(
            YooKassaClient::parse_webhook("not json"),
            Err(BillingError::WebhookMalformed(_))
        ));
    }

    #[test]
    fn tbank_webhook_confirmed_parses_numeric_payment_id() {
        let family_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let body = json!({
            "TerminalKey": "t",
            "PaymentId": 700001,
            "Status": "CONFIRMED",
            "Amount": 50000,
            "DATA": {
                "family_id": family_id.to_string(),
                "user_id": user_id.to_string(),
                "action": "topup"
            }
        })
        .to_string();

        match TBankClient::parse_webhook(&body).unwrap() {
            WebhookEvent::PaymentSucceeded {
                provider_payment_id,
                metadata,
                amount_minor,
                ..
            } => {
                assert_eq!(provider_payment_id, "700001");
                assert_eq!(metadata.action, PaymentAction::Topup);
                assert_eq!(metadata.plan_id, None);
                assert_eq!(amount_minor, 50000);
            }
            other => panic!("expected PaymentSucceeded, got {other:?}"),
        }
    }

    #[test]
    fn tbank_token_is_deterministic() {
        let mut params = BTreeMap::new();
        params.insert("Amount", "50000".to_string());
        params.insert("OrderId", "abc".to_string());
        params.insert("Password", "secret".to_string());
        params.insert("TerminalKey", "term".to_string());
        assert_eq!(sign_token(&params), sign_token(&params.clone()));
        assert_eq!(sign_token(&params).len(), 64);
    }
}
