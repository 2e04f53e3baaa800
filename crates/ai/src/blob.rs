//! Blob storage upload for generated images
//!
//! Generated photos arrive base64-encoded from the provider; they are decoded,
//! pushed to object storage, and served back through the CDN base URL.

use base64::Engine;
use uuid::Uuid;

use crate::error::{AiError, AiResult};

/// Object storage client
#[derive(Clone)]
pub struct BlobStorage {
    http: reqwest::Client,
    upload_url: String,
    cdn_url: String,
    api_token: String,
}

impl BlobStorage {
    pub fn new(http: reqwest::Client, upload_url: String, cdn_url: String, api_token: String) -> Self {
        Self {
            http,
            upload_url,
            cdn_url,
            api_token,
        }
    }

    /// Decode a base64 image payload and upload it; returns the CDN URL
    pub async fn upload_base64_image(&self, image_base64: &str) -> AiResult<String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(image_base64.trim())
            .map_err(|e| AiError::Storage(format!("invalid base64 image: {e}")))?;

        let key = format!("ai/{}.jpeg", Uuid::new_v4());
        let response = self
            .http
            .put(format!("{}/{}", self.upload_url, key))
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Content-Type", "image/jpeg")
            .body(bytes)
            .send()
            .await
            .map_err(|e| AiError::Storage(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AiError::Storage(format!(
                "upload failed with {status}: {text}"
            )));
        }

        Ok(format!("{}/{}", self.cdn_url, key))
    }
}
