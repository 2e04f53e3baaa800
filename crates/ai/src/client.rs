//! Async LLM and image generation client
//!
//! Speaks the YandexGPT-style contract: an asynchronous completion request
//! returns an operation id, and a poll endpoint reports `done` with either
//! text alternatives or an error. Image generation returns a base64 payload.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AiError, AiResult};

/// One chat message in a generation request
#[derive(Debug, Clone, Serialize)]
pub struct LlmMessage {
    pub role: String,
    pub text: String,
}

impl LlmMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            text: text.into(),
        }
    }
}

/// Result of polling an asynchronous operation
#[derive(Debug, Clone)]
pub enum LlmOperation {
    Pending,
    Done { text: String },
    Failed { message: String },
}

/// Result of polling an image operation
#[derive(Debug, Clone)]
pub enum ImageOperation {
    Pending,
    Done { image_base64: String },
    Failed { message: String },
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    response: Option<OperationResult>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    message: AlternativeMessage,
}

#[derive(Debug, Deserialize)]
struct AlternativeMessage {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

/// LLM provider client
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    folder_id: String,
    completion_url: String,
    image_url: String,
    operation_url: String,
}

impl LlmClient {
    pub fn new(
        http: reqwest::Client,
        api_key: String,
        folder_id: String,
        completion_url: String,
        image_url: String,
        operation_url: String,
    ) -> Self {
        Self {
            http,
            api_key,
            folder_id,
            completion_url,
            image_url,
            operation_url,
        }
    }

    /// Start an asynchronous text generation; returns the operation id
    pub async fn start_completion(
        &self,
        model: &str,
        temperature: f64,
        max_tokens: u32,
        messages: &[LlmMessage],
    ) -> AiResult<String> {
        let body = json!({
            "modelUri": format!("gpt://{}/{}", self.folder_id, model),
            "completionOptions": {
                "temperature": temperature,
                "maxTokens": max_tokens,
            },
            "messages": messages,
        });

        let response = self
            .http
            .post(&self.completion_url)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AiError::Provider(format!(
                "completion start failed with {status}: {}",
                truncate(&text, 256)
            )));
        }

        let started: StartResponse = response
            .json()
            .await
            .map_err(|e| AiError::Provider(format!("malformed start response: {e}")))?;
        Ok(started.id)
    }

    /// Start an asynchronous image generation; returns the operation id
    pub async fn start_image(&self, prompt: &str) -> AiResult<String> {
        let body = json!({
            "modelUri": format!("art://{}/yandex-art/latest", self.folder_id),
            "generationOptions": { "seed": 0 },
            "messages": [{ "weight": 1, "text": prompt }],
        });

        let response = self
            .http
            .post(&self.image_url)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AiError::Provider(format!(
                "image start failed with {status}: {}",
                truncate(&text, 256)
            )));
        }

        let started: StartResponse = response
            .json()
            .await
            .map_err(|e| AiError::Provider(format!("malformed start response: {e}")))?;
        Ok(started.id)
    }

    /// Poll a text operation
    pub async fn poll_operation(&self, operation_id: &str) -> AiResult<LlmOperation> {
        let op = self.fetch_operation(operation_id).await?;

        if !op.done {
            return Ok(LlmOperation::Pending);
        }
        if let Some(error) = op.error {
            return Ok(LlmOperation::Failed {
                message: error.message,
            });
        }
        let text = op
            .response
            .and_then(|r| r.alternatives.into_iter().next())
            .map(|a| a.message.text)
            .unwrap_or_default();
        if text.is_empty() {
            return Ok(LlmOperation::Failed {
                message: "operation finished without text".to_string(),
            });
        }
        Ok(LlmOperation::Done { text })
    }

    /// Poll an image operation
    pub async fn poll_image(&self, operation_id: &str) -> AiResult<ImageOperation> {
        let op = self.fetch_operation(operation_id).await?;

        if !op.done {
            return Ok(ImageOperation::Pending);
        }
        if let Some(error) = op.error {
            return Ok(ImageOperation::Failed {
                message: error.message,
            });
        }
        match op.response.and_then(|r| r.image) {
            Some(image_base64) if !image_base64.is_empty() => {
                Ok(ImageOperation::Done { image_base64 })
            }
            _ => Ok(ImageOperation::Failed {
                message: "operation finished without an image".to_string(),
            }),
        }
    }

    async fn fetch_operation(&self, operation_id: &str) -> AiResult<OperationResponse> {
        let response = self
            .http
            .get(format!("{}/{}", self.operation_url, operation_id))
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AiError::Provider(format!(
                "operation poll failed with {status}: {}",
                truncate(&text, 256)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AiError::Provider(format!("malformed operation response: {e}")))
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

    fn client(url: &str) -> LlmClient {
        LlmClient::new(
            reqwest::Client::new(),
            "key".to_string(),
            "folder".to_string(),
            format!("{url}/completionAsync"),
            format!("{url}/imageGenerationAsync"),
            format!("{url}/operations"),
        )
    }

    #[tokio::test]
    async fn start_completion_returns_operation_id() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/completionAsync")
            .with_status(200)
            .with_body(r#"{"id": "op-123"}"#)
            .create_async()
            .await;

        let id = client(&server.url())
            .start_completion("yandexgpt-lite/latest", 0.4, 4000, &[LlmMessage::user("hi")])
            .await
            .unwrap();
        assert_eq!(id, "op-123");
    }

    #[tokio::test]
    async fn poll_maps_pending_done_and_failed() {
        let mut server = mockito::Server::new_async().await;
        let _pending = server
            .mock("GET", "/operations/op-1")
            .with_status(200)
            .with_body(r#"{"done": false}"#)
            .create_async()
            .await;
        let _done = server
            .mock("GET", "/operations/op-2")
            .with_status(200)
            .with_body(
                r#"{"done": true, "response": {"alternatives": [{"message": {"role": "assistant", "text": "hello"}}]}}"#,
            )
            .create_async()
            .await;
        let _failed = server
            .mock("GET", "/operations/op-3")
            .with_status(200)
            .with_body(r#"{"done": true, "error": {"message": "quota exceeded"}}"#)
            .create_async()
            .await;

        let c = client(&server.url());
        assert!(matches!(
            c.poll_operation("op-1").await.unwrap(),
            LlmOperation::Pending
        ));
        match c.poll_operation("op-2").await.unwrap() {
            LlmOperation::Done { text } => assert_eq!(text, "hello"),
            other => panic!("expected Done, got {other:?}"),
        }
        match c.poll_operation("op-3").await.unwrap() {
            LlmOperation::Failed { message } => assert_eq!(message, "quota exceeded"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_provider_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/completionAsync")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = client(&server.url())
            .start_completion("yandexgpt-lite/latest", 0.4, 4000, &[LlmMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Provider(_)));
    }
}
