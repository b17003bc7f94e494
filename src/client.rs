//! Chat-completion API collaborator.
//!
//! The core only depends on [`ChatClient`]; the HTTP implementation talks
//! the OpenAI-compatible `/chat/completions` shape.

use crate::error::{BridgeError, Result};
use crate::transcript::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Request/response seam to the remote model. Transport is opaque to the
/// dispatcher.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send the full ordered message history and return the reply text.
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String>;
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: String,
}

/// `reqwest`-backed client for an OpenAI-compatible endpoint.
pub struct HttpChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpChatClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn complete(&self, model: &str, messages: &[Message]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!("POST {} with {} messages", url, messages.len());

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&ChatCompletionRequest { model, messages })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::RemoteCallFailed(format!("{status}: {body}")));
        }

        let parsed: ChatCompletionResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| BridgeError::RemoteCallFailed("response contained no choices".into()))
    }
}
