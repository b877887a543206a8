//! Remote assistant relay.
//!
//! Forwards a conversation to a generative-language HTTP endpoint and returns
//! the text completion. Callers never show a raw [`RelayError`] to the user;
//! they substitute [`CHAT_FALLBACK`] (or a task specific fallback) instead.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::RelayError;

/// shown in place of a reply when the assistant cannot be reached
pub const CHAT_FALLBACK: &str = "Neural Link connection anomaly detected. Retrying connection...";

/// used when the upstream answered but carried no text
pub const PARSE_FALLBACK: &str = "Neural Link error: Failed to parse response from AI core.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// something that can answer a conversation
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RelayError>;
}

fn http_client(timeout: Duration) -> Result<Client, RelayError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// talks to a Gemini `generateContent` endpoint directly
#[derive(Debug, Clone)]
pub struct GeminiClient {
    endpoint: String,
    api_key: Option<String>,
    http: Client,
}

impl GeminiClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RelayError> {
        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            http: http_client(timeout)?,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Builds the `generateContent` body.
    ///
    /// The system message is folded into a single user turn together with
    /// the serialized history, which uses Gemini's `user`/`model` roles.
    pub fn build_request(messages: &[ChatMessage]) -> serde_json::Value {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let history: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();
        let history = serde_json::to_string(&history).unwrap_or_default();

        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": format!("{}\n\nRespond to this conversation:\n{}", system, history) }]
            }],
            "generationConfig": {
                "temperature": 0.7,
                "maxOutputTokens": 1000
            }
        })
    }

    /// first candidate's first text part
    pub fn extract_text(body: &serde_json::Value) -> Option<String> {
        body.pointer("/candidates/0/content/parts/0/text")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

#[async_trait]
impl Assistant for GeminiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RelayError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RelayError::NotConfigured("ASSISTANT_API_KEY is not set".to_string()))?;
        if !messages.iter().any(|m| m.role == Role::User) {
            return Err(RelayError::EmptyConversation);
        }

        tracing::debug!("Relaying {} messages to assistant", messages.len());
        let res = self
            .http
            .post(&self.endpoint)
            .query(&[("key", key)])
            .json(&Self::build_request(messages))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            tracing::error!("Assistant returned {}: {}", status, body);
            return Err(RelayError::Upstream { status, body });
        }

        let body: serde_json::Value = res.json().await?;
        Ok(Self::extract_text(&body).unwrap_or_else(|| PARSE_FALLBACK.to_string()))
    }
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct RelayResponse {
    response: Option<String>,
    error: Option<String>,
}

/// talks to another `/api/chat` style relay: `{messages}` in, `{response}` out
#[derive(Debug, Clone)]
pub struct RelayClient {
    endpoint: String,
    http: Client,
}

impl RelayClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RelayError> {
        Ok(Self {
            endpoint: endpoint.into(),
            http: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl Assistant for RelayClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RelayError> {
        let res = self
            .http
            .post(&self.endpoint)
            .json(&RelayRequest { messages })
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        let parsed: Option<RelayResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let body = parsed.and_then(|p| p.error).unwrap_or(text);
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(parsed
            .and_then(|p| p.response)
            .unwrap_or_else(|| PARSE_FALLBACK.to_string()))
    }
}
