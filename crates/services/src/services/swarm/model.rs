//! Model Invocation Collaborator
//!
//! The language model every bee "thinks" with is an external collaborator:
//! an opaque `invoke(prompt, context) -> text` call that may be slow or fail.
//! The executor only sees the `ModelInvoker` trait; the HTTP client here is
//! one implementation of it.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use db::models::bee_signal::SignalType;

/// Errors from the model collaborator.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("model invocation failed: {0}")]
    Invocation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// One model completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    /// Tokens consumed by this invocation, when the backend reports them.
    #[serde(default)]
    pub tokens: i64,
}

/// The opaque model collaborator the executor depends on.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, prompt: &str, context: &str) -> Result<ModelResponse, ModelError>;
}

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    context: &'a str,
}

/// HTTP-backed model invoker: POSTs `{prompt, context}` to a completion
/// endpoint and expects `{text, tokens}` back.
pub struct HttpModelInvoker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpModelInvoker {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ModelError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl ModelInvoker for HttpModelInvoker {
    async fn invoke(&self, prompt: &str, context: &str) -> Result<ModelResponse, ModelError> {
        let url = format!("{}/v1/completions", self.base_url.trim_end_matches('/'));

        let mut request = self
            .client
            .post(&url)
            .json(&CompletionRequest { prompt, context });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ModelResponse>()
            .await
            .map_err(|e| ModelError::Invocation(e.to_string()))
    }
}

// Static regex patterns compiled once for performance
static SIGNAL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^SIGNAL:\s*(hold|info|warning|escalate)\s*(?:\|\s*([^\n]+))?\s*$")
        .expect("Invalid SIGNAL regex")
});
static SIGNAL_CLEAN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^SIGNAL:\s*[^\n]+\n*").expect("Invalid SIGNAL_CLEAN regex")
});

/// Extract a signal request from a bee's output. Bees raise signals by
/// emitting a `SIGNAL: <type> | <message>` line.
pub fn extract_signal(text: &str) -> Option<(SignalType, String)> {
    SIGNAL_REGEX.captures(text).map(|caps| {
        let signal_type = caps
            .get(1)
            .and_then(|m| m.as_str().to_lowercase().parse::<SignalType>().ok())
            .unwrap_or_default();
        let message = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| "no message provided".to_string());
        (signal_type, message)
    })
}

/// Remove SIGNAL: lines so they never leak into handover summaries or the
/// synthesized response.
pub fn strip_signal_markers(text: &str) -> String {
    SIGNAL_CLEAN_REGEX.replace_all(text, "").trim().to_string()
}
