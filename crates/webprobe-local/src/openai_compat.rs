//! Chat-completions client for OpenAI-compatible gateways (OpenRouter by default).

use crate::config::{env, env_either};
use crate::retry::RetryPolicy;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use webprobe_core::{Error, Result};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Per-request ceiling; a rate-limit retry gets a fresh one.
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(120);

fn openrouter_api_key_from_env() -> Option<String> {
    env_either("WEBPROBE_OPENROUTER_API_KEY", "OPENROUTER_API_KEY")
}

fn openrouter_base_url_from_env() -> Option<String> {
    env("WEBPROBE_OPENROUTER_BASE_URL")
}

pub fn gateway_configured() -> bool {
    openrouter_api_key_from_env().is_some()
}

/// Routes chat requests to a single model behind an OpenAI-compatible gateway.
///
/// Messages and tool schemas are passed through as JSON values: the caller owns their shape.
#[derive(Debug, Clone)]
pub struct ChatGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ChatGateway {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
            retry: RetryPolicy::default(),
            timeout: CHAT_TIMEOUT,
        }
    }

    pub fn from_env(client: reqwest::Client, model: &str, temperature: f64) -> Result<Self> {
        let api_key = openrouter_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing WEBPROBE_OPENROUTER_API_KEY (or OPENROUTER_API_KEY)".to_string(),
            )
        })?;
        let base_url =
            openrouter_base_url_from_env().unwrap_or_else(|| OPENROUTER_BASE_URL.to_string());
        Ok(Self::new(client, base_url, api_key, model, temperature))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint_chat_completions(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Function-calling mode. `tools` is sent only when non-empty.
    pub async fn query_fc(&self, messages: &[Value], tools: &[Value]) -> Result<ChatCompletion> {
        let req = ChatCompletionsRequest {
            messages,
            model: &self.model,
            temperature: self.temperature,
            tools: (!tools.is_empty()).then_some(tools),
        };
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "chat.completions (fc)"
        );
        self.generate_with_backoff(&req).await
    }

    /// Prompting mode: plain messages, no tools.
    pub async fn query_prompting(&self, messages: &[Value]) -> Result<ChatCompletion> {
        let req = ChatCompletionsRequest {
            messages,
            model: &self.model,
            temperature: self.temperature,
            tools: None,
        };
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            "chat.completions (prompting)"
        );
        self.generate_with_backoff(&req).await
    }

    async fn generate_with_backoff(
        &self,
        req: &ChatCompletionsRequest<'_>,
    ) -> Result<ChatCompletion> {
        let mut backoff = self.retry.start();
        loop {
            match self.send(req).await {
                Err(Error::RateLimited(msg)) => {
                    let wait = backoff.next_wait();
                    tracing::warn!(
                        model = %self.model,
                        "{msg}; retrying in {:.1}s",
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }

    async fn send(&self, req: &ChatCompletionsRequest<'_>) -> Result<ChatCompletion> {
        let resp = self
            .client
            .post(self.endpoint_chat_completions())
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(req)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(format!("chat.completions HTTP {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Llm(format!(
                "chat.completions HTTP {status}: {}",
                body.chars().take(500).collect::<String>()
            )));
        }
        resp.json::<ChatCompletion>()
            .await
            .map_err(|e| Error::Llm(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest<'a> {
    messages: &'a [Value],
    model: &'a str,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    pub fn first_message(&self) -> Option<&AssistantMessage> {
        self.choices.first().map(|c| &c.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: AssistantMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as the model produced them.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}
