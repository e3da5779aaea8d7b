use std::time::Duration;

use async_trait::async_trait;
use repolens_core::{LlmConfig, RepolensError};
use serde::{Deserialize, Serialize};

use crate::fetcher::AnalysisBackend;

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use repolens_review::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage {
///     role: Role::User,
///     content: "Review this repository".into(),
/// };
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

/// Role in the chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider that exposes the `/v1/chat/completions` endpoint:
/// OpenAI, Ollama, vLLM, LiteLLM, etc. Every failure is reported as
/// [`RepolensError::BackendUnavailable`].
///
/// # Examples
///
/// ```
/// use repolens_core::LlmConfig;
/// use repolens_review::llm::LlmClient;
///
/// let config = LlmConfig {
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = LlmClient::new(&config).unwrap();
/// assert_eq!(client.model(), "gpt-4o");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    url: String,
}

impl LlmClient {
    /// Create a new LLM client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::Config`] if the provider has no known endpoint
    /// and no `base_url` is set, [`RepolensError::BackendUnavailable`] if the
    /// HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, RepolensError> {
        let url = config.chat_completions_url().ok_or_else(|| {
            RepolensError::Config(format!(
                "provider '{}' needs llm.base_url (or REPOLENS_LLM_BASE_URL)",
                config.provider
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| {
                RepolensError::BackendUnavailable(format!("failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            config: config.clone(),
            url,
        })
    }

    /// Return the model name from the configuration.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a chat completion request and return the text response.
    ///
    /// Posts the messages to the provider's chat-completions endpoint with
    /// temperature 0.1.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::BackendUnavailable`] on HTTP errors or
    /// response parsing failures.
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, RepolensError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": 0.1,
        });

        let mut request = self.client.post(&self.url);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }
        request = request.header("Content-Type", "application/json");

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| RepolensError::BackendUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RepolensError::BackendUnavailable(format!(
                "LLM API error {status}: {body_text}"
            )));
        }

        let response_body: serde_json::Value = response.json().await.map_err(|e| {
            RepolensError::BackendUnavailable(format!("failed to parse response: {e}"))
        })?;

        extract_content(&response_body)
    }

    fn truncate_context<'a>(&self, context: &'a str) -> &'a str {
        // ~4 bytes per token
        match self.config.max_input_tokens {
            Some(tokens) => truncate_at_char_boundary(context, tokens.saturating_mul(4)),
            None => context,
        }
    }
}

#[async_trait]
impl AnalysisBackend for LlmClient {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, RepolensError> {
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: prompt.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: self.truncate_context(context).to_string(),
            },
        ];
        tracing::debug!(model = %self.config.model, bytes = context.len(), "sending completion request");
        self.chat(messages).await
    }
}

fn extract_content(response_body: &serde_json::Value) -> Result<String, RepolensError> {
    let content = response_body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            RepolensError::BackendUnavailable(format!(
                "unexpected response structure: {response_body}"
            ))
        })?;
    Ok(content.to_string())
}

/// Cut `s` to at most `max` bytes without splitting a UTF-8 character.
pub(crate) fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
