//! Narrative generation.
//!
//! A provider-agnostic [`Llm`] trait with an OpenAI chat-completions
//! backend and a deterministic [`MockLlm`] for tests and offline runs.
//! [`Generator`] consumes already-assembled prompts; it performs no
//! retrieval or prompt construction of its own.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// A language-model backend. Implementations must be stateless and
/// thread-safe.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Produce text from a prompt using the configured model.
    async fn generate(&self, ctx: &CancellationToken, prompt: &str) -> Result<String>;
}

/// Common configuration for LLM providers.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model identifier (e.g. `"gpt-4o"`).
    pub model: String,
    /// Sampling temperature; 0 leaves the provider default in place.
    pub temperature: f32,
    /// Response-length cap; 0 leaves the provider default in place.
    pub max_tokens: u32,
    /// Explicit API key; falls back to `OPENAI_API_KEY` when empty.
    pub api_key: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 2000,
            api_key: String::new(),
        }
    }
}

/// A generated human-readable explanation of an episode.
#[derive(Debug, Clone, Serialize)]
pub struct Narrative {
    /// The episode this narrative describes.
    pub episode_id: String,
    /// Generated narrative content.
    pub text: String,
    pub generated_at: DateTime<Utc>,
    /// The model that produced the text.
    pub model: String,
}

/// LLM backend over the OpenAI chat completions API.
#[derive(Debug)]
pub struct OpenAiLlm {
    http: reqwest::Client,
    api_key: String,
    config: LlmConfig,
}

impl OpenAiLlm {
    /// Build a backend; fails with [`Error::MissingCredentials`] when no
    /// API key is available.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = if config.api_key.is_empty() {
            std::env::var("OPENAI_API_KEY").unwrap_or_default()
        } else {
            config.api_key.clone()
        };
        if api_key.is_empty() {
            return Err(Error::MissingCredentials("OPENAI_API_KEY"));
        }
        if config.model.is_empty() {
            return Err(Error::InvalidInput("missing model name".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::LlmFailed(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            config,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Llm for OpenAiLlm {
    async fn generate(&self, ctx: &CancellationToken, prompt: &str) -> Result<String> {
        if prompt.is_empty() {
            return Err(Error::InvalidInput("prompt cannot be empty".to_string()));
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled("llm generation"));
        }

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if self.config.temperature > 0.0 {
            body["temperature"] = serde_json::json!(self.config.temperature);
        }
        if self.config.max_tokens > 0 {
            body["max_tokens"] = serde_json::json!(self.config.max_tokens);
        }

        let request = self
            .http
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = ctx.cancelled() => return Err(Error::Cancelled("llm generation")),
            response = request => response.map_err(|e| Error::LlmFailed(e.to_string()))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::LlmFailed(format!("provider error {status}: {body_text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::LlmFailed(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::LlmFailed("no response generated".to_string()))?;
        Ok(choice.message.content)
    }
}

/// Deterministic in-process backend for tests and offline runs: echoes a
/// canned response (or a digest of the prompt) without any I/O.
#[derive(Debug, Clone, Default)]
pub struct MockLlm {
    /// When set, returned verbatim for every prompt.
    pub response: Option<String>,
    /// When set, every call fails with this message.
    pub fail_with: Option<String>,
}

impl MockLlm {
    pub fn returning(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            fail_with: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            response: None,
            fail_with: Some(message.into()),
        }
    }
}

#[async_trait]
impl Llm for MockLlm {
    async fn generate(&self, ctx: &CancellationToken, prompt: &str) -> Result<String> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled("llm generation"));
        }
        if let Some(message) = &self.fail_with {
            return Err(Error::LlmFailed(message.clone()));
        }
        match &self.response {
            Some(response) => Ok(response.clone()),
            None => Ok(format!("mock narrative over {} prompt bytes", prompt.len())),
        }
    }
}

/// Produces narratives from assembled prompts via an [`Llm`] backend.
pub struct Generator {
    llm: Box<dyn Llm>,
    model: String,
}

impl Generator {
    pub fn new(llm: Box<dyn Llm>, config: &LlmConfig) -> Self {
        Self {
            llm,
            model: config.model.clone(),
        }
    }

    /// Invoke the backend with an already-assembled prompt.
    pub async fn generate(
        &self,
        ctx: &CancellationToken,
        episode_id: &str,
        prompt: &str,
    ) -> Result<Narrative> {
        if episode_id.is_empty() {
            return Err(Error::GenerationFailed("episode id is required".to_string()));
        }
        if prompt.is_empty() {
            return Err(Error::GenerationFailed("prompt is required".to_string()));
        }

        let text = self
            .llm
            .generate(ctx, prompt)
            .await
            .map_err(|e| match e {
                Error::Cancelled(stage) => Error::Cancelled(stage),
                other => Error::GenerationFailed(format!("LLM invocation failed: {other}")),
            })?;

        Ok(Narrative {
            episode_id: episode_id.to_string(),
            text,
            generated_at: Utc::now(),
            model: self.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn generator_returns_narrative_with_model() {
        let generator = Generator::new(
            Box::new(MockLlm::returning("the work happened")),
            &LlmConfig::default(),
        );
        let narrative = generator.generate(&ctx(), "E1", "a prompt").await.unwrap();
        assert_eq!(narrative.episode_id, "E1");
        assert_eq!(narrative.text, "the work happened");
        assert_eq!(narrative.model, "gpt-4o");
    }

    #[tokio::test]
    async fn generator_validates_inputs() {
        let generator = Generator::new(Box::new(MockLlm::default()), &LlmConfig::default());

        let err = generator.generate(&ctx(), "", "prompt").await.unwrap_err();
        assert!(matches!(err, Error::GenerationFailed(_)));

        let err = generator.generate(&ctx(), "E1", "").await.unwrap_err();
        assert!(matches!(err, Error::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn llm_failure_becomes_generation_failed() {
        let generator = Generator::new(
            Box::new(MockLlm::failing("upstream down")),
            &LlmConfig::default(),
        );
        let err = generator.generate(&ctx(), "E1", "prompt").await.unwrap_err();
        match err {
            Error::GenerationFailed(message) => assert!(message.contains("upstream down")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stays_detectable() {
        let generator = Generator::new(Box::new(MockLlm::default()), &LlmConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        let err = generator.generate(&token, "E1", "prompt").await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn openai_backend_requires_credentials() {
        let config = LlmConfig {
            api_key: String::new(),
            ..LlmConfig::default()
        };
        // Only run the negative check when the environment has no key.
        if std::env::var("OPENAI_API_KEY").unwrap_or_default().is_empty() {
            let err = OpenAiLlm::new(config).unwrap_err();
            assert!(matches!(err, Error::MissingCredentials(_)));
        }
    }
}
