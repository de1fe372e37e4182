//! OpenAI-compatible HTTP vision provider.
//!
//! OpenAI, Groq, and OpenRouter all expose the same
//! `/v1/chat/completions` wire protocol with image attachments, so one
//! client type serves all three; [`ProviderKind`] selects the base URL and
//! default model.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{prompt, AiDiffResult, VisionProvider};
use crate::result::{MirarError, MirarResult};

/// Default per-request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default completion budget for a comparison response
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Which OpenAI-compatible backend a provider talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// api.openai.com
    OpenAi,
    /// api.groq.com, OpenAI-compatible endpoint
    Groq,
    /// openrouter.ai aggregator
    OpenAiRouter,
}

impl ProviderKind {
    /// Stable name used in logs, result metadata, and configuration
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::OpenAiRouter => "openai_router",
        }
    }

    /// Base URL the client appends `/v1/chat/completions` to
    #[must_use]
    pub const fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com",
            Self::Groq => "https://api.groq.com/openai",
            Self::OpenAiRouter => "https://openrouter.ai/api",
        }
    }

    /// Default vision-capable model for this backend
    #[must_use]
    pub const fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o",
            Self::Groq => "meta-llama/llama-4-scout-17b-16e-instruct",
            Self::OpenAiRouter => "openai/gpt-4o",
        }
    }
}

/// Vision comparison client for one OpenAI-compatible backend
#[derive(Debug, Clone)]
pub struct OpenAiVisionProvider {
    kind: ProviderKind,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiVisionProvider {
    /// Create a provider with the backend's default base URL, model, and a
    /// hard per-request timeout
    pub fn new(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            kind,
            base_url: kind.default_base_url().to_string(),
            api_key: api_key.into(),
            model: kind.default_model().to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            client,
        }
    }

    /// Point the provider at a different base URL (self-hosted gateways)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the completion token budget
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Replace the HTTP client (custom timeouts, proxies)
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Returns the base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the model name
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn provider_error(&self, message: impl Into<String>) -> MirarError {
        MirarError::Provider {
            provider: self.kind.name().to_string(),
            message: message.into(),
        }
    }
}

fn data_url(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

/// One part of a multi-part chat message
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    /// Plain text part
    Text {
        /// The text
        text: String,
    },
    /// Attached image part
    ImageUrl {
        /// Image reference
        image_url: ImageUrl,
    },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct VisionMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
struct VisionRequest {
    model: String,
    messages: Vec<VisionMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct VisionResponse {
    choices: Vec<VisionChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct VisionChoice {
    message: VisionResponseMessage,
}

#[derive(Debug, Deserialize)]
struct VisionResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

#[async_trait]
impl VisionProvider for OpenAiVisionProvider {
    fn name(&self) -> &str {
        self.kind.name()
    }

    async fn compare(
        &self,
        baseline: &[u8],
        current: &[u8],
        context: Option<&str>,
    ) -> MirarResult<AiDiffResult> {
        let request = VisionRequest {
            model: self.model.clone(),
            messages: vec![VisionMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: prompt::build_compare_prompt(context),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url(baseline),
                        },
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url(current),
                        },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let start = Instant::now();

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.provider_error(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.provider_error(format!("API error {status}: {body}")));
        }

        let response: VisionResponse = resp
            .json()
            .await
            .map_err(|e| self.provider_error(format!("malformed response body: {e}")))?;

        let content = response
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();
        let tokens_used = response.usage.unwrap_or_default().total_tokens;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        Ok(prompt::parse_response(
            content,
            &self.model,
            tokens_used,
            elapsed_ms,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_defaults() {
        assert_eq!(ProviderKind::OpenAi.name(), "openai");
        assert_eq!(ProviderKind::Groq.default_base_url(), "https://api.groq.com/openai");
        assert_eq!(ProviderKind::OpenAiRouter.name(), "openai_router");
        assert_eq!(ProviderKind::OpenAi.default_model(), "gpt-4o");
    }

    #[test]
    fn test_provider_creation_uses_kind_defaults() {
        let provider = OpenAiVisionProvider::new(ProviderKind::Groq, "gsk_test");
        assert_eq!(provider.base_url(), "https://api.groq.com/openai");
        assert_eq!(
            provider.model(),
            "meta-llama/llama-4-scout-17b-16e-instruct"
        );
        assert_eq!(provider.name(), "groq");
    }

    #[test]
    fn test_base_url_override_strips_trailing_slash() {
        let provider = OpenAiVisionProvider::new(ProviderKind::OpenAi, "sk-test")
            .with_base_url("http://localhost:8081/");
        assert_eq!(provider.base_url(), "http://localhost:8081");
    }

    #[test]
    fn test_model_override() {
        let provider =
            OpenAiVisionProvider::new(ProviderKind::OpenAi, "sk-test").with_model("gpt-4o-mini");
        assert_eq!(provider.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_content_parts_serialize_with_type_tags() {
        let parts = vec![
            ContentPart::Text {
                text: "compare".to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/png;base64,AAAA".to_string(),
                },
            },
        ];
        let json = serde_json::to_string(&parts).unwrap();
        assert!(json.contains("\"type\":\"text\""));
        assert!(json.contains("\"type\":\"image_url\""));
        assert!(json.contains("\"image_url\":{\"url\""));
    }

    #[test]
    fn test_data_url_prefix() {
        let url = data_url(&[0x89, 0x50, 0x4E, 0x47]);
        assert!(url.starts_with("data:image/png;base64,"));
        assert!(url.ends_with("iVBORw=="));
    }

    #[test]
    fn test_response_deserialization() {
        let json = r#"{
            "id": "chatcmpl-9",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"isDifferent\": false}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 900, "completion_tokens": 40, "total_tokens": 940}
        }"#;
        let resp: VisionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.usage.unwrap().total_tokens, 940);
    }

    #[test]
    fn test_response_without_usage() {
        let json = r#"{"choices": []}"#;
        let resp: VisionResponse = serde_json::from_str(json).unwrap();
        assert!(resp.choices.is_empty());
        assert!(resp.usage.is_none());
    }
}
