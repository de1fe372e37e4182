//! AI vision comparison providers.
//!
//! Every provider, whatever its backend, answers the same question with the
//! same shape:
//! - `VisionProvider`: async trait, two screenshots in, [`AiDiffResult`] out
//! - `prompt`: the shared comparison prompt and strict-JSON response parsing
//! - `openai`: OpenAI-compatible HTTP provider (OpenAI, Groq, OpenRouter)
//! - `FallbackChain`: tries providers in order until one answers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::result::{MirarError, MirarResult};

pub mod prompt;

#[cfg(feature = "vision")]
pub mod openai;

#[cfg(feature = "vision")]
pub use openai::{OpenAiVisionProvider, ProviderKind};

/// Category of a detected visual change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Elements moved or reflowed
    Layout,
    /// Colors shifted
    Color,
    /// Text or media content changed
    Content,
    /// An element present in the baseline is gone
    Missing,
    /// An element absent from the baseline appeared
    Added,
}

/// Severity of a detected visual change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic
    Low,
    /// Noticeable
    Medium,
    /// Breaks the page
    High,
}

/// Approximate location of a change, in baseline pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRegion {
    /// X coordinate of top-left corner
    pub x: u32,
    /// Y coordinate of top-left corner
    pub y: u32,
    /// Region width
    pub width: u32,
    /// Region height
    pub height: u32,
}

/// One visual change reported by a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionChange {
    /// Category of the change
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// What changed
    pub description: String,
    /// How bad it is
    pub severity: Severity,
    /// Where it is, when the provider can localize it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<ChangeRegion>,
}

/// Structured verdict from an AI vision comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiDiffResult {
    /// Whether the provider judged the screenshots meaningfully different
    pub is_different: bool,
    /// Provider confidence in its verdict, 0 to 100
    pub confidence: f64,
    /// Individual changes detected
    pub changes: Vec<VisionChange>,
    /// Free-text summary of the verdict
    pub explanation: String,
    /// Tokens consumed by the request
    pub tokens_used: u32,
    /// Wall-clock time of the provider call in milliseconds
    pub processing_time_ms: u64,
    /// Model that produced the verdict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AiDiffResult {
    /// The zero-information result a malformed provider response degrades
    /// to. Comparison proceeds on pixel evidence alone.
    #[must_use]
    pub fn degraded(explanation: impl Into<String>) -> Self {
        Self {
            is_different: false,
            confidence: 0.0,
            changes: Vec::new(),
            explanation: explanation.into(),
            tokens_used: 0,
            processing_time_ms: 0,
            model: None,
        }
    }
}

/// A backend able to compare two screenshots semantically.
///
/// Implementations must be cheap to call concurrently; the execution queue
/// may run several comparisons at once against the same provider.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Stable provider name used in logs and result metadata
    fn name(&self) -> &str;

    /// Compare two PNG screenshots, optionally with page context
    async fn compare(
        &self,
        baseline: &[u8],
        current: &[u8],
        context: Option<&str>,
    ) -> MirarResult<AiDiffResult>;
}

/// Ordered provider chain: each provider is tried in turn and the first
/// answer wins. Individual failures are logged and absorbed; only a fully
/// exhausted chain surfaces an error.
pub struct FallbackChain {
    providers: Vec<Arc<dyn VisionProvider>>,
}

impl FallbackChain {
    /// Build a chain from providers in fallback order
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn VisionProvider>>) -> Self {
        Self { providers }
    }

    /// Number of providers in the chain
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// True when the chain has no providers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("FallbackChain").field("providers", &names).finish()
    }
}

#[async_trait]
impl VisionProvider for FallbackChain {
    fn name(&self) -> &str {
        "fallback-chain"
    }

    async fn compare(
        &self,
        baseline: &[u8],
        current: &[u8],
        context: Option<&str>,
    ) -> MirarResult<AiDiffResult> {
        for provider in &self.providers {
            match provider.compare(baseline, current, context).await {
                Ok(result) => {
                    debug!("Vision provider {} answered", provider.name());
                    return Ok(result);
                }
                Err(e) => {
                    warn!("Vision provider {} failed, trying next: {}", provider.name(), e);
                }
            }
        }
        Err(MirarError::ProviderUnavailable {
            attempted: self.providers.len(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that records its invocation order and answers or fails on
    /// command
    struct ScriptedProvider {
        name: String,
        fails: bool,
        calls: Arc<AtomicUsize>,
        order: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl VisionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn compare(
            &self,
            _baseline: &[u8],
            _current: &[u8],
            _context: Option<&str>,
        ) -> MirarResult<AiDiffResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.name.clone());
            if self.fails {
                Err(MirarError::Provider {
                    provider: self.name.clone(),
                    message: "scripted failure".to_string(),
                })
            } else {
                Ok(AiDiffResult {
                    is_different: true,
                    confidence: 88.0,
                    changes: Vec::new(),
                    explanation: format!("answered by {}", self.name),
                    tokens_used: 10,
                    processing_time_ms: 1,
                    model: Some(self.name.clone()),
                })
            }
        }
    }

    fn scripted(
        name: &str,
        fails: bool,
        order: &Arc<std::sync::Mutex<Vec<String>>>,
    ) -> (Arc<dyn VisionProvider>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(ScriptedProvider {
            name: name.to_string(),
            fails,
            calls: Arc::clone(&calls),
            order: Arc::clone(order),
        });
        (provider, calls)
    }

    #[tokio::test]
    async fn chain_stops_at_first_success() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (first, first_calls) = scripted("groq", false, &order);
        let (second, second_calls) = scripted("openai", false, &order);
        let chain = FallbackChain::new(vec![first, second]);

        let result = chain.compare(b"a", b"b", None).await.unwrap();
        assert_eq!(result.explanation, "answered by groq");
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chain_falls_through_failures_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (a, _) = scripted("groq", true, &order);
        let (b, _) = scripted("openai_router", true, &order);
        let (c, _) = scripted("openai", false, &order);
        let chain = FallbackChain::new(vec![a, b, c]);

        let result = chain.compare(b"a", b"b", None).await.unwrap();
        assert_eq!(result.explanation, "answered by openai");
        assert_eq!(
            *order.lock().unwrap(),
            vec!["groq", "openai_router", "openai"]
        );
    }

    #[tokio::test]
    async fn exhausted_chain_reports_attempt_count() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (a, _) = scripted("groq", true, &order);
        let (b, _) = scripted("openai", true, &order);
        let chain = FallbackChain::new(vec![a, b]);

        let err = chain.compare(b"a", b"b", None).await.unwrap_err();
        assert!(matches!(
            err,
            MirarError::ProviderUnavailable { attempted: 2 }
        ));
    }

    #[test]
    fn degraded_result_carries_no_signal() {
        let result = AiDiffResult::degraded("parse failed");
        assert!(!result.is_different);
        assert!((result.confidence - 0.0).abs() < f64::EPSILON);
        assert!(result.changes.is_empty());
        assert_eq!(result.explanation, "parse failed");
    }

    #[test]
    fn change_serializes_with_type_key_and_lowercase_taxonomy() {
        let change = VisionChange {
            change_type: ChangeType::Layout,
            description: "navbar shifted down".to_string(),
            severity: Severity::High,
            region: Some(ChangeRegion {
                x: 0,
                y: 0,
                width: 1280,
                height: 80,
            }),
        };
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("\"type\":\"layout\""));
        assert!(json.contains("\"severity\":\"high\""));
    }

    #[test]
    fn ai_result_serializes_camel_case() {
        let result = AiDiffResult::degraded("none");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"isDifferent\""));
        assert!(json.contains("\"tokensUsed\""));
        assert!(json.contains("\"processingTimeMs\""));
    }
}
