//! Hybrid comparison: deterministic pixels first, AI judgment on top.
//!
//! The pixel engine always runs and its numbers always win at the extremes.
//! AI analysis is consulted only in the ambiguous middle band, and a
//! provider outage never fails a comparison; the verdict just falls back to
//! raw pixel evidence.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::pixel::{
    MaskRegion, PixelCompareOptions, PixelDiffEngine, PixelDiffResult, DEFAULT_DIFF_THRESHOLD,
};
use crate::result::{MirarError, MirarResult};
use crate::vision::{AiDiffResult, FallbackChain, VisionProvider};

/// Default AI confidence required before the AI verdict is trusted
pub const DEFAULT_AI_THRESHOLD: f64 = 70.0;

/// Mismatch percentage below which screenshots are the same no matter what
/// the AI says
const MIN_MEANINGFUL_MISMATCH: f64 = 0.1;

/// AI confidence treated as high signal during confidence fusion
const HIGH_AI_CONFIDENCE: f64 = 80.0;

/// Which vision backend a comparison consults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSelection {
    /// OpenAI only
    #[serde(rename = "openai")]
    OpenAi,
    /// Groq only
    Groq,
    /// OpenRouter only
    #[serde(rename = "openai_router")]
    OpenAiRouter,
    /// Fallback chain: Groq, then OpenRouter, then OpenAI
    #[default]
    Hybrid,
}

impl ProviderSelection {
    /// Stable name used in configuration and logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::OpenAiRouter => "openai_router",
            Self::Hybrid => "hybrid",
        }
    }

    /// Parse a configuration value
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "groq" => Some(Self::Groq),
            "openai_router" => Some(Self::OpenAiRouter),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// Options for one hybrid comparison
#[derive(Debug, Clone)]
pub struct HybridDiffOptions {
    /// Pixel mismatch percentage above which AI analysis is invoked, and
    /// the threshold handed to the pixel engine
    pub pixel_threshold: f64,
    /// AI confidence required before the AI verdict is trusted
    pub ai_threshold: f64,
    /// Invoke AI analysis regardless of the pixel mismatch
    pub force_ai: bool,
    /// Consult AI at all; when false the verdict is pixel-only
    pub ai_enabled: bool,
    /// Vision backend to consult
    pub provider: ProviderSelection,
    /// Page context forwarded to the provider prompt
    pub context: Option<String>,
    /// Regions excluded from pixel comparison
    pub mask_regions: Vec<MaskRegion>,
}

impl Default for HybridDiffOptions {
    fn default() -> Self {
        Self {
            pixel_threshold: DEFAULT_DIFF_THRESHOLD,
            ai_threshold: DEFAULT_AI_THRESHOLD,
            force_ai: false,
            ai_enabled: true,
            provider: ProviderSelection::Hybrid,
            context: None,
            mask_regions: Vec::new(),
        }
    }
}

impl HybridDiffOptions {
    /// Create options with default thresholds and the hybrid chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pixel threshold percentage
    #[must_use]
    pub const fn with_pixel_threshold(mut self, threshold: f64) -> Self {
        self.pixel_threshold = threshold;
        self
    }

    /// Set the AI confidence gate
    #[must_use]
    pub const fn with_ai_threshold(mut self, threshold: f64) -> Self {
        self.ai_threshold = threshold;
        self
    }

    /// Always invoke AI analysis
    #[must_use]
    pub const fn with_force_ai(mut self, force: bool) -> Self {
        self.force_ai = force;
        self
    }

    /// Allow or forbid AI analysis entirely
    #[must_use]
    pub const fn with_ai_enabled(mut self, enabled: bool) -> Self {
        self.ai_enabled = enabled;
        self
    }

    /// Select the vision backend
    #[must_use]
    pub const fn with_provider(mut self, provider: ProviderSelection) -> Self {
        self.provider = provider;
        self
    }

    /// Attach page context for the provider prompt
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Add a mask region
    #[must_use]
    pub fn with_mask(mut self, mask: MaskRegion) -> Self {
        self.mask_regions.push(mask);
        self
    }
}

/// Fused outcome of a hybrid comparison
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridDiffResult {
    /// Final verdict after fusing pixel and AI evidence
    pub is_different: bool,
    /// Fused confidence, 0 to 100
    pub confidence: f64,
    /// The deterministic pixel comparison that always ran
    pub pixel_analysis: PixelDiffResult,
    /// AI analysis, when one was invoked and answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<AiDiffResult>,
    /// Human-readable summary of the verdict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// End-to-end comparison time in milliseconds
    pub execution_time_ms: u64,
}

/// Two-stage comparison engine
pub struct HybridDiffEngine {
    pixel: PixelDiffEngine,
    openai: Option<Arc<dyn VisionProvider>>,
    groq: Option<Arc<dyn VisionProvider>>,
    openai_router: Option<Arc<dyn VisionProvider>>,
}

impl Default for HybridDiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HybridDiffEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridDiffEngine")
            .field("openai", &self.openai.is_some())
            .field("groq", &self.groq.is_some())
            .field("openai_router", &self.openai_router.is_some())
            .finish()
    }
}

impl HybridDiffEngine {
    /// Create an engine with no vision providers; comparisons are
    /// pixel-only until providers are registered
    #[must_use]
    pub fn new() -> Self {
        Self {
            pixel: PixelDiffEngine::new(),
            openai: None,
            groq: None,
            openai_router: None,
        }
    }

    /// Replace the pixel engine
    #[must_use]
    pub fn with_pixel_engine(mut self, pixel: PixelDiffEngine) -> Self {
        self.pixel = pixel;
        self
    }

    /// Register the OpenAI slot
    #[must_use]
    pub fn with_openai(mut self, provider: Arc<dyn VisionProvider>) -> Self {
        self.openai = Some(provider);
        self
    }

    /// Register the Groq slot
    #[must_use]
    pub fn with_groq(mut self, provider: Arc<dyn VisionProvider>) -> Self {
        self.groq = Some(provider);
        self
    }

    /// Register the OpenRouter slot
    #[must_use]
    pub fn with_openai_router(mut self, provider: Arc<dyn VisionProvider>) -> Self {
        self.openai_router = Some(provider);
        self
    }

    /// True when at least one vision provider is registered
    #[must_use]
    pub fn has_providers(&self) -> bool {
        self.openai.is_some() || self.groq.is_some() || self.openai_router.is_some()
    }

    fn resolve(&self, selection: ProviderSelection) -> Option<Arc<dyn VisionProvider>> {
        match selection {
            ProviderSelection::OpenAi => self.openai.clone(),
            ProviderSelection::Groq => self.groq.clone(),
            ProviderSelection::OpenAiRouter => self.openai_router.clone(),
            ProviderSelection::Hybrid => {
                let chain: Vec<Arc<dyn VisionProvider>> = [
                    self.groq.clone(),
                    self.openai_router.clone(),
                    self.openai.clone(),
                ]
                .into_iter()
                .flatten()
                .collect();
                if chain.is_empty() {
                    None
                } else {
                    Some(Arc::new(FallbackChain::new(chain)))
                }
            }
        }
    }

    /// Compare two encoded screenshots.
    ///
    /// The pixel comparison runs first, off the async threads. AI analysis
    /// is invoked when `force_ai` is set or the pixel mismatch exceeds the
    /// pixel threshold, and its failure is never fatal.
    ///
    /// # Errors
    ///
    /// Propagates pixel-stage errors ([`MirarError::Decode`],
    /// [`MirarError::PayloadTooLarge`]); provider errors are absorbed.
    pub async fn compare_images(
        &self,
        baseline: &[u8],
        current: &[u8],
        options: &HybridDiffOptions,
    ) -> MirarResult<HybridDiffResult> {
        let start = Instant::now();

        let pixel_options = PixelCompareOptions {
            threshold: options.pixel_threshold,
            mask_regions: options.mask_regions.clone(),
        };
        let engine = self.pixel.clone();
        let owned_baseline = baseline.to_vec();
        let owned_current = current.to_vec();
        let pixel = tokio::task::spawn_blocking(move || {
            engine.compare(&owned_baseline, &owned_current, &pixel_options)
        })
        .await
        .map_err(|e| MirarError::Task {
            message: format!("pixel comparison task failed: {e}"),
        })??;

        let mut ai_analysis = None;
        if options.ai_enabled
            && (options.force_ai || pixel.mismatch_percentage > options.pixel_threshold)
        {
            if let Some(provider) = self.resolve(options.provider) {
                match provider
                    .compare(baseline, current, options.context.as_deref())
                    .await
                {
                    Ok(result) => ai_analysis = Some(result),
                    Err(e) => {
                        warn!("AI analysis unavailable, using pixel verdict alone: {}", e);
                    }
                }
            } else {
                debug!(
                    "No vision provider registered for {}, skipping AI analysis",
                    options.provider.name()
                );
            }
        }

        let is_different = fuse_verdict(&pixel, ai_analysis.as_ref(), options);
        let confidence = fuse_confidence(&pixel, ai_analysis.as_ref(), options);
        let explanation = Some(build_explanation(is_different, &pixel, ai_analysis.as_ref()));

        Ok(HybridDiffResult {
            is_different,
            confidence,
            pixel_analysis: pixel,
            ai_analysis,
            explanation,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Fuse the final verdict. Pixel extremes always win; the AI verdict only
/// decides the middle band, and only when confident enough.
fn fuse_verdict(
    pixel: &PixelDiffResult,
    ai: Option<&AiDiffResult>,
    options: &HybridDiffOptions,
) -> bool {
    if pixel.mismatch_percentage > options.pixel_threshold * 2.0 {
        return true;
    }
    if pixel.mismatch_percentage < MIN_MEANINGFUL_MISMATCH {
        return false;
    }
    match ai {
        Some(ai) if ai.confidence >= options.ai_threshold => ai.is_different,
        _ => pixel.is_different,
    }
}

/// Fuse the confidence score. High AI confidence is rescaled into the top
/// band; weak AI confidence is averaged with pixel-derived confidence.
fn fuse_confidence(
    pixel: &PixelDiffResult,
    ai: Option<&AiDiffResult>,
    options: &HybridDiffOptions,
) -> f64 {
    let pixel_confidence = if pixel.mismatch_percentage > options.pixel_threshold {
        90.0
    } else {
        95.0
    };
    match ai {
        Some(ai) if ai.confidence >= HIGH_AI_CONFIDENCE => ai.confidence * 0.8 + 20.0,
        Some(ai) => (pixel_confidence + ai.confidence) / 2.0,
        None => pixel_confidence,
    }
}

/// Compose the verdict summary, embedding the AI explanation and
/// high-severity change count when analysis ran
fn build_explanation(
    is_different: bool,
    pixel: &PixelDiffResult,
    ai: Option<&AiDiffResult>,
) -> String {
    let mut text = if is_different {
        format!(
            "Visual regression detected: {:.2}% of pixels differ ({} of {}).",
            pixel.mismatch_percentage, pixel.diff_pixels, pixel.total_pixels
        )
    } else {
        format!(
            "No visual regression: {:.2}% of pixels differ, within tolerance.",
            pixel.mismatch_percentage
        )
    };
    if pixel.dimensions_resized {
        text.push_str(
            " Screenshots had mismatched dimensions and were resized before \
             comparison; the result may include resampling noise.",
        );
    }
    if let Some(ai) = ai {
        if !ai.explanation.is_empty() {
            text.push_str(&format!(
                " AI analysis ({:.0}% confidence): {}",
                ai.confidence, ai.explanation
            ));
        }
        let high = ai
            .changes
            .iter()
            .filter(|c| c.severity == crate::vision::Severity::High)
            .count();
        if high > 0 {
            text.push_str(&format!(" {high} high-severity change(s) reported."));
        }
    }
    text
}
