//! Engine configuration.
//!
//! [`EngineConfig`] collects every knob the engine reads at startup:
//! provider selection and credentials, comparison thresholds, queue limits,
//! screenshot persistence, and capture normalization defaults. It can be
//! built in code or loaded from `MIRAR_*` environment variables; malformed
//! values fall back to the documented defaults rather than aborting startup.

use std::path::PathBuf;

use tracing::warn;

use crate::capture::{DynamicContentOptions, DEFAULT_NETWORK_IDLE_TIMEOUT_MS};
use crate::hybrid::{HybridDiffEngine, HybridDiffOptions, ProviderSelection, DEFAULT_AI_THRESHOLD};
use crate::pixel::DEFAULT_DIFF_THRESHOLD;
use crate::store::ScreenshotStore;

#[cfg(feature = "vision")]
use crate::vision::{OpenAiVisionProvider, ProviderKind};
#[cfg(feature = "vision")]
use std::sync::Arc;

/// Default bound on concurrently executing runs
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Default retries granted beyond a run's first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Startup configuration for the visual testing engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Vision backend consulted when AI analysis runs
    pub provider: ProviderSelection,
    /// API key for api.openai.com; the OpenAI slot stays empty without one
    pub openai_api_key: Option<String>,
    /// API key for the Groq endpoint
    pub groq_api_key: Option<String>,
    /// API key for OpenRouter
    pub openrouter_api_key: Option<String>,
    /// Model override for the OpenAI slot
    pub openai_model: Option<String>,
    /// Model override for the Groq slot
    pub groq_model: Option<String>,
    /// Model override for the OpenRouter slot
    pub openrouter_model: Option<String>,
    /// Completion token budget applied to every provider
    pub max_tokens: Option<u32>,
    /// Pixel mismatch percentage that triggers AI analysis
    pub pixel_threshold: f64,
    /// AI confidence required before the AI verdict is trusted
    pub ai_threshold: f64,
    /// Invoke AI analysis on every comparison
    pub force_ai: bool,
    /// Maximum runs executing at once
    pub max_concurrency: usize,
    /// Retries granted to a run beyond its first attempt
    pub max_retries: u32,
    /// Default pass/fail mismatch threshold for new projects
    pub diff_threshold: f64,
    /// Directory screenshots are persisted under; `None` disables
    /// persistence entirely
    pub screenshot_dir: Option<PathBuf>,
    /// Capture normalization applied when a run specifies none
    pub dynamic: DynamicContentOptions,
    /// Budget for the best-effort network idle wait
    pub network_idle_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSelection::Hybrid,
            openai_api_key: None,
            groq_api_key: None,
            openrouter_api_key: None,
            openai_model: None,
            groq_model: None,
            openrouter_model: None,
            max_tokens: None,
            pixel_threshold: DEFAULT_DIFF_THRESHOLD,
            ai_threshold: DEFAULT_AI_THRESHOLD,
            force_ai: false,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
            screenshot_dir: None,
            dynamic: DynamicContentOptions::new(),
            network_idle_timeout_ms: DEFAULT_NETWORK_IDLE_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the environment.
    ///
    /// Recognized variables: `MIRAR_AI_PROVIDER`
    /// (`openai|groq|openai_router|hybrid`), `OPENAI_API_KEY`,
    /// `GROQ_API_KEY`, `OPENROUTER_API_KEY`, `MIRAR_OPENAI_MODEL`,
    /// `MIRAR_GROQ_MODEL`, `MIRAR_OPENROUTER_MODEL`, `MIRAR_MAX_TOKENS`,
    /// `MIRAR_PIXEL_THRESHOLD`, `MIRAR_AI_THRESHOLD`, `MIRAR_FORCE_AI`,
    /// `MIRAR_MAX_CONCURRENCY`, `MIRAR_MAX_RETRIES`,
    /// `MIRAR_DIFF_THRESHOLD`, `MIRAR_SCREENSHOT_DIR`,
    /// `MIRAR_DISABLE_ANIMATIONS`, `MIRAR_BLOCK_ADS`,
    /// `MIRAR_SCROLL_LAZY_LOAD`, `MIRAR_MULTI_SHOT`,
    /// `MIRAR_SCREENSHOT_COUNT`, `MIRAR_SCREENSHOT_INTERVAL_MS`,
    /// `MIRAR_STABILITY_CHECK`, `MIRAR_STABILITY_TIMEOUT_MS`,
    /// `MIRAR_NETWORK_IDLE_TIMEOUT_MS`. Unset or unparseable values keep
    /// their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(name) = env_string("MIRAR_AI_PROVIDER") {
            match ProviderSelection::from_name(&name) {
                Some(provider) => config.provider = provider,
                None => warn!(
                    "Unknown MIRAR_AI_PROVIDER value {:?}, keeping {}",
                    name,
                    config.provider.name()
                ),
            }
        }

        config.openai_api_key = env_string("OPENAI_API_KEY");
        config.groq_api_key = env_string("GROQ_API_KEY");
        config.openrouter_api_key = env_string("OPENROUTER_API_KEY");
        config.openai_model = env_string("MIRAR_OPENAI_MODEL");
        config.groq_model = env_string("MIRAR_GROQ_MODEL");
        config.openrouter_model = env_string("MIRAR_OPENROUTER_MODEL");
        config.max_tokens = env_parse("MIRAR_MAX_TOKENS");

        if let Some(threshold) = env_parse("MIRAR_PIXEL_THRESHOLD") {
            config.pixel_threshold = threshold;
        }
        if let Some(threshold) = env_parse("MIRAR_AI_THRESHOLD") {
            config.ai_threshold = threshold;
        }
        if let Some(force) = env_flag("MIRAR_FORCE_AI") {
            config.force_ai = force;
        }
        if let Some(concurrency) = env_parse("MIRAR_MAX_CONCURRENCY") {
            config.max_concurrency = concurrency;
        }
        if let Some(retries) = env_parse("MIRAR_MAX_RETRIES") {
            config.max_retries = retries;
        }
        if let Some(threshold) = env_parse("MIRAR_DIFF_THRESHOLD") {
            config.diff_threshold = threshold;
        }
        config.screenshot_dir = env_string("MIRAR_SCREENSHOT_DIR").map(PathBuf::from);

        if let Some(disable) = env_flag("MIRAR_DISABLE_ANIMATIONS") {
            config.dynamic.disable_animations = disable;
        }
        if let Some(block) = env_flag("MIRAR_BLOCK_ADS") {
            config.dynamic.block_ads = block;
        }
        if let Some(scroll) = env_flag("MIRAR_SCROLL_LAZY_LOAD") {
            config.dynamic.scroll_to_trigger_lazy_load = scroll;
        }
        if let Some(multi) = env_flag("MIRAR_MULTI_SHOT") {
            config.dynamic.multiple_screenshots = multi;
        }
        if let Some(count) = env_parse("MIRAR_SCREENSHOT_COUNT") {
            config.dynamic.screenshot_count = count;
        }
        if let Some(interval) = env_parse("MIRAR_SCREENSHOT_INTERVAL_MS") {
            config.dynamic.screenshot_interval_ms = interval;
        }
        if let Some(check) = env_flag("MIRAR_STABILITY_CHECK") {
            config.dynamic.stability_check = check;
        }
        if let Some(timeout) = env_parse("MIRAR_STABILITY_TIMEOUT_MS") {
            config.dynamic.stability_timeout_ms = timeout;
        }
        if let Some(timeout) = env_parse("MIRAR_NETWORK_IDLE_TIMEOUT_MS") {
            config.network_idle_timeout_ms = timeout;
        }

        config
    }

    /// Select the vision backend
    #[must_use]
    pub const fn with_provider(mut self, provider: ProviderSelection) -> Self {
        self.provider = provider;
        self
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

    /// Invoke AI analysis on every comparison
    #[must_use]
    pub const fn with_force_ai(mut self, force: bool) -> Self {
        self.force_ai = force;
        self
    }

    /// Bound concurrent run execution
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the retry budget granted to each run
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the default pass/fail threshold for new projects
    #[must_use]
    pub const fn with_diff_threshold(mut self, threshold: f64) -> Self {
        self.diff_threshold = threshold;
        self
    }

    /// Enable screenshot persistence under the given directory
    #[must_use]
    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = Some(dir.into());
        self
    }

    /// Replace the capture normalization defaults
    #[must_use]
    pub const fn with_dynamic(mut self, dynamic: DynamicContentOptions) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Base comparison options derived from this configuration
    #[must_use]
    pub fn diff_options(&self) -> HybridDiffOptions {
        HybridDiffOptions::new()
            .with_pixel_threshold(self.pixel_threshold)
            .with_ai_threshold(self.ai_threshold)
            .with_force_ai(self.force_ai)
            .with_provider(self.provider)
    }

    /// Screenshot store when persistence is configured
    #[must_use]
    pub fn screenshot_store(&self) -> Option<ScreenshotStore> {
        self.screenshot_dir.as_ref().map(ScreenshotStore::new)
    }

    /// Build a hybrid engine with one provider client per configured API
    /// key. Slots without a key stay empty and comparisons degrade to
    /// pixel-only when the selected backend is missing.
    #[cfg(feature = "vision")]
    #[must_use]
    pub fn build_engine(&self) -> HybridDiffEngine {
        let mut engine = HybridDiffEngine::new();
        if let Some(key) = &self.openai_api_key {
            engine = engine.with_openai(self.client(
                ProviderKind::OpenAi,
                key,
                self.openai_model.as_deref(),
            ));
        }
        if let Some(key) = &self.groq_api_key {
            engine = engine.with_groq(self.client(
                ProviderKind::Groq,
                key,
                self.groq_model.as_deref(),
            ));
        }
        if let Some(key) = &self.openrouter_api_key {
            engine = engine.with_openai_router(self.client(
                ProviderKind::OpenAiRouter,
                key,
                self.openrouter_model.as_deref(),
            ));
        }
        engine
    }

    /// Without the `vision` feature no provider clients exist; the engine
    /// is always pixel-only.
    #[cfg(not(feature = "vision"))]
    #[must_use]
    pub fn build_engine(&self) -> HybridDiffEngine {
        HybridDiffEngine::new()
    }

    #[cfg(feature = "vision")]
    fn client(
        &self,
        kind: ProviderKind,
        api_key: &str,
        model: Option<&str>,
    ) -> Arc<OpenAiVisionProvider> {
        let mut provider = OpenAiVisionProvider::new(kind, api_key);
        if let Some(model) = model {
            provider = provider.with_model(model);
        }
        if let Some(max_tokens) = self.max_tokens {
            provider = provider.with_max_tokens(max_tokens);
        }
        Arc::new(provider)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env_string(key).map(|v| {
        matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
