//! Mirar: hybrid visual regression testing for web pages
//!
//! Mirar (Spanish: "to look at") captures screenshots of live pages,
//! compares them against stored baselines with a deterministic pixel diff,
//! and escalates ambiguous changes to AI vision providers for a semantic
//! second opinion. Runs flow through a priority-ordered queue with bounded
//! concurrency and per-run retry budgets.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      MIRAR Pipeline                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────┐   ┌──────────┐   ┌────────────┐   ┌─────────────┐   │
//! │  │ Queue   │──►│ Capture  │──►│ Pixel Diff │──►│ AI Fusion   │   │
//! │  │ (HIGH/  │   │ (CDP or  │   │ (always    │   │ (only when  │   │
//! │  │ NORMAL/ │   │  mock)   │   │  runs)     │   │  ambiguous) │   │
//! │  │ LOW)    │   └──────────┘   └────────────┘   └─────────────┘   │
//! │  └─────────┘          baselines, runs, screenshots ──► stores    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pixel stage always runs and its verdict wins at the extremes; AI
//! vision is consulted only in the ambiguous middle band, and a provider
//! outage degrades a comparison to pixel-only instead of failing it.

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]
// Allow large stack arrays/frames in tests (e.g., test image generation)
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod capture;
mod config;
mod hybrid;
mod model;
mod pixel;
mod queue;
mod result;
mod run;
mod service;
mod store;

/// AI vision providers and the uniform comparison contract they implement
pub mod vision;

pub use capture::{
    CaptureOptions, CapturedPage, DynamicContentOptions, PageCapturer, MASK_FILL_CSS,
    DEFAULT_NETWORK_IDLE_TIMEOUT_MS, DEFAULT_SCREENSHOT_COUNT, DEFAULT_SCREENSHOT_INTERVAL_MS,
    DEFAULT_SELECTOR_TIMEOUT_MS, DEFAULT_SETTLE_DELAY_MS, DEFAULT_STABILITY_TIMEOUT_MS,
    NETWORK_IDLE_THRESHOLD_MS, POLL_INTERVAL_MS,
};
pub use config::{EngineConfig, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_RETRIES};
pub use hybrid::{
    HybridDiffEngine, HybridDiffOptions, HybridDiffResult, ProviderSelection, DEFAULT_AI_THRESHOLD,
};
pub use model::{
    Baseline, BaselineMetadata, MaskConfig, Project, ProjectConfig, ResultMetadata, ResultStatus,
    TestResult, Viewport,
};
pub use pixel::{
    encode_png, MaskRegion, PixelCompareOptions, PixelDiffEngine, PixelDiffResult,
    DEFAULT_DIFF_THRESHOLD, MAX_IMAGE_BYTES,
};
pub use queue::{CompletionTicket, Enqueued, ExecutionQueue, QueueStatus, QueuedCounts, RunExecutor};
pub use result::{MirarError, MirarResult};
pub use run::{Priority, RetryOutcome, RunConfig, RunStatus, TestRun, WaitConditions};
pub use service::TestExecutionService;
pub use store::{
    BaselineStore, InMemoryBaselineStore, InMemoryProjectStore, InMemoryRunStore, ProjectStore,
    RunStore, ScreenshotRole, ScreenshotStore,
};
pub use vision::{
    AiDiffResult, ChangeRegion, ChangeType, FallbackChain, Severity, VisionChange, VisionProvider,
};

#[cfg(feature = "vision")]
pub use vision::{OpenAiVisionProvider, ProviderKind};
