//! Headless page capture with dynamic-content stabilization.
//!
//! Drives a shared Chromium instance over the Chrome DevTools Protocol when
//! the `browser` feature is enabled. Without it, a deterministic synthetic
//! renderer stands in so the queue, service, and diff pipeline stay testable
//! on machines with no browser installed.
//!
//! A capture is a sequence of settling steps before the screenshot is taken:
//! navigate, wait for `DOMContentLoaded`, give the network a bounded chance
//! to go idle, optionally scroll to flush lazy-loaded content, wait for
//! required selectors, let animations finish, and redact volatile regions
//! with flat-color masks. Timeouts on the settling steps degrade to a
//! best-effort capture; only navigation itself and screenshot encoding are
//! fatal.

use crate::model::{BaselineMetadata, Viewport};
use crate::pixel::{MaskRegion, MAX_IMAGE_BYTES};
use crate::result::{MirarError, MirarResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Default settle delay after wait conditions resolve (500ms)
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;

/// Default budget for the best-effort network idle wait (10 seconds)
pub const DEFAULT_NETWORK_IDLE_TIMEOUT_MS: u64 = 10_000;

/// Per-selector wait budget (5 seconds)
pub const DEFAULT_SELECTOR_TIMEOUT_MS: u64 = 5_000;

/// Default budget for animation settling (5 seconds)
pub const DEFAULT_STABILITY_TIMEOUT_MS: u64 = 5_000;

/// Default number of frames taken for multi-shot capture
pub const DEFAULT_SCREENSHOT_COUNT: u32 = 3;

/// Default spacing between multi-shot frames (500ms)
pub const DEFAULT_SCREENSHOT_INTERVAL_MS: u64 = 500;

/// Poll interval for readiness probes (100ms)
pub const POLL_INTERVAL_MS: u64 = 100;

/// Quiet period with no new resource entries that counts as network idle
pub const NETWORK_IDLE_THRESHOLD_MS: u64 = 500;

/// Flat fill color painted over masked areas
pub const MASK_FILL_CSS: &str = "#808080";

// ============================================================================
// Capture Options
// ============================================================================

/// Normalization switches for pages whose content moves between captures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DynamicContentOptions {
    /// Freeze CSS animations and transitions before capturing
    pub disable_animations: bool,
    /// Hide common ad iframes and containers
    pub block_ads: bool,
    /// Scroll through the page first so lazy-loaded content renders
    pub scroll_to_trigger_lazy_load: bool,
    /// Take several screenshots and keep the most stable one
    pub multiple_screenshots: bool,
    /// Number of frames for multi-shot capture
    pub screenshot_count: u32,
    /// Spacing between multi-shot frames in milliseconds
    pub screenshot_interval_ms: u64,
    /// Poll until running animations reach zero before capturing
    pub stability_check: bool,
    /// Budget for the animation stability poll in milliseconds
    pub stability_timeout_ms: u64,
}

impl Default for DynamicContentOptions {
    fn default() -> Self {
        Self {
            disable_animations: true,
            block_ads: true,
            scroll_to_trigger_lazy_load: false,
            multiple_screenshots: false,
            screenshot_count: DEFAULT_SCREENSHOT_COUNT,
            screenshot_interval_ms: DEFAULT_SCREENSHOT_INTERVAL_MS,
            stability_check: false,
            stability_timeout_ms: DEFAULT_STABILITY_TIMEOUT_MS,
        }
    }
}

impl DynamicContentOptions {
    /// Create options with the default normalization set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle animation freezing
    #[must_use]
    pub const fn with_disable_animations(mut self, disable: bool) -> Self {
        self.disable_animations = disable;
        self
    }

    /// Toggle ad hiding
    #[must_use]
    pub const fn with_block_ads(mut self, block: bool) -> Self {
        self.block_ads = block;
        self
    }

    /// Toggle lazy-load scroll passes
    #[must_use]
    pub const fn with_lazy_load_scroll(mut self, scroll: bool) -> Self {
        self.scroll_to_trigger_lazy_load = scroll;
        self
    }

    /// Enable multi-shot capture with the given frame count and spacing
    #[must_use]
    pub const fn with_multiple_screenshots(mut self, count: u32, interval_ms: u64) -> Self {
        self.multiple_screenshots = true;
        self.screenshot_count = count;
        self.screenshot_interval_ms = interval_ms;
        self
    }

    /// Enable the animation stability poll with the given budget
    #[must_use]
    pub const fn with_stability_check(mut self, timeout_ms: u64) -> Self {
        self.stability_check = true;
        self.stability_timeout_ms = timeout_ms;
        self
    }
}

/// Options for a single page capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureOptions {
    /// Viewport to emulate
    pub viewport: Viewport,
    /// Capture the full scrollable page rather than just the viewport
    pub full_page: bool,
    /// Also serialize the DOM at capture time
    pub capture_dom: bool,
    /// Settle delay after wait conditions resolve, in milliseconds
    pub wait_time_ms: u64,
    /// Selectors that must be present before capturing
    pub wait_for_selectors: Vec<String>,
    /// Selectors whose matches are redacted with a flat fill
    pub mask_selectors: Vec<String>,
    /// Fixed pixel regions redacted with a flat fill
    pub mask_regions: Vec<MaskRegion>,
    /// Dynamic-content normalization switches
    pub dynamic: DynamicContentOptions,
    /// Budget for the best-effort network idle wait, in milliseconds
    pub network_idle_timeout_ms: u64,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            full_page: true,
            capture_dom: false,
            wait_time_ms: DEFAULT_SETTLE_DELAY_MS,
            wait_for_selectors: Vec::new(),
            mask_selectors: Vec::new(),
            mask_regions: Vec::new(),
            dynamic: DynamicContentOptions::default(),
            network_idle_timeout_ms: DEFAULT_NETWORK_IDLE_TIMEOUT_MS,
        }
    }
}

impl CaptureOptions {
    /// Create options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the viewport to emulate
    #[must_use]
    pub const fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Toggle full-page capture
    #[must_use]
    pub const fn with_full_page(mut self, full_page: bool) -> Self {
        self.full_page = full_page;
        self
    }

    /// Toggle DOM snapshot capture
    #[must_use]
    pub const fn with_capture_dom(mut self, capture_dom: bool) -> Self {
        self.capture_dom = capture_dom;
        self
    }

    /// Set the settle delay in milliseconds
    #[must_use]
    pub const fn with_wait_time_ms(mut self, wait_time_ms: u64) -> Self {
        self.wait_time_ms = wait_time_ms;
        self
    }

    /// Set the selectors that must be present before capturing
    #[must_use]
    pub fn with_wait_for_selectors(mut self, selectors: Vec<String>) -> Self {
        self.wait_for_selectors = selectors;
        self
    }

    /// Set the selectors to redact
    #[must_use]
    pub fn with_mask_selectors(mut self, selectors: Vec<String>) -> Self {
        self.mask_selectors = selectors;
        self
    }

    /// Set the fixed pixel regions to redact
    #[must_use]
    pub fn with_mask_regions(mut self, regions: Vec<MaskRegion>) -> Self {
        self.mask_regions = regions;
        self
    }

    /// Set the dynamic-content normalization switches
    #[must_use]
    pub const fn with_dynamic(mut self, dynamic: DynamicContentOptions) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Set the network idle budget in milliseconds
    #[must_use]
    pub const fn with_network_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.network_idle_timeout_ms = timeout_ms;
        self
    }
}

/// A captured page: the screenshot plus optional DOM snapshot and metadata.
#[derive(Debug, Clone)]
pub struct CapturedPage {
    /// PNG screenshot bytes
    pub screenshot: Vec<u8>,
    /// Serialized DOM at capture time, when requested
    pub dom_snapshot: Option<String>,
    /// Viewport, URL, and timestamp of the capture
    pub metadata: BaselineMetadata,
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Reject empty or oversized screenshot buffers.
fn validate_screenshot(bytes: &[u8]) -> MirarResult<()> {
    if bytes.is_empty() {
        return Err(MirarError::Capture {
            message: "Captured screenshot is empty".to_string(),
        });
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(MirarError::Capture {
            message: format!(
                "Captured screenshot of {} bytes exceeds the {} byte limit",
                bytes.len(),
                MAX_IMAGE_BYTES
            ),
        });
    }
    Ok(())
}

/// Count differing bytes between two buffers, including the length difference.
fn byte_delta(a: &[u8], b: &[u8]) -> usize {
    let differing = a.iter().zip(b.iter()).filter(|(x, y)| x != y).count();
    differing + a.len().abs_diff(b.len())
}

/// Keep the later frame of the consecutive pair with the smallest byte delta.
///
/// With fewer than two frames the last one wins. Ties resolve to the earliest
/// stable pair so the result does not depend on trailing noise.
fn most_stable_frame(mut frames: Vec<Vec<u8>>) -> Vec<u8> {
    if frames.len() < 2 {
        return frames.pop().unwrap_or_default();
    }

    let mut best_index = frames.len() - 1;
    let mut best_delta = usize::MAX;
    for i in 0..frames.len() - 1 {
        let delta = byte_delta(&frames[i], &frames[i + 1]);
        if delta < best_delta {
            best_delta = delta;
            best_index = i + 1;
        }
    }
    frames.swap_remove(best_index)
}

// ============================================================================
// CDP Implementation (when `browser` feature is enabled)
// ============================================================================

#[cfg(feature = "browser")]
#[allow(
    clippy::wildcard_imports,
    clippy::significant_drop_tightening,
    clippy::missing_errors_doc,
    clippy::similar_names,
    clippy::cast_possible_truncation
)]
mod cdp {
    use super::*;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
    use chromiumoxide::cdp::browser_protocol::page::{
        CaptureScreenshotFormat, CaptureScreenshotParams,
    };
    use chromiumoxide::page::Page as CdpPage;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tracing::{debug, info, warn};

    const DOM_CONTENT_LOADED_TIMEOUT_MS: u64 = 30_000;
    const LAZY_LOAD_SCROLL_PAUSE_MS: u64 = 250;
    const MAX_LAZY_LOAD_SCROLL_STEPS: u32 = 20;

    const ANIMATION_FREEZE_CSS: &str = "*, *::before, *::after { \
        animation: none !important; \
        transition: none !important; \
        caret-color: transparent !important; \
    }";

    const AD_BLOCK_CSS: &str = "iframe[src*='doubleclick'], \
        iframe[src*='googlesyndication'], iframe[src*='adservice'], \
        [id^='google_ads_'], [class*='advertisement'], [data-ad-slot] { \
        display: none !important; \
    }";

    #[derive(Debug)]
    struct LaunchedBrowser {
        browser: CdpBrowser,
        #[allow(dead_code)]
        handle: tokio::task::JoinHandle<()>,
    }

    /// Captures page screenshots over the Chrome DevTools Protocol.
    ///
    /// The underlying browser launches lazily on first capture and is shared
    /// by all captures; each capture runs in a fresh page that is closed when
    /// the capture finishes, including on error.
    #[derive(Debug, Clone)]
    pub struct PageCapturer {
        inner: Arc<Mutex<Option<LaunchedBrowser>>>,
        chromium_path: Option<String>,
    }

    impl PageCapturer {
        /// Create a capturer. The browser is not launched until the first
        /// capture. Honors the `CHROMIUM_PATH` environment variable.
        #[must_use]
        pub fn new() -> Self {
            Self {
                inner: Arc::new(Mutex::new(None)),
                chromium_path: std::env::var("CHROMIUM_PATH").ok(),
            }
        }

        /// Override the Chromium executable path
        #[must_use]
        pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
            self.chromium_path = Some(path.into());
            self
        }

        /// Configured Chromium executable path, if any
        #[must_use]
        pub fn chromium_path(&self) -> Option<&str> {
            self.chromium_path.as_deref()
        }

        /// Capture a screenshot of `url` after the settling sequence.
        ///
        /// # Errors
        ///
        /// Returns an error if the browser cannot be launched, navigation
        /// fails, or the captured buffer is empty or oversized.
        pub async fn capture(
            &self,
            url: &str,
            options: &CaptureOptions,
        ) -> MirarResult<CapturedPage> {
            self.ensure_browser().await?;
            let page = self.open_page().await?;

            let outcome = capture_on_page(&page, url, options).await;
            if let Err(e) = page.close().await {
                debug!("Failed to close capture page: {}", e);
            }
            outcome
        }

        /// Shut the shared browser down. The next capture relaunches it.
        ///
        /// # Errors
        ///
        /// Returns an error if the browser refuses to close.
        pub async fn close(&self) -> MirarResult<()> {
            let mut guard = self.inner.lock().await;
            if let Some(mut launched) = guard.take() {
                launched
                    .browser
                    .close()
                    .await
                    .map_err(|e| MirarError::Capture {
                        message: format!("Failed to close browser: {e}"),
                    })?;
            }
            Ok(())
        }

        async fn ensure_browser(&self) -> MirarResult<()> {
            let mut guard = self.inner.lock().await;
            if guard.is_some() {
                return Ok(());
            }

            let mut builder = CdpConfig::builder().no_sandbox();
            if let Some(ref path) = self.chromium_path {
                builder = builder.chrome_executable(path);
            }
            let cdp_config = builder.build().map_err(|_| MirarError::BrowserNotFound)?;

            let (browser, mut handler) =
                CdpBrowser::launch(cdp_config)
                    .await
                    .map_err(|e| MirarError::Capture {
                        message: format!("Failed to launch browser: {e}"),
                    })?;

            // Drive CDP events until the browser goes away
            let handle = tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });

            info!("Launched shared Chromium instance");
            *guard = Some(LaunchedBrowser { browser, handle });
            Ok(())
        }

        async fn open_page(&self) -> MirarResult<CdpPage> {
            let guard = self.inner.lock().await;
            if let Some(ref launched) = *guard {
                launched
                    .browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| MirarError::Capture {
                        message: format!("Failed to open page: {e}"),
                    })
            } else {
                Err(MirarError::Capture {
                    message: "Browser is not running".to_string(),
                })
            }
        }
    }

    impl Default for PageCapturer {
        fn default() -> Self {
            Self::new()
        }
    }

    async fn capture_on_page(
        page: &CdpPage,
        url: &str,
        options: &CaptureOptions,
    ) -> MirarResult<CapturedPage> {
        set_viewport(page, options.viewport).await?;

        page.goto(url).await.map_err(|e| MirarError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if tokio::time::timeout(
            Duration::from_millis(DOM_CONTENT_LOADED_TIMEOUT_MS),
            wait_for_dom_content_loaded(page),
        )
        .await
        .is_err()
        {
            warn!(
                "DOMContentLoaded not observed within {}ms for {}, continuing",
                DOM_CONTENT_LOADED_TIMEOUT_MS, url
            );
        }

        if tokio::time::timeout(
            Duration::from_millis(options.network_idle_timeout_ms),
            wait_for_network_quiet(page),
        )
        .await
        .is_err()
        {
            debug!(
                "Network not idle within {}ms for {}, continuing",
                options.network_idle_timeout_ms, url
            );
        }

        if options.dynamic.scroll_to_trigger_lazy_load {
            trigger_lazy_load(page, options.viewport.height).await;
        }

        for selector in &options.wait_for_selectors {
            wait_for_selector(page, selector).await;
        }

        if options.wait_time_ms > 0 {
            tokio::time::sleep(Duration::from_millis(options.wait_time_ms)).await;
        }

        if options.dynamic.stability_check {
            wait_for_animations_settled(page, options.dynamic.stability_timeout_ms).await;
        }

        if options.dynamic.disable_animations {
            inject_style(page, ANIMATION_FREEZE_CSS).await;
        }
        if options.dynamic.block_ads {
            inject_style(page, AD_BLOCK_CSS).await;
        }
        if !options.mask_selectors.is_empty() {
            inject_style(page, &mask_selector_css(&options.mask_selectors)).await;
        }
        if !options.mask_regions.is_empty() {
            if let Err(e) = page.evaluate(mask_region_script(&options.mask_regions)).await {
                debug!("Failed to overlay mask regions: {}", e);
            }
        }

        let screenshot = take_stable_screenshot(page, options).await?;
        validate_screenshot(&screenshot)?;

        let dom_snapshot = if options.capture_dom {
            capture_dom_snapshot(page).await
        } else {
            None
        };

        Ok(CapturedPage {
            screenshot,
            dom_snapshot,
            metadata: BaselineMetadata {
                viewport: options.viewport,
                url: url.to_string(),
                timestamp: Utc::now(),
            },
        })
    }

    async fn set_viewport(page: &CdpPage, viewport: Viewport) -> MirarResult<()> {
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(viewport.width))
            .height(i64::from(viewport.height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| MirarError::Capture {
                message: format!("Invalid viewport: {e}"),
            })?;

        page.execute(metrics)
            .await
            .map_err(|e| MirarError::Capture {
                message: format!("Failed to set viewport: {e}"),
            })?;
        Ok(())
    }

    async fn wait_for_dom_content_loaded(page: &CdpPage) {
        let result = page
            .evaluate(
                "new Promise(resolve => { \
                 if (document.readyState !== 'loading') { resolve(true); } \
                 else { document.addEventListener('DOMContentLoaded', () => resolve(true)); } \
                 })",
            )
            .await;
        if let Err(e) = result {
            debug!("DOMContentLoaded wait failed: {}", e);
        }
    }

    /// Poll the resource timing count until it stops growing for
    /// [`NETWORK_IDLE_THRESHOLD_MS`]. The caller bounds the overall wait.
    async fn wait_for_network_quiet(page: &CdpPage) {
        let mut last_count = -1_i64;
        let mut quiet_ms = 0_u64;
        while quiet_ms < NETWORK_IDLE_THRESHOLD_MS {
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            let count = match page
                .evaluate("performance.getEntriesByType('resource').length")
                .await
            {
                Ok(value) => value.into_value::<i64>().unwrap_or(last_count),
                Err(_) => last_count,
            };
            if count == last_count {
                quiet_ms += POLL_INTERVAL_MS;
            } else {
                quiet_ms = 0;
                last_count = count;
            }
        }
    }

    async fn trigger_lazy_load(page: &CdpPage, viewport_height: u32) {
        let js = format!(
            "(async () => {{ \
             const step = Math.max({viewport_height}, 1); \
             const limit = Math.max(document.body.scrollHeight, document.documentElement.scrollHeight); \
             const steps = Math.min(Math.ceil(limit / step), {MAX_LAZY_LOAD_SCROLL_STEPS}); \
             for (let i = 1; i <= steps; i++) {{ \
             window.scrollTo(0, i * step); \
             await new Promise(r => setTimeout(r, {LAZY_LOAD_SCROLL_PAUSE_MS})); \
             }} \
             window.scrollTo(0, 0); \
             return true; }})()"
        );
        if let Err(e) = page.evaluate(js).await {
            debug!("Lazy-load scroll failed: {}", e);
        }
    }

    async fn wait_for_selector(page: &CdpPage, selector: &str) {
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(DEFAULT_SELECTOR_TIMEOUT_MS);
        let probe = format!("document.querySelector({selector:?}) !== null");
        loop {
            let found = match page.evaluate(probe.as_str()).await {
                Ok(value) => value.into_value::<bool>().unwrap_or(false),
                Err(_) => false,
            };
            if found {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "Selector {} not found within {}ms, capturing anyway",
                    selector, DEFAULT_SELECTOR_TIMEOUT_MS
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    async fn wait_for_animations_settled(page: &CdpPage, timeout_ms: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let active = match page.evaluate("document.getAnimations().length").await {
                Ok(value) => value.into_value::<i64>().unwrap_or(0),
                Err(_) => 0,
            };
            if active == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(
                    "{} animations still active after {}ms, capturing anyway",
                    active, timeout_ms
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    async fn inject_style(page: &CdpPage, css: &str) {
        let js = format!(
            "(() => {{ const style = document.createElement('style'); \
             style.textContent = {css:?}; \
             document.head.appendChild(style); return true; }})()"
        );
        if let Err(e) = page.evaluate(js).await {
            debug!("Failed to inject style: {}", e);
        }
    }

    /// Flat-fill CSS for selector masks: the matched element becomes a solid
    /// block and its content is hidden so dynamic text cannot leak through.
    fn mask_selector_css(selectors: &[String]) -> String {
        selectors
            .iter()
            .map(|s| {
                format!(
                    "{s} {{ background-color: {MASK_FILL_CSS} !important; \
                     color: transparent !important; \
                     border-color: {MASK_FILL_CSS} !important; }} \
                     {s} * {{ visibility: hidden !important; }}"
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn mask_region_script(regions: &[MaskRegion]) -> String {
        let mut script = String::from("(() => {");
        for region in regions {
            script.push_str(&format!(
                "{{ const mask = document.createElement('div'); \
                 mask.style.cssText = 'position:absolute;left:{}px;top:{}px;\
                 width:{}px;height:{}px;background:{MASK_FILL_CSS};\
                 z-index:2147483647;pointer-events:none;'; \
                 document.body.appendChild(mask); }}",
                region.x, region.y, region.width, region.height
            ));
        }
        script.push_str(" return true; })()");
        script
    }

    async fn take_stable_screenshot(
        page: &CdpPage,
        options: &CaptureOptions,
    ) -> MirarResult<Vec<u8>> {
        if !options.dynamic.multiple_screenshots || options.dynamic.screenshot_count < 2 {
            return take_screenshot(page, options.full_page).await;
        }

        let mut frames = Vec::with_capacity(options.dynamic.screenshot_count as usize);
        for shot in 0..options.dynamic.screenshot_count {
            if shot > 0 {
                tokio::time::sleep(Duration::from_millis(options.dynamic.screenshot_interval_ms))
                    .await;
            }
            frames.push(take_screenshot(page, options.full_page).await?);
        }
        Ok(most_stable_frame(frames))
    }

    async fn take_screenshot(page: &CdpPage, full_page: bool) -> MirarResult<Vec<u8>> {
        let mut builder = CaptureScreenshotParams::builder().format(CaptureScreenshotFormat::Png);
        if full_page {
            builder = builder.capture_beyond_viewport(true);
        }
        let params = builder.build();

        let screenshot = page
            .execute(params)
            .await
            .map_err(|e| MirarError::Capture {
                message: format!("Screenshot failed: {e}"),
            })?;

        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&screenshot.data)
            .map_err(|e| MirarError::Capture {
                message: format!("Screenshot decode failed: {e}"),
            })
    }

    async fn capture_dom_snapshot(page: &CdpPage) -> Option<String> {
        match page.evaluate("document.documentElement.outerHTML").await {
            Ok(value) => value.into_value::<String>().ok(),
            Err(e) => {
                debug!("DOM snapshot failed: {}", e);
                None
            }
        }
    }
}

// ============================================================================
// Mock Implementation (when `browser` feature is NOT enabled)
// ============================================================================

#[cfg(not(feature = "browser"))]
#[allow(
    clippy::unused_async,
    clippy::missing_const_for_fn,
    clippy::cast_possible_truncation
)]
mod mock {
    use super::*;
    use crate::pixel::encode_png;
    use image::{Rgba, RgbaImage};
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    // 0x80 gray, matching MASK_FILL_CSS
    const MASK_FILL_RGBA: Rgba<u8> = Rgba([128, 128, 128, 255]);

    /// Renders deterministic synthetic screenshots (mock when `browser`
    /// feature disabled). The frame color derives from the URL so different
    /// pages produce different images and repeated captures are identical.
    #[derive(Debug, Clone, Default)]
    pub struct PageCapturer {
        chromium_path: Option<String>,
    }

    impl PageCapturer {
        /// Create a capturer (mock)
        #[must_use]
        pub fn new() -> Self {
            Self {
                chromium_path: std::env::var("CHROMIUM_PATH").ok(),
            }
        }

        /// Override the Chromium executable path (recorded, unused in mock)
        #[must_use]
        pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
            self.chromium_path = Some(path.into());
            self
        }

        /// Configured Chromium executable path, if any
        #[must_use]
        pub fn chromium_path(&self) -> Option<&str> {
            self.chromium_path.as_deref()
        }

        /// Capture a synthetic screenshot of `url`.
        ///
        /// # Errors
        ///
        /// Returns an error if the synthetic frame cannot be encoded or
        /// fails the size validation.
        pub async fn capture(
            &self,
            url: &str,
            options: &CaptureOptions,
        ) -> MirarResult<CapturedPage> {
            let frame = render_synthetic_page(url, options)?;
            let screenshot = if options.dynamic.multiple_screenshots
                && options.dynamic.screenshot_count > 1
            {
                let count = options.dynamic.screenshot_count as usize;
                most_stable_frame(vec![frame; count])
            } else {
                frame
            };
            validate_screenshot(&screenshot)?;

            let dom_snapshot = if options.capture_dom {
                Some(format!(
                    "<html><head></head><body data-capture-url=\"{url}\"></body></html>"
                ))
            } else {
                None
            };

            Ok(CapturedPage {
                screenshot,
                dom_snapshot,
                metadata: BaselineMetadata {
                    viewport: options.viewport,
                    url: url.to_string(),
                    timestamp: Utc::now(),
                },
            })
        }

        /// Shut down (mock does nothing)
        ///
        /// # Errors
        ///
        /// Returns Ok in mock mode
        pub async fn close(&self) -> MirarResult<()> {
            Ok(())
        }
    }

    fn render_synthetic_page(url: &str, options: &CaptureOptions) -> MirarResult<Vec<u8>> {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        let digest = hasher.finish();
        let base = Rgba([
            (digest & 0xFF) as u8,
            ((digest >> 8) & 0xFF) as u8,
            ((digest >> 16) & 0xFF) as u8,
            255,
        ]);

        let width = options.viewport.width.max(1);
        let height = options.viewport.height.max(1);
        let mut canvas = RgbaImage::from_pixel(width, height, base);

        for region in &options.mask_regions {
            let right = region.x.saturating_add(region.width).min(width);
            let bottom = region.y.saturating_add(region.height).min(height);
            for y in region.y..bottom {
                for x in region.x..right {
                    canvas.put_pixel(x, y, MASK_FILL_RGBA);
                }
            }
        }

        encode_png(width, height, canvas.as_raw())
    }
}

// Re-export based on feature
#[cfg(feature = "browser")]
pub use cdp::PageCapturer;

#[cfg(not(feature = "browser"))]
pub use mock::PageCapturer;
