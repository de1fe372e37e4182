//! One test run end to end: capture, locate baseline, diff, persist.
//!
//! [`TestExecutionService`] is the executor the queue drives. Each run
//! resolves its baseline first so the baseline's masking and normalization
//! settings shape the capture, then compares the fresh screenshot against
//! the baseline image with the hybrid engine. A (project, url) pair with no
//! active baseline bootstraps one from the capture and passes; comparisons
//! start with the next run.
//!
//! Errors out of this module (capture, decode, storage) are the queue's
//! signal to apply retry policy. Provider outages never surface here; the
//! hybrid engine absorbs them.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use crate::capture::{CaptureOptions, CapturedPage, DynamicContentOptions, PageCapturer};
use crate::hybrid::{HybridDiffEngine, HybridDiffOptions};
use crate::model::{Baseline, Project, ResultStatus, TestResult};
use crate::queue::RunExecutor;
use crate::result::{MirarError, MirarResult};
use crate::run::TestRun;
use crate::store::{BaselineStore, ProjectStore, ScreenshotRole, ScreenshotStore};
use crate::vision::ChangeRegion;

// ============================================================================
// Execution Service
// ============================================================================

/// Executes one run at a time against the shared capturer and diff engine.
///
/// The service is cheap to share behind an `Arc`; captures serialize on the
/// browser's page pool and comparisons run concurrently.
pub struct TestExecutionService {
    capturer: PageCapturer,
    engine: HybridDiffEngine,
    projects: Arc<dyn ProjectStore>,
    baselines: Arc<dyn BaselineStore>,
    screenshots: Option<ScreenshotStore>,
    diff_options: HybridDiffOptions,
    dynamic_defaults: DynamicContentOptions,
    capture_dom: bool,
}

impl std::fmt::Debug for TestExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestExecutionService")
            .field("engine", &self.engine)
            .field("screenshots", &self.screenshots)
            .field("diff_options", &self.diff_options)
            .field("capture_dom", &self.capture_dom)
            .finish()
    }
}

impl TestExecutionService {
    /// Create a service over the given capturer, engine, and stores.
    /// Screenshot persistence is off until a store is attached.
    #[must_use]
    pub fn new(
        capturer: PageCapturer,
        engine: HybridDiffEngine,
        projects: Arc<dyn ProjectStore>,
        baselines: Arc<dyn BaselineStore>,
    ) -> Self {
        Self {
            capturer,
            engine,
            projects,
            baselines,
            screenshots: None,
            diff_options: HybridDiffOptions::new(),
            dynamic_defaults: DynamicContentOptions::new(),
            capture_dom: false,
        }
    }

    /// Persist captured and diff images through the given store
    #[must_use]
    pub fn with_screenshot_store(mut self, store: ScreenshotStore) -> Self {
        self.screenshots = Some(store);
        self
    }

    /// Replace the base comparison options applied to every run. Per-run,
    /// the project's diff threshold and AI toggle still override these.
    #[must_use]
    pub fn with_diff_options(mut self, options: HybridDiffOptions) -> Self {
        self.diff_options = options;
        self
    }

    /// Replace the normalization applied when neither the run nor the
    /// baseline specifies any
    #[must_use]
    pub const fn with_dynamic_defaults(mut self, dynamic: DynamicContentOptions) -> Self {
        self.dynamic_defaults = dynamic;
        self
    }

    /// Capture DOM snapshots alongside screenshots
    #[must_use]
    pub const fn with_capture_dom(mut self, capture_dom: bool) -> Self {
        self.capture_dom = capture_dom;
        self
    }

    async fn load_project(&self, project_id: &str) -> MirarResult<Project> {
        self.projects
            .get(project_id)
            .await?
            .ok_or_else(|| MirarError::NotFound {
                resource: format!("project {project_id}"),
            })
    }

    /// An explicit baseline id must resolve; otherwise the highest active
    /// version stored under the run's URL is used, and `None` means this is
    /// the first capture for the pair.
    async fn resolve_baseline(&self, run: &TestRun) -> MirarResult<Option<Baseline>> {
        if let Some(id) = &run.config.baseline_id {
            let baseline =
                self.baselines
                    .get(id)
                    .await?
                    .ok_or_else(|| MirarError::NotFound {
                        resource: format!("baseline {id}"),
                    })?;
            return Ok(Some(baseline));
        }
        self.baselines
            .find_active(&run.project_id, &run.config.url)
            .await
    }

    /// Normalization precedence: the run's explicit settings, then the
    /// baseline's, then the engine defaults.
    fn build_capture_options(&self, run: &TestRun, baseline: Option<&Baseline>) -> CaptureOptions {
        let mask = baseline.map(|b| &b.mask);
        let dynamic = run
            .config
            .dynamic_content
            .clone()
            .or_else(|| mask.and_then(|m| m.dynamic.clone()))
            .unwrap_or_else(|| self.dynamic_defaults.clone());

        let mut options = CaptureOptions::new()
            .with_viewport(run.config.viewport)
            .with_capture_dom(self.capture_dom)
            .with_dynamic(dynamic);

        if let Some(wait) = &run.config.wait_conditions {
            options = options
                .with_wait_for_selectors(wait.selectors.clone())
                .with_wait_time_ms(wait.delay_ms);
            if !wait.network_idle {
                options = options.with_network_idle_timeout_ms(0);
            }
        }

        if let Some(mask) = mask {
            options = options
                .with_mask_selectors(mask.selectors.clone())
                .with_mask_regions(mask.regions.clone());
        }

        options
    }

    fn diff_options_for(&self, project: &Project, baseline: &Baseline) -> HybridDiffOptions {
        let mut options = self
            .diff_options
            .clone()
            .with_pixel_threshold(project.config.diff_threshold)
            .with_ai_enabled(project.config.ai_enabled);
        options
            .mask_regions
            .extend(baseline.mask.regions.iter().copied());
        options
    }

    /// Store the first capture for a (project, url) pair as its baseline
    /// and report the run as passed.
    async fn bootstrap_baseline(
        &self,
        run: &TestRun,
        page: CapturedPage,
    ) -> MirarResult<TestResult> {
        let screenshot_path = match &self.screenshots {
            Some(store) => Some(
                store
                    .save(
                        &run.project_id,
                        &run.id,
                        ScreenshotRole::Baseline,
                        &page.screenshot,
                    )
                    .await?,
            ),
            None => None,
        };

        let mut baseline = Baseline::new(
            &run.project_id,
            &run.config.url,
            page.screenshot,
            page.metadata,
        );
        if let Some(snapshot) = page.dom_snapshot {
            baseline = baseline.with_dom_snapshot(snapshot);
        }
        let baseline = self.baselines.save_new_version(baseline).await?;
        info!(
            "No active baseline for {}; stored this capture as {} v{}",
            run.config.url, baseline.id, baseline.version
        );

        let mut result = TestResult::new(&run.id, &baseline.id, ResultStatus::Passed, 100.0);
        result.explanation = Some(format!(
            "Baseline created from this capture (version {}); comparisons start with the next run",
            baseline.version
        ));
        result.screenshot_path = screenshot_path;
        Ok(result)
    }
}

#[async_trait]
impl RunExecutor for TestExecutionService {
    async fn execute(&self, run: &TestRun) -> MirarResult<TestResult> {
        let started = Instant::now();

        let project = self.load_project(&run.project_id).await?;
        let baseline = self.resolve_baseline(run).await?;

        let capture_options = self.build_capture_options(run, baseline.as_ref());
        let page = self
            .capturer
            .capture(&run.config.url, &capture_options)
            .await?;

        let Some(baseline) = baseline else {
            let mut result = self.bootstrap_baseline(run, page).await?;
            result.metadata.execution_time_ms = started.elapsed().as_millis() as u64;
            return Ok(result);
        };

        let diff_options = self.diff_options_for(&project, &baseline);
        let diff = self
            .engine
            .compare_images(&baseline.image, &page.screenshot, &diff_options)
            .await?;

        let status = if diff.is_different {
            ResultStatus::Failed
        } else {
            ResultStatus::Passed
        };
        let similarity = 100.0 - diff.pixel_analysis.mismatch_percentage;

        let mut result = TestResult::new(&run.id, &baseline.id, status, similarity);
        result.explanation = diff.explanation;
        if let Some(ai) = &diff.ai_analysis {
            let regions: Vec<ChangeRegion> = ai
                .changes
                .iter()
                .filter_map(|change| change.region)
                .collect();
            if !regions.is_empty() {
                result.diff_regions = Some(regions);
            }
            result.metadata.ai_model = ai.model.clone();
            result.metadata.tokens_used = Some(ai.tokens_used);
        }
        result.ai_analysis = diff.ai_analysis;

        if let Some(store) = &self.screenshots {
            let path = store
                .save(
                    &run.project_id,
                    &run.id,
                    ScreenshotRole::Current,
                    &page.screenshot,
                )
                .await?;
            result.screenshot_path = Some(path);
            if let Some(diff_image) = &diff.pixel_analysis.diff_image {
                let path = store
                    .save(&run.project_id, &run.id, ScreenshotRole::Diff, diff_image)
                    .await?;
                result.diff_path = Some(path);
            }
        }

        result.metadata.execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            "Run {} vs baseline {} v{}: {:?} ({:.3}% mismatch)",
            run.id, baseline.id, baseline.version, status, diff.pixel_analysis.mismatch_percentage
        );
        Ok(result)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::{BaselineMetadata, MaskConfig, ProjectConfig, Viewport};
    use crate::pixel::{encode_png, MaskRegion};
    use crate::run::{Priority, RunConfig, WaitConditions};
    use crate::store::{InMemoryBaselineStore, InMemoryProjectStore};
    use crate::vision::{AiDiffResult, ChangeType, Severity, VisionChange, VisionProvider};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AnsweringProvider {
        calls: Arc<AtomicUsize>,
        result: AiDiffResult,
    }

    #[async_trait]
    impl VisionProvider for AnsweringProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn compare(
            &self,
            _baseline: &[u8],
            _current: &[u8],
            _context: Option<&str>,
        ) -> MirarResult<AiDiffResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    fn stores() -> (Arc<InMemoryProjectStore>, Arc<InMemoryBaselineStore>) {
        (
            Arc::new(InMemoryProjectStore::new()),
            Arc::new(InMemoryBaselineStore::new()),
        )
    }

    fn service_over(
        projects: &Arc<InMemoryProjectStore>,
        baselines: &Arc<InMemoryBaselineStore>,
        engine: HybridDiffEngine,
    ) -> TestExecutionService {
        TestExecutionService::new(
            PageCapturer::new(),
            engine,
            Arc::clone(projects) as Arc<dyn ProjectStore>,
            Arc::clone(baselines) as Arc<dyn BaselineStore>,
        )
    }

    fn normal_run(project: &Project, url: &str) -> TestRun {
        TestRun::create(&project.id, RunConfig::new(url), Priority::Normal, 0)
    }

    fn metadata_for(url: &str) -> BaselineMetadata {
        BaselineMetadata {
            viewport: Viewport::default(),
            url: url.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Shift every color channel by half the range so each pixel lands well
    /// past any sane diff threshold.
    fn shift_every_channel(png: &[u8]) -> Vec<u8> {
        let image = image::load_from_memory(png).unwrap().to_rgba8();
        let (width, height) = image.dimensions();
        let mut pixels = image.into_raw();
        for chunk in pixels.chunks_exact_mut(4) {
            chunk[0] ^= 0x80;
            chunk[1] ^= 0x80;
            chunk[2] ^= 0x80;
        }
        encode_png(width, height, &pixels).unwrap()
    }

    #[tokio::test]
    async fn unknown_project_is_an_error() {
        let (projects, baselines) = stores();
        let service = service_over(&projects, &baselines, HybridDiffEngine::new());
        let run = TestRun::create(
            "ghost",
            RunConfig::new("https://docs.test"),
            Priority::Normal,
            0,
        );

        let err = service.execute(&run).await.unwrap_err();
        assert!(matches!(err, MirarError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unknown_baseline_override_is_an_error() {
        let (projects, baselines) = stores();
        let project = Project::new("docs", "https://docs.test");
        projects.save(project.clone()).await.unwrap();
        let service = service_over(&projects, &baselines, HybridDiffEngine::new());

        let config = RunConfig::new("https://docs.test").with_baseline_id("missing");
        let run = TestRun::create(&project.id, config, Priority::Normal, 0);

        let err = service.execute(&run).await.unwrap_err();
        assert!(matches!(err, MirarError::NotFound { .. }));
    }

    #[test]
    fn capture_options_follow_run_and_baseline_settings() {
        let (projects, baselines) = stores();
        let service = service_over(&projects, &baselines, HybridDiffEngine::new());

        let mut baseline = Baseline::new(
            "p",
            "https://a.test",
            Vec::new(),
            metadata_for("https://a.test"),
        );
        baseline.mask = MaskConfig {
            selectors: vec![".ad-banner".to_string()],
            regions: vec![MaskRegion {
                x: 0,
                y: 0,
                width: 8,
                height: 8,
            }],
            dynamic: Some(DynamicContentOptions::new().with_multiple_screenshots(2, 100)),
        };

        let config = RunConfig::new("https://a.test").with_wait_conditions(WaitConditions {
            selectors: vec!["#app".to_string()],
            delay_ms: 50,
            network_idle: false,
        });
        let run = TestRun::create("p", config, Priority::Normal, 0);

        let options = service.build_capture_options(&run, Some(&baseline));
        assert_eq!(options.wait_for_selectors, vec!["#app"]);
        assert_eq!(options.wait_time_ms, 50);
        assert_eq!(options.network_idle_timeout_ms, 0);
        assert_eq!(options.mask_selectors, vec![".ad-banner"]);
        assert_eq!(options.mask_regions.len(), 1);
        assert!(options.dynamic.multiple_screenshots);

        // per-run normalization beats the baseline's
        let config = RunConfig::new("https://a.test")
            .with_dynamic_content(DynamicContentOptions::new().with_lazy_load_scroll(true));
        let run = TestRun::create("p", config, Priority::Normal, 0);
        let options = service.build_capture_options(&run, Some(&baseline));
        assert!(options.dynamic.scroll_to_trigger_lazy_load);
        assert!(!options.dynamic.multiple_screenshots);
    }

    #[cfg(not(feature = "browser"))]
    #[tokio::test]
    async fn first_run_bootstraps_a_passing_baseline() {
        let (projects, baselines) = stores();
        let project = Project::new("docs", "https://docs.test");
        projects.save(project.clone()).await.unwrap();
        let service = service_over(&projects, &baselines, HybridDiffEngine::new());

        let run = normal_run(&project, "https://docs.test/guide");
        let result = service.execute(&run).await.unwrap();

        assert_eq!(result.status, ResultStatus::Passed);
        assert!((result.similarity_score - 100.0).abs() < f64::EPSILON);
        assert!(result.explanation.unwrap().contains("Baseline created"));

        let stored = baselines
            .find_active(&project.id, "https://docs.test/guide")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(result.baseline_id, stored.id);
        assert!(!stored.image.is_empty());
    }

    #[cfg(not(feature = "browser"))]
    #[tokio::test]
    async fn second_run_passes_against_its_own_baseline() {
        let (projects, baselines) = stores();
        let project = Project::new("docs", "https://docs.test");
        projects.save(project.clone()).await.unwrap();
        let service = service_over(&projects, &baselines, HybridDiffEngine::new());
        let url = "https://docs.test/pricing";

        service.execute(&normal_run(&project, url)).await.unwrap();
        let baseline = baselines
            .find_active(&project.id, url)
            .await
            .unwrap()
            .unwrap();

        let result = service.execute(&normal_run(&project, url)).await.unwrap();
        assert_eq!(result.status, ResultStatus::Passed);
        assert_eq!(result.baseline_id, baseline.id);
        assert!((result.similarity_score - 100.0).abs() < f64::EPSILON);
        assert!(result.ai_analysis.is_none());
    }

    #[cfg(not(feature = "browser"))]
    #[tokio::test]
    async fn changed_page_fails_and_persists_current_and_diff() {
        let dir = tempfile::tempdir().unwrap();
        let (projects, baselines) = stores();
        let project = Project::new("docs", "https://docs.test");
        projects.save(project.clone()).await.unwrap();
        let service = service_over(&projects, &baselines, HybridDiffEngine::new())
            .with_screenshot_store(ScreenshotStore::new(dir.path()));
        let url = "https://docs.test/changelog";

        service.execute(&normal_run(&project, url)).await.unwrap();
        let v1 = baselines
            .find_active(&project.id, url)
            .await
            .unwrap()
            .unwrap();

        // Replace the baseline with a shifted copy so the next capture
        // mismatches on every pixel.
        let tampered = shift_every_channel(&v1.image);
        let v2 = baselines
            .save_new_version(Baseline::new(
                &project.id,
                url,
                tampered,
                v1.metadata.clone(),
            ))
            .await
            .unwrap();
        assert_eq!(v2.version, 2);

        let result = service.execute(&normal_run(&project, url)).await.unwrap();
        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.baseline_id, v2.id);
        assert!(result.similarity_score < 1.0);

        let current = result.screenshot_path.unwrap();
        assert!(std::path::Path::new(&current).exists());
        assert!(current.contains("_current"));
        let diff = result.diff_path.unwrap();
        assert!(std::path::Path::new(&diff).exists());
        assert!(diff.contains("_diff"));
    }

    #[cfg(not(feature = "browser"))]
    #[tokio::test]
    async fn explicit_baseline_id_overrides_the_active_lookup() {
        let (projects, baselines) = stores();
        let project = Project::new("docs", "https://docs.test");
        projects.save(project.clone()).await.unwrap();
        let service = service_over(&projects, &baselines, HybridDiffEngine::new());
        let url = "https://docs.test/faq";

        service.execute(&normal_run(&project, url)).await.unwrap();
        let active = baselines
            .find_active(&project.id, url)
            .await
            .unwrap()
            .unwrap();

        let pinned = baselines
            .save_new_version(Baseline::new(
                &project.id,
                "pinned-check",
                shift_every_channel(&active.image),
                active.metadata.clone(),
            ))
            .await
            .unwrap();

        let config = RunConfig::new(url).with_baseline_id(&pinned.id);
        let run = TestRun::create(&project.id, config, Priority::Normal, 0);
        let result = service.execute(&run).await.unwrap();

        assert_eq!(result.baseline_id, pinned.id);
        assert_eq!(result.status, ResultStatus::Failed);
    }

    #[cfg(not(feature = "browser"))]
    #[tokio::test]
    async fn ai_disabled_project_never_consults_providers() {
        let (projects, baselines) = stores();
        let project = Project::new("docs", "https://docs.test").with_config(ProjectConfig {
            diff_threshold: 5.0,
            ai_enabled: false,
        });
        projects.save(project.clone()).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(AnsweringProvider {
            calls: Arc::clone(&calls),
            result: AiDiffResult::degraded("unused"),
        });
        let engine = HybridDiffEngine::new().with_openai(provider);
        let service = service_over(&projects, &baselines, engine).with_diff_options(
            HybridDiffOptions::new()
                .with_provider(crate::hybrid::ProviderSelection::OpenAi)
                .with_force_ai(true),
        );
        let url = "https://docs.test/landing";

        service.execute(&normal_run(&project, url)).await.unwrap();
        let v1 = baselines
            .find_active(&project.id, url)
            .await
            .unwrap()
            .unwrap();
        baselines
            .save_new_version(Baseline::new(
                &project.id,
                url,
                shift_every_channel(&v1.image),
                v1.metadata.clone(),
            ))
            .await
            .unwrap();

        let result = service.execute(&normal_run(&project, url)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.ai_analysis.is_none());
        assert_eq!(result.status, ResultStatus::Failed);
    }

    #[cfg(not(feature = "browser"))]
    #[tokio::test]
    async fn ai_changes_map_into_result_regions_and_metadata() {
        let (projects, baselines) = stores();
        let project = Project::new("docs", "https://docs.test");
        projects.save(project.clone()).await.unwrap();

        let region = crate::vision::ChangeRegion {
            x: 4,
            y: 4,
            width: 16,
            height: 16,
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(AnsweringProvider {
            calls: Arc::clone(&calls),
            result: AiDiffResult {
                is_different: true,
                confidence: 96.0,
                changes: vec![
                    VisionChange {
                        change_type: ChangeType::Content,
                        description: "headline rewritten".to_string(),
                        severity: Severity::High,
                        region: Some(region),
                    },
                    VisionChange {
                        change_type: ChangeType::Color,
                        description: "background hue shifted".to_string(),
                        severity: Severity::Medium,
                        region: None,
                    },
                ],
                explanation: "the page content changed".to_string(),
                tokens_used: 321,
                processing_time_ms: 8,
                model: Some("gpt-4o".to_string()),
            },
        });
        let engine = HybridDiffEngine::new().with_openai(provider);
        let service = service_over(&projects, &baselines, engine).with_diff_options(
            HybridDiffOptions::new().with_provider(crate::hybrid::ProviderSelection::OpenAi),
        );
        let url = "https://docs.test/home";

        service.execute(&normal_run(&project, url)).await.unwrap();
        let v1 = baselines
            .find_active(&project.id, url)
            .await
            .unwrap()
            .unwrap();
        baselines
            .save_new_version(Baseline::new(
                &project.id,
                url,
                shift_every_channel(&v1.image),
                v1.metadata.clone(),
            ))
            .await
            .unwrap();

        let result = service.execute(&normal_run(&project, url)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.diff_regions, Some(vec![region]));
        assert_eq!(result.metadata.ai_model.as_deref(), Some("gpt-4o"));
        assert_eq!(result.metadata.tokens_used, Some(321));
        assert!(result.ai_analysis.is_some());
        assert_eq!(result.status, ResultStatus::Failed);
    }
}
