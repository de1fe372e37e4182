//! Domain records: projects, baselines, and test results.
//!
//! These are the serializable records the engine persists and serves over
//! HTTP. Wire field names are camelCase. Screenshot bytes never travel with
//! a record; they are written through the screenshot store and referenced by
//! file path (baselines are the one exception, and their bytes are skipped
//! during serialization).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::DynamicContentOptions;
use crate::pixel::MaskRegion;

/// Browser viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Viewport {
    /// Create a viewport with explicit dimensions
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Per-project comparison settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Mismatch percentage above which a comparison is a regression
    pub diff_threshold: f64,
    /// Whether AI vision analysis may be invoked for this project
    pub ai_enabled: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            diff_threshold: 5.0,
            ai_enabled: true,
        }
    }
}

/// A site or application under visual test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Unique project id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Base URL test runs are executed against
    pub base_url: String,
    /// Comparison settings
    pub config: ProjectConfig,
    /// Soft-delete flag; inactive projects reject new runs
    pub is_active: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Create an active project with default comparison settings
    #[must_use]
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            base_url: base_url.into(),
            config: ProjectConfig::default(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the comparison settings
    #[must_use]
    pub fn with_config(mut self, config: ProjectConfig) -> Self {
        self.config = config;
        self
    }

    /// Soft-delete: the record stays, new runs are rejected
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }
}

/// Capture context recorded alongside a baseline image
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineMetadata {
    /// Viewport the baseline was captured at
    pub viewport: Viewport,
    /// URL the baseline was captured from
    pub url: String,
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
}

/// Regions and selectors excluded from comparison for a baseline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskConfig {
    /// CSS selectors masked at capture time
    #[serde(default)]
    pub selectors: Vec<String>,
    /// Fixed pixel regions excluded at comparison time
    #[serde(default)]
    pub regions: Vec<MaskRegion>,
    /// Normalization applied when capturing against this baseline; `None`
    /// leaves the engine defaults in place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicContentOptions>,
}

impl MaskConfig {
    /// True when neither selectors nor regions are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty() && self.regions.is_empty()
    }
}

/// A reference screenshot for one (project, name) pair.
///
/// Baselines are immutable once created; replacing one stores a new record
/// with a bumped version and deactivates the prior version. At most one
/// version per (project, name) is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Baseline {
    /// Unique baseline id
    pub id: String,
    /// Owning project id
    pub project_id: String,
    /// Logical name, stable across versions
    pub name: String,
    /// PNG bytes; held in memory, never serialized with the record
    #[serde(skip)]
    pub image: Vec<u8>,
    /// Serialized DOM snapshot captured with the image, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_snapshot: Option<String>,
    /// Capture context
    pub metadata: BaselineMetadata,
    /// Monotonic version within (project, name), starting at 1
    pub version: u32,
    /// Whether this version is the comparison target
    pub is_active: bool,
    /// Masking applied when comparing against this baseline
    #[serde(default)]
    pub mask: MaskConfig,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Baseline {
    /// Create version 1 of a baseline from captured bytes
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        image: Vec<u8>,
        metadata: BaselineMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            name: name.into(),
            image,
            dom_snapshot: None,
            metadata,
            version: 1,
            is_active: true,
            mask: MaskConfig::default(),
            created_at: Utc::now(),
        }
    }

    /// Attach a DOM snapshot
    #[must_use]
    pub fn with_dom_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.dom_snapshot = Some(snapshot.into());
        self
    }

    /// Attach mask configuration
    #[must_use]
    pub fn with_mask(mut self, mask: MaskConfig) -> Self {
        self.mask = mask;
        self
    }
}

/// Verdict for a completed comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    /// No visual regression detected
    Passed,
    /// Visual regression detected
    Failed,
    /// A reviewer must decide; set by human override, never by the engine
    Unresolved,
}

/// Metadata recorded with a test result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    /// End-to-end comparison time in milliseconds
    pub execution_time_ms: u64,
    /// Model that produced the AI analysis, when one ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<String>,
    /// Tokens consumed by the AI analysis, when one ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

/// Outcome of one executed test run.
///
/// Created once when the run completes and embedded in the run record. The
/// only permitted mutation afterwards is a human status override to
/// [`ResultStatus::Unresolved`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Unique result id
    pub id: String,
    /// Run that produced this result
    pub test_run_id: String,
    /// Baseline compared against; the record is not removed if the baseline
    /// is later deleted
    pub baseline_id: String,
    /// Verdict
    pub status: ResultStatus,
    /// Similarity score, 0 to 100
    pub similarity_score: f64,
    /// Regions flagged as changed, when an AI analysis supplied them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_regions: Option<Vec<crate::vision::ChangeRegion>>,
    /// File path of the captured screenshot, when persistence is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    /// File path of the rendered diff image, when persistence is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_path: Option<String>,
    /// Human-readable explanation of the verdict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Structured AI analysis, when one ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<crate::vision::AiDiffResult>,
    /// Timing and model metadata
    pub metadata: ResultMetadata,
}

impl TestResult {
    /// Create a result for a completed run
    #[must_use]
    pub fn new(
        test_run_id: impl Into<String>,
        baseline_id: impl Into<String>,
        status: ResultStatus,
        similarity_score: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            test_run_id: test_run_id.into(),
            baseline_id: baseline_id.into(),
            status,
            similarity_score,
            diff_regions: None,
            screenshot_path: None,
            diff_path: None,
            explanation: None,
            ai_analysis: None,
            metadata: ResultMetadata::default(),
        }
    }

    /// Mark the result for human review
    pub fn mark_unresolved(&mut self) {
        self.status = ResultStatus::Unresolved;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn project_starts_active_with_defaults() {
        let project = Project::new("marketing-site", "https://example.com");
        assert!(project.is_active);
        assert!((project.config.diff_threshold - 5.0).abs() < f64::EPSILON);
        assert!(project.config.ai_enabled);
    }

    #[test]
    fn deactivate_is_soft() {
        let mut project = Project::new("app", "https://app.example.com");
        project.deactivate();
        assert!(!project.is_active);
        assert_eq!(project.name, "app");
    }

    #[test]
    fn project_serializes_camel_case() {
        let project = Project::new("site", "https://example.com");
        let json = serde_json::to_string(&project).unwrap();
        assert!(json.contains("\"baseUrl\""));
        assert!(json.contains("\"diffThreshold\""));
        assert!(json.contains("\"aiEnabled\""));
        assert!(json.contains("\"isActive\""));
    }

    #[test]
    fn baseline_image_bytes_stay_out_of_records() {
        let metadata = BaselineMetadata {
            viewport: Viewport::default(),
            url: "https://example.com/pricing".to_string(),
            timestamp: Utc::now(),
        };
        let baseline = Baseline::new("p1", "pricing", vec![0xDE, 0xAD], metadata);
        let json = serde_json::to_string(&baseline).unwrap();
        assert!(!json.contains("image"));
        assert!(json.contains("\"projectId\":\"p1\""));
        assert!(json.contains("\"version\":1"));
    }

    #[test]
    fn result_status_uses_screaming_wire_values() {
        assert_eq!(
            serde_json::to_string(&ResultStatus::Passed).unwrap(),
            "\"PASSED\""
        );
        assert_eq!(
            serde_json::to_string(&ResultStatus::Unresolved).unwrap(),
            "\"UNRESOLVED\""
        );
    }

    #[test]
    fn result_override_to_unresolved() {
        let mut result = TestResult::new("run-1", "base-1", ResultStatus::Failed, 42.0);
        result.mark_unresolved();
        assert_eq!(result.status, ResultStatus::Unresolved);
        assert_eq!(result.test_run_id, "run-1");
    }

    #[test]
    fn mask_config_emptiness() {
        assert!(MaskConfig::default().is_empty());
        let mask = MaskConfig {
            selectors: vec![".ad-banner".to_string()],
            regions: Vec::new(),
            dynamic: None,
        };
        assert!(!mask.is_empty());

        // Normalization on its own masks nothing
        let normalized = MaskConfig {
            selectors: Vec::new(),
            regions: Vec::new(),
            dynamic: Some(DynamicContentOptions::new()),
        };
        assert!(normalized.is_empty());
    }
}
