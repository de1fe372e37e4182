//! Test run lifecycle.
//!
//! A run is an immutable record moved through its states by consuming
//! transition methods:
//!
//! ```text
//!   QUEUED ──start()──> RUNNING ──complete()──> COMPLETED
//!                          │
//!                          └──fail()──> FAILED
//! ```
//!
//! `retry()` is the only edge back: a failed attempt with budget left
//! returns to QUEUED with its timestamps cleared. Every run enters the
//! world QUEUED; no other construction path exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::DynamicContentOptions;
use crate::model::{TestResult, Viewport};
use crate::result::{MirarError, MirarResult};

/// Execution state of a test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Waiting in a priority queue
    Queued,
    /// Currently executing
    Running,
    /// Finished with a result
    Completed,
    /// Finished without a result; retries exhausted
    Failed,
}

impl RunStatus {
    /// True for states no transition leaves
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Scheduling priority; higher tiers are always served first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Served before everything else
    High,
    /// Default tier
    #[default]
    Normal,
    /// Served only when higher tiers are empty
    Low,
}

/// Page readiness conditions applied before capture
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConditions {
    /// CSS selectors that must be present before capturing
    #[serde(default)]
    pub selectors: Vec<String>,
    /// Fixed settle delay after all other conditions, in milliseconds
    #[serde(default)]
    pub delay_ms: u64,
    /// Wait for the network to go quiet, tolerating a timeout
    #[serde(default = "default_network_idle")]
    pub network_idle: bool,
}

fn default_network_idle() -> bool {
    true
}

impl Default for WaitConditions {
    fn default() -> Self {
        Self {
            selectors: Vec::new(),
            delay_ms: 0,
            network_idle: true,
        }
    }
}

/// What a single run captures and compares
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Page URL to capture
    pub url: String,
    /// Viewport for the capture
    #[serde(default)]
    pub viewport: Viewport,
    /// Explicit baseline override; otherwise the active baseline for the
    /// (project, url) pair is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_id: Option<String>,
    /// Readiness conditions applied before capture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_conditions: Option<WaitConditions>,
    /// Per-run normalization overriding the baseline's and the engine's
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_content: Option<DynamicContentOptions>,
}

impl RunConfig {
    /// Create a config for a URL with the default viewport
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            viewport: Viewport::default(),
            baseline_id: None,
            wait_conditions: None,
            dynamic_content: None,
        }
    }

    /// Set the viewport
    #[must_use]
    pub const fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Pin the comparison to an explicit baseline
    #[must_use]
    pub fn with_baseline_id(mut self, baseline_id: impl Into<String>) -> Self {
        self.baseline_id = Some(baseline_id.into());
        self
    }

    /// Attach readiness conditions
    #[must_use]
    pub fn with_wait_conditions(mut self, conditions: WaitConditions) -> Self {
        self.wait_conditions = Some(conditions);
        self
    }

    /// Override dynamic-content normalization for this run
    #[must_use]
    pub fn with_dynamic_content(mut self, dynamic: DynamicContentOptions) -> Self {
        self.dynamic_content = Some(dynamic);
        self
    }
}

/// Outcome of asking a failed run for another attempt
#[derive(Debug)]
pub enum RetryOutcome {
    /// Budget remained; the run is QUEUED again with timestamps cleared
    Granted(TestRun),
    /// Budget exhausted; the run is returned unchanged for `fail()`
    Exhausted(TestRun),
}

/// One queued, running, or finished visual test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    /// Unique run id
    pub id: String,
    /// Owning project id
    pub project_id: String,
    /// Current lifecycle state
    pub status: RunStatus,
    /// Scheduling priority
    pub priority: Priority,
    /// Capture and comparison parameters
    pub config: RunConfig,
    /// Attempts consumed beyond the first
    pub retry_count: u32,
    /// Retries allowed beyond the first attempt
    pub max_retries: u32,
    /// Enqueue timestamp
    pub created_at: DateTime<Utc>,
    /// Start of the current attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// End of the final attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Message from the most recent failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Comparison outcome, present once COMPLETED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TestResult>,
}

impl TestRun {
    /// Create a QUEUED run
    #[must_use]
    pub fn create(
        project_id: impl Into<String>,
        config: RunConfig,
        priority: Priority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            status: RunStatus::Queued,
            priority,
            config,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    /// QUEUED -> RUNNING, stamping the attempt start
    ///
    /// # Errors
    ///
    /// [`MirarError::InvalidState`] from any state but QUEUED
    pub fn start(mut self) -> MirarResult<Self> {
        if self.status != RunStatus::Queued {
            return Err(MirarError::InvalidState {
                message: format!("cannot start run {} from {:?}", self.id, self.status),
            });
        }
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(self)
    }

    /// RUNNING -> COMPLETED, attaching the result
    ///
    /// # Errors
    ///
    /// [`MirarError::InvalidState`] from any state but RUNNING
    pub fn complete(mut self, result: TestResult) -> MirarResult<Self> {
        if self.status != RunStatus::Running {
            return Err(MirarError::InvalidState {
                message: format!("cannot complete run {} from {:?}", self.id, self.status),
            });
        }
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        Ok(self)
    }

    /// RUNNING -> FAILED, recording the terminal error
    ///
    /// # Errors
    ///
    /// [`MirarError::InvalidState`] from any state but RUNNING
    pub fn fail(mut self, error: impl Into<String>) -> MirarResult<Self> {
        if self.status != RunStatus::Running {
            return Err(MirarError::InvalidState {
                message: format!("cannot fail run {} from {:?}", self.id, self.status),
            });
        }
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        Ok(self)
    }

    /// Request another attempt after a failure.
    ///
    /// Granted while `retry_count < max_retries`: the count is incremented,
    /// the run returns to QUEUED, and the attempt timestamps are cleared.
    /// The recorded error message is kept as the last-attempt trace.
    #[must_use]
    pub fn retry(mut self) -> RetryOutcome {
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.status = RunStatus::Queued;
            self.started_at = None;
            self.completed_at = None;
            RetryOutcome::Granted(self)
        } else {
            RetryOutcome::Exhausted(self)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::ResultStatus;

    fn queued_run() -> TestRun {
        TestRun::create(
            "project-1",
            RunConfig::new("https://example.com/pricing"),
            Priority::Normal,
            3,
        )
    }

    #[test]
    fn runs_are_born_queued() {
        let run = queued_run();
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.retry_count, 0);
        assert!(run.started_at.is_none());
        assert!(run.result.is_none());
    }

    #[test]
    fn happy_path_queued_running_completed() {
        let run = queued_run().start().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());

        let result = TestResult::new(&run.id, "baseline-1", ResultStatus::Passed, 100.0);
        let run = run.complete(result).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());
        assert_eq!(run.result.unwrap().status, ResultStatus::Passed);
    }

    #[test]
    fn fail_records_error_and_terminal_state() {
        let run = queued_run().start().unwrap();
        let run = run.fail("navigation timed out").unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.status.is_terminal());
        assert_eq!(run.error.as_deref(), Some("navigation timed out"));
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let running = queued_run().start().unwrap();
        let err = running.clone().start().unwrap_err();
        assert!(matches!(err, MirarError::InvalidState { .. }));

        let queued = queued_run();
        let result = TestResult::new(&queued.id, "b", ResultStatus::Passed, 100.0);
        assert!(queued.clone().complete(result).is_err());
        assert!(queued.fail("boom").is_err());

        let completed = running
            .complete(TestResult::new("r", "b", ResultStatus::Passed, 100.0))
            .unwrap();
        assert!(completed.fail("boom").is_err());
    }

    #[test]
    fn retry_under_budget_requeues_and_clears_timestamps() {
        let mut run = queued_run().start().unwrap();
        run.error = Some("provider hiccup".to_string());
        match run.retry() {
            RetryOutcome::Granted(run) => {
                assert_eq!(run.status, RunStatus::Queued);
                assert_eq!(run.retry_count, 1);
                assert!(run.started_at.is_none());
                assert!(run.completed_at.is_none());
                assert_eq!(run.error.as_deref(), Some("provider hiccup"));
            }
            RetryOutcome::Exhausted(_) => panic!("expected a granted retry"),
        }
    }

    #[test]
    fn retry_at_budget_is_exhausted_and_unchanged() {
        let mut run = queued_run();
        run.max_retries = 2;
        run.retry_count = 2;
        let run = run.start().unwrap();
        match run.retry() {
            RetryOutcome::Exhausted(run) => {
                assert_eq!(run.retry_count, 2);
                assert_eq!(run.status, RunStatus::Running);
            }
            RetryOutcome::Granted(_) => panic!("budget was spent"),
        }
    }

    #[test]
    fn zero_max_retries_means_single_attempt() {
        let run = TestRun::create("p", RunConfig::new("https://x.test"), Priority::Low, 0)
            .start()
            .unwrap();
        assert!(matches!(run.retry(), RetryOutcome::Exhausted(_)));
    }

    #[test]
    fn statuses_and_priorities_use_screaming_wire_values() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Queued).unwrap(),
            "\"QUEUED\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::Completed).unwrap(),
            "\"COMPLETED\""
        );
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"HIGH\"");
        let back: Priority = serde_json::from_str("\"LOW\"").unwrap();
        assert_eq!(back, Priority::Low);
    }

    #[test]
    fn run_serializes_camel_case() {
        let run = queued_run();
        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"projectId\""));
        assert!(json.contains("\"retryCount\""));
        assert!(json.contains("\"maxRetries\""));
        assert!(json.contains("\"createdAt\""));
        // cleared optionals stay off the wire
        assert!(!json.contains("startedAt"));
    }
}
