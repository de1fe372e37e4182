//! Persistence boundary: projects, baselines, run records, and screenshots.
//!
//! The engine talks to storage only through the traits in this module, so a
//! document database can back a deployment while tests and the bundled
//! server run on the in-memory implementations. Screenshots are the
//! exception: they are large binaries written to disk by
//! [`ScreenshotStore`], and records reference them by file path only.

use crate::model::{Baseline, Project};
use crate::result::MirarResult;
use crate::run::TestRun;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

// ============================================================================
// Store Traits
// ============================================================================

/// Project records keyed by id.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert or replace a project
    async fn save(&self, project: Project) -> MirarResult<()>;

    /// Fetch a project by id
    async fn get(&self, id: &str) -> MirarResult<Option<Project>>;

    /// List all projects
    async fn list(&self) -> MirarResult<Vec<Project>>;
}

/// Versioned baseline records.
///
/// At most one baseline is active per `(project_id, name)` pair; saving a
/// new version deactivates the prior one.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// Insert or replace a baseline as-is
    async fn save(&self, baseline: Baseline) -> MirarResult<()>;

    /// Fetch a baseline by id
    async fn get(&self, id: &str) -> MirarResult<Option<Baseline>>;

    /// Fetch the highest-version active baseline for `(project_id, name)`
    async fn find_active(&self, project_id: &str, name: &str) -> MirarResult<Option<Baseline>>;

    /// Store `baseline` as the next version for its `(project_id, name)`
    /// pair, deactivating any prior active version. Returns the stored
    /// record with its assigned version.
    async fn save_new_version(&self, baseline: Baseline) -> MirarResult<Baseline>;
}

/// Test run records keyed by id.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace a run record
    async fn save(&self, run: TestRun) -> MirarResult<()>;

    /// Fetch a run record by id
    async fn get(&self, id: &str) -> MirarResult<Option<TestRun>>;
}

// ============================================================================
// In-Memory Implementations
// ============================================================================

/// In-memory [`ProjectStore`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryProjectStore {
    projects: Arc<RwLock<HashMap<String, Project>>>,
}

impl InMemoryProjectStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn save(&self, project: Project) -> MirarResult<()> {
        self.projects
            .write()
            .await
            .insert(project.id.clone(), project);
        Ok(())
    }

    async fn get(&self, id: &str) -> MirarResult<Option<Project>> {
        Ok(self.projects.read().await.get(id).cloned())
    }

    async fn list(&self) -> MirarResult<Vec<Project>> {
        Ok(self.projects.read().await.values().cloned().collect())
    }
}

/// In-memory [`BaselineStore`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryBaselineStore {
    baselines: Arc<RwLock<HashMap<String, Baseline>>>,
}

impl InMemoryBaselineStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineStore for InMemoryBaselineStore {
    async fn save(&self, baseline: Baseline) -> MirarResult<()> {
        self.baselines
            .write()
            .await
            .insert(baseline.id.clone(), baseline);
        Ok(())
    }

    async fn get(&self, id: &str) -> MirarResult<Option<Baseline>> {
        Ok(self.baselines.read().await.get(id).cloned())
    }

    async fn find_active(&self, project_id: &str, name: &str) -> MirarResult<Option<Baseline>> {
        let baselines = self.baselines.read().await;
        Ok(baselines
            .values()
            .filter(|b| b.project_id == project_id && b.name == name && b.is_active)
            .max_by_key(|b| b.version)
            .cloned())
    }

    async fn save_new_version(&self, mut baseline: Baseline) -> MirarResult<Baseline> {
        let mut baselines = self.baselines.write().await;

        let mut highest = 0;
        for existing in baselines.values_mut() {
            if existing.project_id == baseline.project_id && existing.name == baseline.name {
                highest = highest.max(existing.version);
                existing.is_active = false;
            }
        }

        baseline.version = highest + 1;
        baseline.is_active = true;
        baselines.insert(baseline.id.clone(), baseline.clone());
        Ok(baseline)
    }
}

/// In-memory [`RunStore`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryRunStore {
    runs: Arc<RwLock<HashMap<String, TestRun>>>,
}

impl InMemoryRunStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, run: TestRun) -> MirarResult<()> {
        self.runs.write().await.insert(run.id.clone(), run);
        Ok(())
    }

    async fn get(&self, id: &str) -> MirarResult<Option<TestRun>> {
        Ok(self.runs.read().await.get(id).cloned())
    }
}

// ============================================================================
// Screenshot Files
// ============================================================================

/// Which capture a stored screenshot file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotRole {
    /// The expected-state reference image
    Baseline,
    /// The freshly captured image
    Current,
    /// The rendered diff composite
    Diff,
}

impl ScreenshotRole {
    /// File name suffix for this role
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Current => "current",
            Self::Diff => "diff",
        }
    }
}

/// Writes screenshots under a base directory as
/// `{project_id}_{test_id}_{timestamp}_{role}.png`.
#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    base_dir: PathBuf,
}

impl ScreenshotStore {
    /// Create a store rooted at `base_dir`. The directory is created on
    /// first write.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory screenshots are written under
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write `bytes` for the given run and role, returning the file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub async fn save(
        &self,
        project_id: &str,
        test_id: &str,
        role: ScreenshotRole,
        bytes: &[u8],
    ) -> MirarResult<String> {
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let timestamp = Utc::now().timestamp_millis();
        let file_name = format!("{project_id}_{test_id}_{timestamp}_{}.png", role.as_str());
        let path = self.base_dir.join(file_name);
        tokio::fs::write(&path, bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}
