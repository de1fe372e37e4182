//! HTTP service over the test pipeline
//!
//! Thin JSON layer on top of the library: enqueue runs, poll run records,
//! snapshot the queue, and run synchronous pixel comparisons. Project
//! existence and activity are checked here at enqueue time; everything
//! after the 202 is the queue's business.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use mirar::{
    BaselineStore, DynamicContentOptions, EngineConfig, ExecutionQueue, InMemoryBaselineStore,
    InMemoryProjectStore, InMemoryRunStore, MaskRegion, MirarError, MirarResult, PageCapturer,
    PixelCompareOptions, PixelDiffEngine, PixelDiffResult, Priority, Project, ProjectConfig,
    ProjectStore, QueueStatus, RunConfig, RunStatus, RunStore, TestExecutionService, TestRun,
    Viewport, WaitConditions, DEFAULT_DIFF_THRESHOLD,
};

// ============================================================================
// Wire Types
// ============================================================================

/// Body of `POST /tests/run`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Project the run belongs to
    pub project_id: String,
    /// Page URL to test
    pub url: String,
    /// Pin the comparison to this baseline instead of looking one up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_id: Option<String>,
    /// Viewport for the capture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    /// Scheduling priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Page readiness conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_conditions: Option<WaitConditions>,
    /// Per-run dynamic content handling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_content: Option<DynamicContentOptions>,
}

/// Receipt returned by `POST /tests/run`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAccepted {
    /// Id to poll under `GET /tests/{id}`
    pub test_id: String,
    /// Always QUEUED at acceptance
    pub status: RunStatus,
    /// Tier the run was queued into
    pub priority: Priority,
    /// 1-based service position at enqueue time
    pub queue_position: usize,
}

/// Body of `POST /pixel/compare`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelCompareRequest {
    /// Base64-encoded baseline image
    pub baseline: String,
    /// Base64-encoded candidate image
    pub current: String,
    /// Mismatch percentage threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Regions excluded from comparison
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_regions: Option<Vec<MaskRegion>>,
}

/// Result payload of `POST /pixel/compare`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelCompareResponse {
    /// Percentage of compared pixels that differ
    pub mismatch_percentage: f64,
    /// Count of differing pixels
    pub diff_pixels: usize,
    /// Pixels compared, masked ones included
    pub total_pixels: usize,
    /// Whether the mismatch crossed the threshold
    pub is_different: bool,
    /// True when the inputs were resized to a common size first
    pub dimensions_resized: bool,
    /// Base64 side-by-side diff PNG, present when pixels differ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_image: Option<String>,
}

impl From<PixelDiffResult> for PixelCompareResponse {
    fn from(result: PixelDiffResult) -> Self {
        Self {
            mismatch_percentage: result.mismatch_percentage,
            diff_pixels: result.diff_pixels,
            total_pixels: result.total_pixels,
            is_different: result.is_different,
            dimensions_resized: result.dimensions_resized,
            diff_image: result
                .diff_image
                .map(|png| base64::engine::general_purpose::STANDARD.encode(png)),
        }
    }
}

/// JSON error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description
    pub error: String,
}

/// Payload of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Always "ok" while the process serves requests
    pub status: String,
    /// Crate version
    pub version: String,
}

/// Maps engine errors onto HTTP statuses with a JSON body
#[derive(Debug)]
struct ApiError(MirarError);

impl From<MirarError> for ApiError {
    fn from(e: MirarError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MirarError::NotFound { .. } => StatusCode::NOT_FOUND,
            MirarError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            MirarError::Decode { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MirarError::InvalidState { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Server
// ============================================================================

/// Shared handles behind every route
#[derive(Debug, Clone)]
pub struct AppState {
    queue: Arc<ExecutionQueue>,
    runs: Arc<InMemoryRunStore>,
    projects: Arc<InMemoryProjectStore>,
    pixel: Arc<PixelDiffEngine>,
    max_retries: u32,
}

/// The assembled HTTP testing service
#[derive(Debug)]
pub struct ApiServer {
    state: AppState,
    config: EngineConfig,
    port: u16,
}

impl ApiServer {
    /// Assemble stores, diff engine, capturer, and queue from `config`.
    ///
    /// Must be called inside a tokio runtime; the queue spawns its
    /// scheduler task immediately.
    #[must_use]
    pub fn new(config: EngineConfig, port: u16) -> Self {
        let projects = Arc::new(InMemoryProjectStore::new());
        let baselines = Arc::new(InMemoryBaselineStore::new());
        let runs = Arc::new(InMemoryRunStore::new());

        let mut service = TestExecutionService::new(
            PageCapturer::new(),
            config.build_engine(),
            Arc::clone(&projects) as Arc<dyn ProjectStore>,
            Arc::clone(&baselines) as Arc<dyn BaselineStore>,
        )
        .with_diff_options(config.diff_options())
        .with_dynamic_defaults(config.dynamic.clone());
        if let Some(store) = config.screenshot_store() {
            service = service.with_screenshot_store(store);
        }

        let queue = Arc::new(ExecutionQueue::new(
            Arc::new(service),
            Arc::clone(&runs) as Arc<dyn RunStore>,
            config.max_concurrency,
        ));

        let state = AppState {
            queue,
            runs,
            projects,
            pixel: Arc::new(PixelDiffEngine::new()),
            max_retries: config.max_retries,
        };

        Self {
            state,
            config,
            port,
        }
    }

    /// Create an active project so enqueued runs have somewhere to land.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be stored.
    pub async fn bootstrap_project(
        &self,
        name: impl Into<String>,
        base_url: impl Into<String>,
        ai_enabled: bool,
    ) -> MirarResult<Project> {
        let project = Project::new(name, base_url).with_config(ProjectConfig {
            diff_threshold: self.config.diff_threshold,
            ai_enabled,
        });
        self.state.projects.save(project.clone()).await?;
        Ok(project)
    }

    /// Shared state, for assembling routers in tests
    #[must_use]
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the JSON router over the given state
    #[must_use]
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/tests/run", post(enqueue_run))
            .route("/tests/{id}", get(get_run))
            .route("/queue/status", get(queue_status))
            .route("/pixel/compare", post(pixel_compare))
            .route("/health", get(health))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(state)
    }

    /// Bind and serve until the process is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let app = Self::router(self.state.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Mirar service listening on http://{addr}");
        axum::serve(listener, app).await
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn enqueue_run(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let project = state
        .projects
        .get(&request.project_id)
        .await?
        .ok_or_else(|| MirarError::NotFound {
            resource: format!("project {}", request.project_id),
        })?;
    if !project.is_active {
        return Err(MirarError::NotFound {
            resource: format!("project {} (deactivated)", project.id),
        }
        .into());
    }

    let mut config = RunConfig::new(&request.url);
    if let Some(viewport) = request.viewport {
        config = config.with_viewport(viewport);
    }
    if let Some(baseline_id) = request.baseline_id {
        config = config.with_baseline_id(baseline_id);
    }
    if let Some(wait) = request.wait_conditions {
        config = config.with_wait_conditions(wait);
    }
    if let Some(dynamic) = request.dynamic_content {
        config = config.with_dynamic_content(dynamic);
    }

    let priority = request.priority.unwrap_or_default();
    let run = TestRun::create(&project.id, config, priority, state.max_retries);
    // Saved before enqueueing so polls see the record while it is queued
    state.runs.save(run.clone()).await?;
    let enqueued = state.queue.enqueue(run);
    info!(
        run_id = %enqueued.run_id,
        project_id = %project.id,
        position = enqueued.queue_position,
        "Run accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            test_id: enqueued.run_id,
            status: RunStatus::Queued,
            priority,
            queue_position: enqueued.queue_position,
        }),
    ))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TestRun>, ApiError> {
    let run = state
        .runs
        .get(&id)
        .await?
        .ok_or_else(|| MirarError::NotFound {
            resource: format!("test run {id}"),
        })?;
    Ok(Json(run))
}

async fn queue_status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.queue.status())
}

async fn pixel_compare(
    State(state): State<AppState>,
    Json(request): Json<PixelCompareRequest>,
) -> Result<Json<PixelCompareResponse>, ApiError> {
    let baseline = decode_image_field("baseline", &request.baseline)?;
    let current = decode_image_field("current", &request.current)?;

    let options = PixelCompareOptions {
        threshold: request.threshold.unwrap_or(DEFAULT_DIFF_THRESHOLD),
        mask_regions: request.mask_regions.unwrap_or_default(),
    };

    // Decode and per-pixel comparison are CPU-bound; keep them off the
    // async workers
    let engine = Arc::clone(&state.pixel);
    let result =
        tokio::task::spawn_blocking(move || engine.compare(&baseline, &current, &options))
            .await
            .map_err(|e| MirarError::Task {
                message: e.to_string(),
            })??;

    Ok(Json(PixelCompareResponse::from(result)))
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn decode_image_field(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| {
            ApiError(MirarError::Decode {
                message: format!("{field} is not valid base64: {e}"),
            })
        })
}
