//! # Development Control Plane
//!
//! An in-memory HTTP control plane speaking the same wire contract as the real
//! one, for local runs of `deployctl` and for the integration tests.
//!
//! Every job follows the configured [`JobScript`]: a number of long-poll
//! requests answered with `408 Request Timeout`, then a terminal status. On
//! success the scripted outputs are encrypted to the recipient submitted with
//! the job, so the server can hand them out but never read them back.
//!
//! ## Routes
//!
//! | Method | Path                                        | Success |
//! |--------|---------------------------------------------|---------|
//! | POST   | `/orgs/:org/jobs`                           | 201     |
//! | GET    | `/orgs/:org/jobs/:id`                       | 200     |
//! | GET    | `/orgs/:org/jobs/:id/wait`                  | 200/408 |
//! | GET    | `/orgs/:org/jobs/:id/encrypted-outputs`     | 200     |

mod script;

pub use script::{DevServerConfig, JobScript, ScriptedResult};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::client::transport::IDEMPOTENCY_HEADER;
use crate::common::messages::{CreateJobBody, EncryptedOutputs, Job, JobStatus};
use crate::keys;
use script::DevJob;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

fn reject(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Requests served per endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub creates: usize,
    pub waits: usize,
    pub outputs: usize,
    pub gets: usize,
}

#[derive(Default)]
struct Counters {
    creates: AtomicUsize,
    waits: AtomicUsize,
    outputs: AtomicUsize,
    gets: AtomicUsize,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, DevJob>,
    /// Idempotency key to job id
    tokens: HashMap<String, String>,
}

struct AppState {
    config: DevServerConfig,
    registry: Mutex<Registry>,
    counters: Counters,
}

impl AppState {
    // Never held across an await.
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn authorize(&self, headers: &HeaderMap) -> ApiResult<()> {
        let Some(token) = &self.config.api_token else {
            return Ok(());
        };

        let expected = format!("Bearer {token}");
        match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some(presented) if presented == expected => Ok(()),
            _ => Err(reject(StatusCode::UNAUTHORIZED, "missing or invalid bearer token")),
        }
    }
}

/// Cheap to clone; all clones share the same jobs.
#[derive(Clone)]
pub struct DevControlPlane {
    state: Arc<AppState>,
}

impl DevControlPlane {
    pub fn new(config: DevServerConfig) -> Self {
        Self {
            state: Arc::new(AppState {
                config,
                registry: Mutex::new(Registry::default()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &DevServerConfig {
        &self.state.config
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/orgs/:org_id/jobs", post(create_job))
            .route("/orgs/:org_id/jobs/:job_id", get(get_job))
            .route("/orgs/:org_id/jobs/:job_id/wait", get(wait_for_job))
            .route(
                "/orgs/:org_id/jobs/:job_id/encrypted-outputs",
                get(encrypted_outputs),
            )
            .with_state(self.state.clone())
    }

    /// Serves on `listener` until the task is dropped or the listener fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let router = self.router();
        axum::serve(listener, router).await
    }

    /// Binds an ephemeral port on localhost and serves in the background.
    pub async fn spawn(&self) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = self.clone();

        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                warn!("Development control plane stopped: {}", e);
            }
        });

        info!("🌐 Development control plane listening on http://{}", addr);
        Ok(addr)
    }

    pub fn request_counts(&self) -> RequestCounts {
        let counters = &self.state.counters;
        RequestCounts {
            creates: counters.creates.load(Ordering::SeqCst),
            waits: counters.waits.load(Ordering::SeqCst),
            outputs: counters.outputs.load(Ordering::SeqCst),
            gets: counters.gets.load(Ordering::SeqCst),
        }
    }

    pub fn job_count(&self) -> usize {
        self.state.registry().jobs.len()
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn create_job(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateJobBody>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    state.counters.creates.fetch_add(1, Ordering::SeqCst);
    state.authorize(&headers)?;

    let token = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "missing Idempotency-Key header"))?
        .to_string();

    keys::validate_recipient(&body.encrypted_outputs_recipient)
        .map_err(|e| reject(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let mut registry = state.registry();

    if let Some(existing) = registry
        .tokens
        .get(&token)
        .and_then(|id| registry.jobs.get(id))
    {
        info!("🔁 Replayed idempotency key {} -> job {}", token, existing.job.id);
        return Ok((StatusCode::CREATED, Json(existing.job.clone())));
    }

    let job = Job {
        id: Uuid::new_v4().to_string(),
        project_id: body.project_id,
        env_id: body.env_id,
        mode: body.mode,
        status: JobStatus::Pending,
        status_message: None,
        created_at: Utc::now(),
        completed_at: None,
        encrypted_outputs: None,
    };

    info!(
        "📥 Created {} job {} for {}/{}",
        job.mode, job.id, job.project_id, job.env_id
    );

    registry.tokens.insert(token, job.id.clone());
    registry.jobs.insert(
        job.id.clone(),
        DevJob::new(&org_id, job.clone(), body.encrypted_outputs_recipient),
    );

    Ok((StatusCode::CREATED, Json(job)))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path((org_id, job_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Job>> {
    state.counters.gets.fetch_add(1, Ordering::SeqCst);
    state.authorize(&headers)?;

    let registry = state.registry();
    let entry = lookup(&registry, &org_id, &job_id)?;
    Ok(Json(entry.job.clone()))
}

async fn wait_for_job(
    State(state): State<Arc<AppState>>,
    Path((org_id, job_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Job>> {
    state.counters.waits.fetch_add(1, Ordering::SeqCst);
    state.authorize(&headers)?;

    let job = {
        let mut registry = state.registry();
        let entry = registry
            .jobs
            .get_mut(&job_id)
            .filter(|entry| entry.org_id == org_id)
            .ok_or_else(|| reject(StatusCode::NOT_FOUND, "job not found"))?;
        entry
            .advance(&state.config.script)
            .map_err(|e| reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        entry.job.clone()
    };

    if job.status.is_terminal() {
        info!("🏁 Job {} is {}", job.id, job.status);
        return Ok(Json(job));
    }

    tokio::time::sleep(state.config.long_poll_window()).await;
    Err(reject(StatusCode::REQUEST_TIMEOUT, "job still pending"))
}

async fn encrypted_outputs(
    State(state): State<Arc<AppState>>,
    Path((org_id, job_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<EncryptedOutputs>> {
    state.counters.outputs.fetch_add(1, Ordering::SeqCst);
    state.authorize(&headers)?;

    if let Some(status) = state.config.script.outputs_status {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err(reject(status, "scripted outputs failure"));
    }

    let registry = state.registry();
    let entry = lookup(&registry, &org_id, &job_id)?;
    entry
        .encrypted_outputs()
        .map(Json)
        .ok_or_else(|| reject(StatusCode::CONFLICT, format!("job is {}", entry.job.status)))
}

fn lookup<'a>(registry: &'a Registry, org_id: &str, job_id: &str) -> ApiResult<&'a DevJob> {
    registry
        .jobs
        .get(job_id)
        .filter(|entry| entry.org_id == org_id)
        .ok_or_else(|| reject(StatusCode::NOT_FOUND, "job not found"))
}
