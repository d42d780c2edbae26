//! Warden sidecar of a duckjudge host.
//!
//! The executor never talks to Docker or the host filesystem directly. It
//! asks the warden to start a sandbox container on a host port, to remove
//! it again, and to create or unmount the scratch filesystem of an
//! execution.

pub mod config;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod scratch;

pub use config::WardenSettings;
pub use error::{Result, WardenError};
pub use registry::{PortClaim, PortEntry, PortRegistry};
pub use runtime::{ContainerLimits, ContainerRuntime, DockerRuntime};
pub use scratch::ScratchFilesystem;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use duckjudge_types::{ContainerCreationRequest, ContainerCreationResponse, ExecutionFsQuery};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Default port of the warden's HTTP surface.
pub const DEFAULT_PORT: u16 = 7139;

#[derive(Clone)]
pub struct WardenState {
    pub registry: Arc<PortRegistry>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub scratch: Arc<ScratchFilesystem>,
}

impl WardenState {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, scratch: ScratchFilesystem) -> Self {
        Self {
            registry: Arc::new(PortRegistry::new()),
            runtime,
            scratch: Arc::new(scratch),
        }
    }

    /// Removes every container still mapped, for shutdown.
    pub async fn teardown(&self) {
        for (port, id) in self.registry.drain() {
            if let Err(e) = self.runtime.remove(&id).await {
                log::warn!("failed to remove container {} on port {}: {}", id, port, e);
            }
        }
    }
}

async fn create_container(
    State(state): State<WardenState>,
    Json(request): Json<ContainerCreationRequest>,
) -> Result<Json<ContainerCreationResponse>> {
    let limits = ContainerLimits::parse(&request.mem, request.cpus)?;
    let filesystem = match request.filesystem_id {
        Some(id) => Some(state.scratch.mount_point(id).ok_or(WardenError::UnknownFilesystem(id))?),
        None => None,
    };
    let claim = state.registry.claim(request.port)?;

    // Detached so a client that hangs up mid-creation cannot strand the port.
    let runtime = Arc::clone(&state.runtime);
    tokio::spawn(async move {
        let port = claim.port();
        let container_id = runtime.create(port, limits, filesystem.as_deref()).await?;
        if let Err(e) = claim.bind(container_id.clone()) {
            log::warn!("port {} was released while container {} started, removing it", port, container_id);
            if let Err(remove_err) = runtime.remove(&container_id).await {
                log::error!("failed to remove container {}: {}", container_id, remove_err);
            }
            return Err(e);
        }
        Ok(Json(ContainerCreationResponse { container_id }))
    })
    .await
    .map_err(|e| WardenError::runtime(format!("container creation task failed: {}", e)))?
}

async fn delete_container(State(state): State<WardenState>, Path(port): Path<u16>) -> Result<StatusCode> {
    if let Some(container_id) = state.registry.release(port)? {
        state.runtime.remove(&container_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn prepare_filesystem(
    State(state): State<WardenState>,
    Query(query): Query<ExecutionFsQuery>,
) -> Result<StatusCode> {
    state.scratch.prepare(query.execution_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unmount_filesystem(
    State(state): State<WardenState>,
    Query(query): Query<ExecutionFsQuery>,
) -> Result<StatusCode> {
    state.scratch.unmount(query.execution_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<WardenState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "containers": state.registry.len(),
    }))
}

pub fn build_router(state: WardenState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/container", post(create_container))
        .route("/container/{port}", delete(delete_container))
        .route("/execution-fs", post(prepare_filesystem))
        .route("/umount", delete(unmount_filesystem))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
