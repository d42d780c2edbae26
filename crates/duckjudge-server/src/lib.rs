//! HTTP front door of the duckjudge executor.
//!
//! Exposes `POST /execute` and `GET /health` over an [`ExecutorService`].
//! Learner-facing failures are answered with `200` and an
//! `ExecutorErrorResponse` body; a broken sandbox answers `503`.

pub mod error;
pub mod pipeline;

pub use error::{Result, ServerError};
pub use pipeline::{start_pipeline, Pipeline};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{middleware, Router};
use duckjudge_core::ExecutorService;
use duckjudge_types::{ExecuteRequest, ExecuteResponse, ExecutorErrorResponse};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Largest accepted request body; base64 inflates sources by a third.
    pub max_body_size: usize,
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3050)),
            max_body_size: 256 * 1024,
            enable_logging: true,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address '{}': {}", addr, e)))?;
        Ok(self)
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub in_flight: usize,
    pub environments: usize,
    pub committed_vcpus: f64,
    pub committed_memory_mb: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub service: ExecutorService,
}

async fn execute_handler(State(state): State<AppState>, Json(request): Json<ExecuteRequest>) -> Response {
    match state.service.execute(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) if e.is_infrastructure() => {
            log::error!("Execution failed on infrastructure: {}", e);
            let body = ExecuteResponse::Error(ExecutorErrorResponse {
                status_code: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
                message: e.user_message(),
            });
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
        Err(e) => {
            log::info!("Execution rejected ({}): {}", e.error_type(), e);
            (StatusCode::OK, Json(e.to_response())).into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let fleet = state.service.fleet();
    let committed = fleet.committed();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        in_flight: state.service.in_flight(),
        environments: fleet.snapshot().len(),
        committed_vcpus: committed.vcpus,
        committed_memory_mb: committed.memory_mb,
    })
}

pub struct ExecutorServer {
    service: ExecutorService,
    config: ServerConfig,
}

impl ExecutorServer {
    pub fn new(service: ExecutorService) -> Self {
        Self::with_config(service, ServerConfig::default())
    }

    pub fn with_config(service: ExecutorService, config: ServerConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn build_router(&self) -> Router {
        let state = AppState {
            service: self.service.clone(),
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/execute", post(execute_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(state);

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(
                |request: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| async {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let method = request.method().clone();
                    let uri = request.uri().clone();

                    if uri.path() == "/health" {
                        log::debug!("Request {} {} {}", request_id, method, uri);
                    } else {
                        log::info!("Request {} {} {}", request_id, method, uri);
                    }

                    let start = std::time::Instant::now();
                    let response = next.run(request).await;
                    log::debug!(
                        "Response {} {} in {:?}",
                        request_id,
                        response.status(),
                        start.elapsed()
                    );
                    response
                },
            ));
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Serves until `shutdown_signal` resolves, then drains open requests.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| ServerError::config_error(format!("Failed to bind to {}: {}", self.config.bind_addr, e)))?;

        log::info!("duckjudge executor listening on {}", self.config.bind_addr);
        log::info!("Health check: http://{}/health", self.config.bind_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        log::info!("duckjudge executor shut down gracefully");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => log::info!("Received SIGTERM, shutting down..."),
    }
}
