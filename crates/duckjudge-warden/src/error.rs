//! Error types for the warden.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WardenError>;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Port {0} is already mapped to a container")]
    DuplicatePort(u16),

    #[error("No container is mapped to port {0}")]
    UnknownPort(u16),

    #[error("Execution filesystem {0} is not mounted")]
    UnknownFilesystem(uuid::Uuid),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Scratch filesystem error: {0}")]
    Scratch(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WardenError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    pub fn scratch(msg: impl Into<String>) -> Self {
        Self::Scratch(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            WardenError::DuplicatePort(_) | WardenError::InvalidRequest(_) => 400,
            WardenError::UnknownPort(_) | WardenError::UnknownFilesystem(_) => 404,
            WardenError::Runtime(_)
            | WardenError::Scratch(_)
            | WardenError::Docker(_)
            | WardenError::Io(_)
            | WardenError::Config(_) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            WardenError::DuplicatePort(_) => "duplicate_port",
            WardenError::UnknownPort(_) => "unknown_port",
            WardenError::UnknownFilesystem(_) => "unknown_filesystem",
            WardenError::InvalidRequest(_) => "invalid_request",
            WardenError::Runtime(_) => "runtime_error",
            WardenError::Scratch(_) => "scratch_error",
            WardenError::Docker(_) => "docker_error",
            WardenError::Io(_) => "io_error",
            WardenError::Config(_) => "config_error",
        }
    }
}

impl IntoResponse for WardenError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("{}", self);
        }
        (
            status,
            Json(json!({
                "error": self.error_type(),
                "details": self.to_string(),
            })),
        )
            .into_response()
    }
}
