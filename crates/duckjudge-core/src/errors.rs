//! Error types for the execution pipeline
//!
//! Failures fall into two families. Problems with the learner's code (syntax,
//! compilation, timeouts) and with capacity (a saturated fleet) are recovered
//! locally and turned into a structured `ExecutorErrorResponse`. Infrastructure
//! faults mean the sandbox itself is broken; they propagate to the caller and
//! the environment involved is evicted.

use duckjudge_types::{ExecuteResponse, ExecutorErrorResponse};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// The parser's only error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub expected: String,
    pub at_offset: usize,
}

impl SyntaxError {
    pub fn new(expected: impl Into<String>, at_offset: usize) -> Self {
        Self {
            expected: expected.into(),
            at_offset,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {} at offset {}", self.expected, self.at_offset)
    }
}

impl std::error::Error for SyntaxError {}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Syntax error: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Compilation failed: {0}")]
    Compilation(String),
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("Execution timed out")]
    TimedOut,
    #[error("Infrastructure fault: {0}")]
    InfrastructureFault(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Control output was mangled: {0}")]
    MangledOutput(String),
    #[error("Job cancelled")]
    Cancelled,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExecutorError {
    pub fn infrastructure(msg: impl Into<String>) -> Self {
        Self::InfrastructureFault(msg.into())
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True when the sandbox, not the learner's code, is at fault.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ExecutorError::InfrastructureFault(_)
                | ExecutorError::Config(_)
                | ExecutorError::Io(_)
                | ExecutorError::Json(_)
        )
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ExecutorError::InvalidRequest(_) => 400,
            ExecutorError::Syntax(_)
            | ExecutorError::Validation(_)
            | ExecutorError::Compilation(_)
            | ExecutorError::MangledOutput(_) => 422,
            ExecutorError::TimedOut => 408,
            ExecutorError::Cancelled => 499,
            ExecutorError::ResourceExhausted(_) => 503,
            ExecutorError::InfrastructureFault(_)
            | ExecutorError::Config(_)
            | ExecutorError::Io(_)
            | ExecutorError::Json(_) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ExecutorError::Syntax(_) => "syntax_error",
            ExecutorError::Validation(_) => "validation_error",
            ExecutorError::Compilation(_) => "compilation_error",
            ExecutorError::ResourceExhausted(_) => "resource_exhausted",
            ExecutorError::TimedOut => "timed_out",
            ExecutorError::InfrastructureFault(_) => "infrastructure_fault",
            ExecutorError::InvalidRequest(_) => "invalid_request",
            ExecutorError::MangledOutput(_) => "mangled_output",
            ExecutorError::Cancelled => "cancelled",
            ExecutorError::Config(_) => "config_error",
            ExecutorError::Io(_) => "io_error",
            ExecutorError::Json(_) => "json_error",
        }
    }

    /// Text that is safe to show the learner.
    pub fn user_message(&self) -> String {
        match self {
            ExecutorError::Syntax(e) => format!("Syntax error: {}", e),
            ExecutorError::Validation(msg) => scrub_internal_details(msg),
            ExecutorError::Compilation(msg) => scrub_internal_details(msg),
            ExecutorError::InvalidRequest(msg) => scrub_internal_details(msg),
            ExecutorError::TimedOut => {
                "Execution timed out. Your code may have an infinite loop.".to_string()
            }
            ExecutorError::ResourceExhausted(_) => {
                "Service is busy. Please try again in a moment.".to_string()
            }
            ExecutorError::MangledOutput(_) => {
                "Program output could not be graded.".to_string()
            }
            ExecutorError::Cancelled => "Execution was cancelled.".to_string(),
            _ => "An unexpected error occurred during execution.".to_string(),
        }
    }

    /// The learner-facing response for a recoverable failure.
    pub fn to_response(&self) -> ExecuteResponse {
        ExecuteResponse::Error(ExecutorErrorResponse {
            status_code: self.status_code(),
            message: self.user_message(),
        })
    }
}

static HOST_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[\s(\['"])(?:[A-Za-z]:)?(?:[/\\][\w.\-]+)+[/\\]"#)
        .expect("host path pattern is valid")
});

static UUID_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("uuid pattern is valid")
});

/// Strips directory prefixes and identifiers from diagnostics, leaving file names intact.
pub fn scrub_internal_details(text: &str) -> String {
    let without_paths = HOST_PATH.replace_all(text, "$1");
    UUID_TEXT.replace_all(&without_paths, "<id>").into_owned()
}
