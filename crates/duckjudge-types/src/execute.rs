//! Submission and result contract between the product layer and the executor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A graded submission against an exercise's test case set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitExecuteRequest {
    /// Base64 encoded source file.
    pub code_b64: String,
    /// Exercise whose test cases grade the submission.
    pub exercise_id: Uuid,
}

/// An ungraded "try it" run that only captures output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryExecuteRequest {
    /// Base64 encoded source file.
    pub code_b64: String,
}

/// Requests accepted by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecuteRequest {
    Submit(SubmitExecuteRequest),
    Dry(DryExecuteRequest),
}

impl ExecuteRequest {
    pub fn code_b64(&self) -> &str {
        match self {
            ExecuteRequest::Submit(r) => &r.code_b64,
            ExecuteRequest::Dry(r) => &r.code_b64,
        }
    }

    pub fn style(&self) -> ExecutionStyle {
        match self {
            ExecuteRequest::Submit(_) => ExecutionStyle::Submit,
            ExecuteRequest::Dry(_) => ExecutionStyle::Dry,
        }
    }

    pub fn exercise_id(&self) -> Option<Uuid> {
        match self {
            ExecuteRequest::Submit(r) => Some(r.exercise_id),
            ExecuteRequest::Dry(_) => None,
        }
    }
}

/// Whether a job is graded or only run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStyle {
    Submit,
    Dry,
}

/// Outcome of a single injected test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_id: Uuid,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitExecuteResponse {
    pub std_output: String,
    pub std_error: String,
    pub test_results: Vec<TestResult>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryExecuteResponse {
    pub std_output: String,
    pub std_error: String,
    pub execution_time_ms: u64,
}

/// A structured failure the learner can act on (compile diagnostics, timeouts, busy cluster).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorErrorResponse {
    pub status_code: u16,
    pub message: String,
}

/// Results produced by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecuteResponse {
    Submit(SubmitExecuteResponse),
    Dry(DryExecuteResponse),
    Error(ExecutorErrorResponse),
}

impl ExecuteResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, ExecuteResponse::Error(_))
    }

    pub fn std_output(&self) -> Option<&str> {
        match self {
            ExecuteResponse::Submit(r) => Some(&r.std_output),
            ExecuteResponse::Dry(r) => Some(&r.std_output),
            ExecuteResponse::Error(_) => None,
        }
    }
}

/// Lifecycle of an execution job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Queued,
    Validating,
    Assigned,
    Compiling,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }
}
