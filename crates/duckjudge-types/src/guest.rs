//! Messages exchanged with the agent running inside an execution environment.
//!
//! Every message is a single JSON document terminated by an EOT byte (`0x04`).
//! Requests and replies carry a `$type` discriminator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Frame terminator on the guest channel.
pub const GUEST_EOT: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckRequest {
    pub files_to_check: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub job_id: Uuid,
    /// Source file stem to base64 contents.
    pub src_files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub job_id: Uuid,
    /// Fully qualified class whose `main` is launched.
    pub entrypoint: String,
    /// Class file name to base64 bytecode.
    pub class_files: BTreeMap<String, String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type", rename_all = "lowercase")]
pub enum GuestRequest {
    Health(HealthCheckRequest),
    Compile(CompileRequest),
    Execute(RunRequest),
}

impl GuestRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            GuestRequest::Health(_) => "health",
            GuestRequest::Compile(_) => "compile",
            GuestRequest::Execute(_) => "execute",
        }
    }
}

/// Output of a program run inside the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub out: String,
    pub err: String,
    pub exit_code: i32,
    pub start_ns: u64,
    pub end_ns: u64,
    #[serde(default)]
    pub timed_out: bool,
}

impl RunOutput {
    pub fn duration_ms(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns) / 1_000_000
    }
}

/// Envelope for every guest reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type", rename_all = "lowercase")]
pub enum GuestReply<T> {
    Ok { body: T },
    Err { body: String },
}

impl<T> GuestReply<T> {
    pub fn into_result(self) -> Result<T, String> {
        match self {
            GuestReply::Ok { body } => Ok(body),
            GuestReply::Err { body } => Err(body),
        }
    }
}

/// Path to sha256 hex digest.
pub type HealthReply = GuestReply<BTreeMap<String, String>>;
/// Class file name to base64 bytecode, or javac diagnostics.
pub type CompileReply = GuestReply<BTreeMap<String, String>>;
pub type RunReply = GuestReply<RunOutput>;
