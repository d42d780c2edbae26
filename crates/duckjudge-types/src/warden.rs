//! Warden sidecar DTOs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerCreationRequest {
    /// Host port the container's guest agent is published on.
    pub port: u16,
    /// Docker style memory limit, e.g. `"2048m"`.
    pub mem: String,
    pub cpus: f64,
    /// Prepared filesystem to bind into the container, see `/execution-fs`.
    #[serde(rename = "filesystemId", default, skip_serializing_if = "Option::is_none")]
    pub filesystem_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerCreationResponse {
    pub container_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFsQuery {
    pub execution_id: Uuid,
}
