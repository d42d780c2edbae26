//! Sandbox backends that host execution environments.
//!
//! A backend boots an environment from a pooled filesystem image, relays
//! guest-protocol queries to the agent inside it and tears it down again.
//! The fleet manager is the only caller; it owns accounting, the backend only
//! owns the physical lifecycle.

use async_trait::async_trait;
use duckjudge_types::{
    CompileRequest, CompileReply, GuestRequest, HealthCheckRequest, HealthReply, RunReply, RunRequest,
};
use log::debug;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::errors::ExecutorError;
use crate::pooler::FilesystemImage;
use crate::resources::{ImageFamily, Resources};

pub mod guest;
pub mod vm;
pub mod warden;

pub use guest::{GuestAddress, GuestChannel};
pub use vm::ScriptLaunchBackend;
pub use warden::{WardenBackend, WardenClient};

/// Everything a backend needs to boot one environment.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub vm_id: Uuid,
    pub family: ImageFamily,
    pub image: FilesystemImage,
    pub resources: Resources,
}

/// A running environment as seen by its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub vm_id: Uuid,
    pub family: ImageFamily,
    pub guest: GuestAddress,
    /// Host port published for the guest, when the backend uses one.
    pub port: Option<u16>,
    pub container_id: Option<String>,
    pub pid: Option<u32>,
}

#[async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<SandboxHandle, ExecutorError>;

    /// Sends one request to the environment's guest agent and returns the raw reply.
    async fn query(
        &self,
        handle: &SandboxHandle,
        request: &GuestRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value, ExecutorError>;

    async fn terminate(&self, handle: &SandboxHandle) -> Result<(), ExecutorError>;

    async fn health(
        &self,
        handle: &SandboxHandle,
        files_to_check: Vec<String>,
        timeout: Duration,
    ) -> Result<HealthReply, ExecutorError> {
        let request = GuestRequest::Health(HealthCheckRequest { files_to_check });
        decode(self.query(handle, &request, timeout).await?, &request)
    }

    async fn compile(
        &self,
        handle: &SandboxHandle,
        request: CompileRequest,
        timeout: Duration,
    ) -> Result<CompileReply, ExecutorError> {
        let request = GuestRequest::Compile(request);
        decode(self.query(handle, &request, timeout).await?, &request)
    }

    async fn run(
        &self,
        handle: &SandboxHandle,
        request: RunRequest,
        timeout: Duration,
    ) -> Result<RunReply, ExecutorError> {
        let request = GuestRequest::Execute(request);
        decode(self.query(handle, &request, timeout).await?, &request)
    }
}

fn decode<T: DeserializeOwned>(raw: serde_json::Value, request: &GuestRequest) -> Result<T, ExecutorError> {
    serde_json::from_value(raw).map_err(|e| {
        ExecutorError::infrastructure(format!("malformed {} reply from guest: {}", request.kind(), e))
    })
}

/// Polls the guest of a freshly launched environment until it answers or
/// `launch_timeout` runs out.
pub(crate) async fn wait_for_guest<B>(
    backend: &B,
    handle: &SandboxHandle,
    launch_timeout: Duration,
) -> Result<(), ExecutorError>
where
    B: SandboxBackend + ?Sized,
{
    let deadline = Instant::now() + launch_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ExecutorError::infrastructure(format!(
                "environment {} did not come up within {:?}",
                handle.vm_id, launch_timeout
            )));
        }
        match backend.health(handle, Vec::new(), remaining).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                debug!("guest of {} not ready yet: {}", handle.vm_id, e);
                tokio::time::sleep(Duration::from_millis(250).min(remaining)).await;
            }
        }
    }
}
