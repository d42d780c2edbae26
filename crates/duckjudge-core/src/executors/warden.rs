// src/executors/warden.rs
//! Container-backed environments managed through the warden sidecar.

use async_trait::async_trait;
use duckjudge_types::{ContainerCreationRequest, ContainerCreationResponse, GuestRequest};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use super::guest::{GuestAddress, GuestChannel};
use super::{wait_for_guest, LaunchSpec, SandboxBackend, SandboxHandle};
use crate::config::{GuestTransport, WardenConfig};
use crate::errors::ExecutorError;
use crate::resources::Resources;

/// HTTP client for the warden's lifecycle endpoints.
#[derive(Debug, Clone)]
pub struct WardenClient {
    client: Client,
    base_url: String,
}

impl WardenClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Starts a container on `port`, with the prepared filesystem
    /// `filesystem_id` bound into it when given.
    pub async fn create_container(
        &self,
        port: u16,
        resources: Resources,
        filesystem_id: Option<Uuid>,
    ) -> Result<String, ExecutorError> {
        let url = format!("{}/container", self.base_url);
        let body = ContainerCreationRequest {
            port,
            mem: format!("{}m", resources.memory_mb),
            cpus: resources.vcpus,
            filesystem_id,
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| unreachable_warden(&url, e))?;
        let resp = check_status(resp, "create container").await?;
        let created: ContainerCreationResponse = resp
            .json()
            .await
            .map_err(|e| ExecutorError::infrastructure(format!("bad container response: {}", e)))?;
        debug!("warden created container {} on port {}", created.container_id, port);
        Ok(created.container_id)
    }

    /// Removing a container the warden does not know is not an error.
    pub async fn delete_container(&self, port: u16) -> Result<(), ExecutorError> {
        let url = format!("{}/container/{}", self.base_url, port);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| unreachable_warden(&url, e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(resp, "delete container").await.map(|_| ())
    }

    pub async fn prepare_filesystem(&self, execution_id: Uuid) -> Result<(), ExecutorError> {
        let url = format!("{}/execution-fs", self.base_url);
        let resp = self
            .client
            .post(&url)
            .query(&[("executionId", execution_id.to_string())])
            .send()
            .await
            .map_err(|e| unreachable_warden(&url, e))?;
        check_status(resp, "prepare filesystem").await.map(|_| ())
    }

    pub async fn unmount(&self, execution_id: Uuid) -> Result<(), ExecutorError> {
        let url = format!("{}/umount", self.base_url);
        let resp = self
            .client
            .delete(&url)
            .query(&[("executionId", execution_id.to_string())])
            .send()
            .await
            .map_err(|e| unreachable_warden(&url, e))?;
        check_status(resp, "unmount filesystem").await.map(|_| ())
    }
}

fn unreachable_warden(url: &str, e: reqwest::Error) -> ExecutorError {
    ExecutorError::infrastructure(format!("warden request to {} failed: {}", url, e))
}

async fn check_status(resp: reqwest::Response, action: &str) -> Result<reqwest::Response, ExecutorError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    Err(ExecutorError::infrastructure(format!(
        "warden could not {}: {} {}",
        action, status, text
    )))
}

/// Hands out host ports from a fixed range.
#[derive(Debug)]
pub struct PortAllocator {
    first: u16,
    count: u16,
    state: Mutex<PortState>,
}

#[derive(Debug, Default)]
struct PortState {
    cursor: u16,
    in_use: HashSet<u16>,
}

impl PortAllocator {
    pub fn new(first: u16, count: u16) -> Self {
        Self {
            first,
            count,
            state: Mutex::new(PortState::default()),
        }
    }

    pub fn allocate(&self) -> Result<u16, ExecutorError> {
        let mut state = self.state.lock().map_err(|_| ExecutorError::infrastructure("port table poisoned"))?;
        for _ in 0..self.count {
            let port = self.first.saturating_add(state.cursor);
            state.cursor = (state.cursor + 1) % self.count;
            if state.in_use.insert(port) {
                return Ok(port);
            }
        }
        Err(ExecutorError::exhausted("no free environment ports"))
    }

    pub fn release(&self, port: u16) {
        if let Ok(mut state) = self.state.lock() {
            state.in_use.remove(&port);
        }
    }

    pub fn in_use(&self) -> usize {
        self.state.lock().map(|s| s.in_use.len()).unwrap_or(0)
    }
}

/// Boots one compiler/executor container per environment, with the leased
/// filesystem bound into it, and reaches the guest on its published port.
pub struct WardenBackend {
    client: WardenClient,
    channel: GuestChannel,
    ports: PortAllocator,
    guest_host: String,
    transport: GuestTransport,
    launch_timeout: Duration,
}

impl WardenBackend {
    pub fn new(
        warden: &WardenConfig,
        transport: GuestTransport,
        channel: GuestChannel,
        launch_timeout: Duration,
    ) -> Self {
        Self {
            client: WardenClient::new(warden.base_url.clone()),
            channel,
            ports: PortAllocator::new(warden.first_port, warden.port_count),
            guest_host: warden.guest_host.clone(),
            transport,
            launch_timeout,
        }
    }

    pub fn client(&self) -> &WardenClient {
        &self.client
    }

    fn guest_address(&self, port: u16) -> GuestAddress {
        match &self.transport {
            GuestTransport::Tcp => GuestAddress::Tcp(format!("{}:{}", self.guest_host, port)),
            GuestTransport::Vsock { uds_dir, guest_port } => GuestAddress::Vsock {
                uds_path: uds_dir.join(format!("{}.sock", port)),
                port: *guest_port,
            },
        }
    }
}

#[async_trait]
impl SandboxBackend for WardenBackend {
    async fn launch(&self, spec: &LaunchSpec) -> Result<SandboxHandle, ExecutorError> {
        let port = self.ports.allocate()?;
        let container_id = match self
            .client
            .create_container(port, spec.resources, Some(spec.image.id))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.ports.release(port);
                return Err(e);
            }
        };

        let handle = SandboxHandle {
            vm_id: spec.vm_id,
            family: spec.family,
            guest: self.guest_address(port),
            port: Some(port),
            container_id: Some(container_id),
            pid: None,
        };

        if let Err(e) = wait_for_guest(self, &handle, self.launch_timeout).await {
            warn!("launch of {} failed, removing its container: {}", spec.vm_id, e);
            let _ = self.terminate(&handle).await;
            return Err(e);
        }

        info!(
            "launched {} environment {} on port {} from image {}",
            spec.family, spec.vm_id, port, spec.image.id
        );
        Ok(handle)
    }

    async fn query(
        &self,
        handle: &SandboxHandle,
        request: &GuestRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value, ExecutorError> {
        self.channel.query(&handle.guest, request, timeout).await
    }

    async fn terminate(&self, handle: &SandboxHandle) -> Result<(), ExecutorError> {
        let Some(port) = handle.port else {
            return Ok(());
        };
        let result = self.client.delete_container(port).await;
        self.ports.release(port);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{delete, post};
    use axum::{Json, Router};
    use crate::executors::guest::{read_frame, write_frame};
    use crate::resources::ImageFamily;
    use crate::test_utils::ScriptedBackend;
    use duckjudge_types::{ExecutionFsQuery, GuestReply, HealthReply};
    use std::sync::Arc;
    use tokio::io::BufReader;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct WardenLog {
        calls: Mutex<Vec<String>>,
    }

    async fn mock_warden() -> (String, Arc<WardenLog>) {
        let log = Arc::new(WardenLog::default());
        let app = Router::new()
            .route(
                "/container",
                post(|State(log): State<Arc<WardenLog>>, Json(body): Json<ContainerCreationRequest>| async move {
                    let filesystem = body.filesystem_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
                    log.calls
                        .lock()
                        .unwrap()
                        .push(format!("create {} {} {} {}", body.port, body.mem, body.cpus, filesystem));
                    Json(ContainerCreationResponse {
                        container_id: format!("c{}", body.port),
                    })
                }),
            )
            .route(
                "/container/{port}",
                delete(|State(log): State<Arc<WardenLog>>, Path(port): Path<u16>| async move {
                    log.calls.lock().unwrap().push(format!("delete {}", port));
                    if port == 1 {
                        AxumStatus::NOT_FOUND
                    } else {
                        AxumStatus::NO_CONTENT
                    }
                }),
            )
            .route(
                "/execution-fs",
                post(|State(log): State<Arc<WardenLog>>, Query(q): Query<ExecutionFsQuery>| async move {
                    log.calls.lock().unwrap().push(format!("fs {}", q.execution_id));
                    AxumStatus::INTERNAL_SERVER_ERROR
                }),
            )
            .with_state(log.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), log)
    }

    #[tokio::test]
    async fn test_client_speaks_warden_routes() {
        let (url, log) = mock_warden().await;
        let client = WardenClient::new(url);

        let id = client
            .create_container(15050, Resources::new(2.0, 2048), None)
            .await
            .unwrap();
        assert_eq!(id, "c15050");
        client.delete_container(15050).await.unwrap();
        client.delete_container(1).await.unwrap();

        let execution_id = Uuid::new_v4();
        let err = client.prepare_filesystem(execution_id).await.unwrap_err();
        assert!(err.is_infrastructure());

        let calls = log.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "create 15050 2048m 2 -".to_string(),
                "delete 15050".to_string(),
                "delete 1".to_string(),
                format!("fs {}", execution_id),
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_warden_is_infrastructure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = WardenClient::new(format!("http://{}", addr));
        let err = client.unmount(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[test]
    fn test_port_allocator_reuses_released_ports() {
        let ports = PortAllocator::new(20000, 2);
        let a = ports.allocate().unwrap();
        let b = ports.allocate().unwrap();
        assert_ne!(a, b);
        assert!(matches!(ports.allocate(), Err(ExecutorError::ResourceExhausted(_))));

        ports.release(a);
        assert_eq!(ports.allocate().unwrap(), a);
        assert_eq!(ports.in_use(), 2);
    }

    #[test]
    fn test_vsock_guest_address() {
        let backend = WardenBackend::new(
            &WardenConfig::default(),
            GuestTransport::Vsock {
                uds_dir: "/run/duckjudge".into(),
                guest_port: 5050,
            },
            GuestChannel::new(0, Duration::from_millis(1)),
            Duration::from_secs(1),
        );
        assert_eq!(
            backend.guest_address(15051),
            GuestAddress::Vsock {
                uds_path: "/run/duckjudge/15051.sock".into(),
                port: 5050
            }
        );
    }

    /// A guest that answers every health check, on a fixed local port.
    async fn healthy_guest() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut stream = BufReader::new(stream);
                    if read_frame(&mut stream, 1024 * 1024).await.is_ok() {
                        let reply: HealthReply = GuestReply::Ok { body: Default::default() };
                        let _ = write_frame(stream.get_mut(), &reply).await;
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_launched_container_receives_the_leased_filesystem() {
        let (url, log) = mock_warden().await;
        let guest_port = healthy_guest().await;
        let backend = WardenBackend::new(
            &WardenConfig {
                base_url: url,
                guest_host: "127.0.0.1".to_string(),
                first_port: guest_port,
                port_count: 1,
            },
            GuestTransport::Tcp,
            GuestChannel::new(0, Duration::from_millis(1)),
            Duration::from_secs(5),
        );
        let spec = ScriptedBackend::launch_spec(ImageFamily::Executor);

        let handle = backend.launch(&spec).await.unwrap();
        assert_eq!(handle.port, Some(guest_port));
        assert_eq!(handle.container_id, Some(format!("c{}", guest_port)));

        let calls = log.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![format!("create {} 256m 1 {}", guest_port, spec.image.id)]);

        backend.terminate(&handle).await.unwrap();
        assert_eq!(backend.ports.in_use(), 0);
    }
}
