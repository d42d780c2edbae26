// src/executors/vm.rs
//! Environments booted straight from pooled images by a host launch script.

use async_trait::async_trait;
use duckjudge_types::GuestRequest;
use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::{Child, Command};
use uuid::Uuid;

use super::guest::{GuestAddress, GuestChannel};
use super::{wait_for_guest, LaunchSpec, SandboxBackend, SandboxHandle};
use crate::config::VmConfig;
use crate::errors::ExecutorError;

/// Runs one launcher process per environment. The launcher boots a VM from
/// the leased image and exposes its vsock proxy at `<socket_dir>/<vm id>.sock`;
/// killing the launcher ends the environment.
pub struct ScriptLaunchBackend {
    shell: String,
    script: PathBuf,
    socket_dir: PathBuf,
    guest_port: u32,
    channel: GuestChannel,
    launch_timeout: Duration,
    launchers: Mutex<HashMap<Uuid, Child>>,
}

impl ScriptLaunchBackend {
    pub fn new(
        vm: &VmConfig,
        script: impl Into<PathBuf>,
        channel: GuestChannel,
        launch_timeout: Duration,
    ) -> Self {
        Self {
            shell: vm.shell.clone(),
            script: script.into(),
            socket_dir: vm.socket_dir.clone(),
            guest_port: vm.guest_port,
            channel,
            launch_timeout,
            launchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn running(&self) -> usize {
        self.launchers().len()
    }

    fn socket_path(&self, vm_id: Uuid) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", vm_id))
    }

    fn launchers(&self) -> MutexGuard<'_, HashMap<Uuid, Child>> {
        self.launchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SandboxBackend for ScriptLaunchBackend {
    async fn launch(&self, spec: &LaunchSpec) -> Result<SandboxHandle, ExecutorError> {
        let uds_path = self.socket_path(spec.vm_id);
        let child = Command::new(&self.shell)
            .arg(&self.script)
            .arg(spec.family.as_str())
            .arg(&spec.image.path)
            .arg(spec.vm_id.to_string())
            .arg(&uds_path)
            .arg(spec.resources.vcpus.to_string())
            .arg(spec.resources.memory_mb.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::infrastructure(format!("could not run launch script: {}", e)))?;

        let handle = SandboxHandle {
            vm_id: spec.vm_id,
            family: spec.family,
            guest: GuestAddress::Vsock {
                uds_path,
                port: self.guest_port,
            },
            port: None,
            container_id: None,
            pid: child.id(),
        };
        self.launchers().insert(spec.vm_id, child);

        if let Err(e) = wait_for_guest(self, &handle, self.launch_timeout).await {
            warn!("launch of {} failed, stopping its launcher: {}", spec.vm_id, e);
            let _ = self.terminate(&handle).await;
            return Err(e);
        }

        info!(
            "launched {} environment {} (pid {:?}) from image {}",
            spec.family,
            spec.vm_id,
            handle.pid,
            spec.image.path.display()
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
        let launcher = self.launchers().remove(&handle.vm_id);
        if let Some(mut launcher) = launcher {
            if let Err(e) = launcher.kill().await {
                warn!("could not stop launcher of {}: {}", handle.vm_id, e);
            }
        }
        if let GuestAddress::Vsock { uds_path, .. } = &handle.guest {
            match tokio::fs::remove_file(uds_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::guest::{read_frame, write_frame, DEFAULT_MAX_REPLY_BYTES};
    use crate::resources::ImageFamily;
    use crate::test_utils::ScriptedBackend;
    use duckjudge_types::{GuestReply, HealthReply};
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    fn backend(dir: &TempDir, script_body: &str, launch_timeout: Duration) -> ScriptLaunchBackend {
        let script = dir.path().join("launch.sh");
        std::fs::write(&script, script_body).unwrap();
        let vm = VmConfig {
            launch_script: Some(script.clone()),
            shell: "sh".to_string(),
            socket_dir: dir.path().to_path_buf(),
            guest_port: 5050,
        };
        ScriptLaunchBackend::new(&vm, script, GuestChannel::new(0, Duration::from_millis(1)), launch_timeout)
    }

    /// Stands in for the vsock proxy the launcher would expose.
    fn serve_proxy(path: &Path) {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut stream = BufReader::new(stream);
                let mut line = String::new();
                if stream.read_line(&mut line).await.is_err() {
                    continue;
                }
                let _ = stream.get_mut().write_all(b"OK 1\n").await;
                if read_frame(&mut stream, DEFAULT_MAX_REPLY_BYTES).await.is_ok() {
                    let reply: HealthReply = GuestReply::Ok { body: Default::default() };
                    let _ = write_frame(stream.get_mut(), &reply).await;
                }
            }
        });
    }

    async fn read_when_written(path: &Path) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(content) = tokio::fs::read_to_string(path).await {
                    if content.ends_with('\n') {
                        return content;
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_launcher_boots_the_leased_image() {
        let dir = TempDir::new().unwrap();
        let args = dir.path().join("args.log");
        let backend = backend(
            &dir,
            &format!("echo \"$$ $*\" > {}\nexec sleep 30\n", args.display()),
            Duration::from_secs(5),
        );
        let spec = ScriptedBackend::launch_spec(ImageFamily::Executor);
        let socket = dir.path().join(format!("{}.sock", spec.vm_id));
        serve_proxy(&socket);

        let handle = backend.launch(&spec).await.unwrap();
        let pid = handle.pid.expect("launcher pid");
        assert_eq!(
            handle.guest,
            GuestAddress::Vsock {
                uds_path: socket.clone(),
                port: 5050
            }
        );

        let recorded = read_when_written(&args).await;
        assert_eq!(
            recorded.trim_end(),
            format!(
                "{} executor {} {} {} 1 256",
                pid,
                spec.image.path.display(),
                spec.vm_id,
                socket.display()
            )
        );

        backend.terminate(&handle).await.unwrap();
        assert_eq!(backend.running(), 0);
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_silent_launcher_is_stopped() {
        let dir = TempDir::new().unwrap();
        let backend = backend(&dir, "exec sleep 30\n", Duration::from_millis(300));
        let spec = ScriptedBackend::launch_spec(ImageFamily::Compiler);

        let err = backend.launch(&spec).await.unwrap_err();
        assert!(err.is_infrastructure());
        assert_eq!(backend.running(), 0);
    }
}
