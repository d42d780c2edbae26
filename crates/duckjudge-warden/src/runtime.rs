// src/runtime.rs
//! Container lifecycle behind the warden's `/container` endpoints.

use async_trait::async_trait;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
};
use bollard::Docker;
use std::collections::HashMap;
use std::path::Path;

use crate::config::RuntimeSettings;
use crate::error::{Result, WardenError};

/// Limits applied to one container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerLimits {
    pub memory_mb: u64,
    pub cpus: f64,
}

impl ContainerLimits {
    /// Parses a docker style memory limit (`"512m"`, `"2g"`, or plain megabytes).
    pub fn parse(mem: &str, cpus: f64) -> Result<Self> {
        let mem = mem.trim().to_ascii_lowercase();
        let (digits, scale) = match mem.chars().last() {
            Some('g') => (&mem[..mem.len() - 1], 1024),
            Some('m') => (&mem[..mem.len() - 1], 1),
            _ => (mem.as_str(), 1),
        };
        let amount: u64 = digits
            .parse()
            .map_err(|_| WardenError::invalid_request(format!("bad memory limit '{}'", mem)))?;
        if amount == 0 || !(cpus > 0.0) {
            return Err(WardenError::invalid_request("limits must be positive"));
        }
        Ok(Self {
            memory_mb: amount * scale,
            cpus,
        })
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Starts a container whose guest agent is published on host `port`,
    /// with `filesystem` bound into it when given.
    async fn create(&self, port: u16, limits: ContainerLimits, filesystem: Option<&Path>) -> Result<String>;

    async fn remove(&self, container_id: &str) -> Result<()>;
}

pub struct DockerRuntime {
    docker: Docker,
    settings: RuntimeSettings,
}

impl DockerRuntime {
    pub fn new(settings: RuntimeSettings) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, settings })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, port: u16, limits: ContainerLimits, filesystem: Option<&Path>) -> Result<String> {
        let guest_port = format!("{}/tcp", self.settings.guest_port);
        let port_bindings = HashMap::from([(
            guest_port,
            Some(vec![PortBinding {
                host_ip: Some(self.settings.bind_host.clone()),
                host_port: Some(port.to_string()),
            }]),
        )]);

        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(format!("duckjudge-sandbox-{}", port)),
            ..Default::default()
        });
        let config = ContainerCreateBody {
            image: Some(self.settings.image.clone()),
            host_config: Some(HostConfig {
                memory: Some((limits.memory_mb * 1024 * 1024) as i64),
                nano_cpus: Some((limits.cpus * 1e9) as i64),
                port_bindings: Some(port_bindings),
                network_mode: self.settings.network_mode.clone(),
                binds: filesystem.map(|path| vec![bind_spec(path, &self.settings.filesystem_target)]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = self.docker.create_container(options, config).await?;
        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<BollardStartContainerOptionsQuery>)
            .await
        {
            log::warn!("container {} failed to start, removing it", container.id);
            let _ = self.remove(&container.id).await;
            return Err(e.into());
        }
        log::info!(
            "started container {} on port {} ({} MB, {} cpus)",
            container.id,
            port,
            limits.memory_mb,
            limits.cpus
        );
        Ok(container.id)
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.docker
            .remove_container(
                container_id,
                Some(BollardRemoveContainerOptionsQuery {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        log::info!("removed container {}", container_id);
        Ok(())
    }
}

fn bind_spec(host: &Path, target: &str) -> String {
    format!("{}:{}:rw", host.display(), target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_limits() {
        assert_eq!(ContainerLimits::parse("2048m", 2.0).unwrap().memory_mb, 2048);
        assert_eq!(ContainerLimits::parse("2G", 1.0).unwrap().memory_mb, 2048);
        assert_eq!(ContainerLimits::parse("300", 0.5).unwrap().memory_mb, 300);
        assert!(ContainerLimits::parse("lots", 1.0).is_err());
        assert!(ContainerLimits::parse("0m", 1.0).is_err());
        assert!(ContainerLimits::parse("256m", 0.0).is_err());
    }

    #[test]
    fn test_bind_spec() {
        assert_eq!(
            bind_spec(Path::new("/var/lib/duckjudge/executions/abc"), "/sandbox"),
            "/var/lib/duckjudge/executions/abc:/sandbox:rw"
        );
    }
}
