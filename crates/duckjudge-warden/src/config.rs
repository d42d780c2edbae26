//! Warden settings, loaded from YAML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, WardenError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WardenSettings {
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub scratch: ScratchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSettings {
    /// Image of the sandbox containers, with the guest agent as entrypoint.
    #[serde(default = "default_image")]
    pub image: String,
    /// Port the guest agent listens on inside the container.
    #[serde(default = "default_guest_port")]
    pub guest_port: u16,
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default)]
    pub network_mode: Option<String>,
    /// Where a prepared execution filesystem is bound inside the container.
    #[serde(default = "default_filesystem_target")]
    pub filesystem_target: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            image: default_image(),
            guest_port: default_guest_port(),
            bind_host: default_bind_host(),
            network_mode: None,
            filesystem_target: default_filesystem_target(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScratchSettings {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_create_script")]
    pub create_script: PathBuf,
    #[serde(default = "default_mount_script")]
    pub mount_script: PathBuf,
    #[serde(default = "default_umount_script")]
    pub umount_script: PathBuf,
    /// Execution filesystems are mounted at `<mount_root>/<id>`.
    #[serde(default = "default_mount_root")]
    pub mount_root: PathBuf,
}

impl Default for ScratchSettings {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            create_script: default_create_script(),
            mount_script: default_mount_script(),
            umount_script: default_umount_script(),
            mount_root: default_mount_root(),
        }
    }
}

impl WardenSettings {
    pub fn from_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| WardenError::config_error(format!("invalid YAML: {}", e)))
    }

    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            WardenError::config_error(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_str(&content)
    }
}

fn default_image() -> String {
    "duckjudge/sandbox:latest".to_string()
}

fn default_guest_port() -> u16 {
    5000
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_filesystem_target() -> String {
    "/sandbox".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_create_script() -> PathBuf {
    PathBuf::from("/opt/duckjudge/scripts/create-fs.sh")
}

fn default_mount_script() -> PathBuf {
    PathBuf::from("/opt/duckjudge/scripts/mount-fs.sh")
}

fn default_umount_script() -> PathBuf {
    PathBuf::from("/opt/duckjudge/scripts/umount-fs.sh")
}

fn default_mount_root() -> PathBuf {
    PathBuf::from("/var/lib/duckjudge/executions")
}
