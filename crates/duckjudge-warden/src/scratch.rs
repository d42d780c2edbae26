// src/scratch.rs
//! Per-execution scratch filesystems, managed by host shell scripts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::ScratchSettings;
use crate::error::{Result, WardenError};

/// Runs the create, mount and umount scripts. The scripts receive the
/// execution id and the mount point `<mount_root>/<id>`.
#[derive(Debug)]
pub struct ScratchFilesystem {
    shell: String,
    create: PathBuf,
    mount: PathBuf,
    umount: PathBuf,
    mount_root: PathBuf,
    mounted: Mutex<HashSet<Uuid>>,
}

impl ScratchFilesystem {
    pub fn new(settings: &ScratchSettings) -> Self {
        Self {
            shell: settings.shell.clone(),
            create: settings.create_script.clone(),
            mount: settings.mount_script.clone(),
            umount: settings.umount_script.clone(),
            mount_root: settings.mount_root.clone(),
            mounted: Mutex::new(HashSet::new()),
        }
    }

    /// Creates and mounts the scratch filesystem of `execution_id`.
    pub async fn prepare(&self, execution_id: Uuid) -> Result<()> {
        self.run(&self.create, execution_id).await?;
        self.run(&self.mount, execution_id).await?;
        self.lock().insert(execution_id);
        Ok(())
    }

    pub async fn unmount(&self, execution_id: Uuid) -> Result<()> {
        self.run(&self.umount, execution_id).await?;
        self.lock().remove(&execution_id);
        Ok(())
    }

    /// Host path of a prepared filesystem, `None` until `prepare` succeeded.
    pub fn mount_point(&self, execution_id: Uuid) -> Option<PathBuf> {
        if self.lock().contains(&execution_id) {
            Some(self.path_of(execution_id))
        } else {
            None
        }
    }

    fn path_of(&self, execution_id: Uuid) -> PathBuf {
        self.mount_root.join(execution_id.to_string())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
        self.mounted.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(&self, script: &Path, execution_id: Uuid) -> Result<()> {
        let output = Command::new(&self.shell)
            .arg(script)
            .arg(execution_id.to_string())
            .arg(self.path_of(execution_id))
            .output()
            .await?;
        if !output.status.success() {
            return Err(WardenError::scratch(format!(
                "{} exited with {}: {}",
                script.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        log::debug!("{} {} done", script.display(), execution_id);
        Ok(())
    }
}
