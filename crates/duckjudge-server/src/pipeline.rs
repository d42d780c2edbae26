//! Wiring of the pooler, fleet and service behind the HTTP surface.

use duckjudge_core::config::ExecutorConfig;
use duckjudge_core::executors::{GuestChannel, ScriptLaunchBackend, WardenBackend, WardenClient};
use duckjudge_core::pooler::{ScriptImageBuilder, WardenImageBuilder};
use duckjudge_core::{
    ExecutorService, ExerciseStore, FilesystemPooler, FleetManager, ImageBuilder, InMemoryExerciseStore,
    SandboxBackend,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A running executor pipeline and the tasks that keep it alive.
pub struct Pipeline {
    pub service: ExecutorService,
    tasks: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Cancels every job, tears the fleet down and waits for the background tasks.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                log::warn!("Pipeline task ended abnormally: {}", e);
            }
        }
    }
}

/// Starts the pooler, the fleet and both handler pools.
pub async fn start_pipeline(
    config: &ExecutorConfig,
    backend: Arc<dyn SandboxBackend>,
    builder: Arc<dyn ImageBuilder>,
    exercises: Arc<dyn ExerciseStore>,
) -> Result<Pipeline> {
    let shutdown = CancellationToken::new();
    let (pooler, pooler_task) = FilesystemPooler::spawn(&config.pool, builder, shutdown.clone());
    let (fleet, reaper_task) = FleetManager::spawn(config, backend, pooler, shutdown.clone());
    let (service, mut tasks) = ExecutorService::start(config, fleet, exercises, shutdown.clone()).await?;
    tasks.push(pooler_task);
    tasks.push(reaper_task);
    Ok(Pipeline {
        service,
        tasks,
        shutdown,
    })
}

/// Backend and image builder for this host. With `vm.launch_script` and
/// `pool.build_script` set, environments boot from script-built images;
/// otherwise containers are started through the warden sidecar on
/// filesystems it prepared.
pub fn sandbox_stack(config: &ExecutorConfig) -> (Arc<dyn SandboxBackend>, Arc<dyn ImageBuilder>) {
    let channel = GuestChannel::from_config(&config.guest);
    if let (Some(launch), Some(build)) = (&config.vm.launch_script, &config.pool.build_script) {
        let backend = ScriptLaunchBackend::new(&config.vm, launch.clone(), channel, config.timeouts.launch());
        let builder = ScriptImageBuilder::new(build.clone(), config.pool.image_dir.clone());
        return (Arc::new(backend), Arc::new(builder));
    }

    let backend = WardenBackend::new(
        &config.warden,
        config.guest.transport.clone(),
        channel,
        config.timeouts.launch(),
    );
    let builder = WardenImageBuilder::new(
        WardenClient::new(config.warden.base_url.clone()),
        config.pool.image_dir.clone(),
    );
    (Arc::new(backend), Arc::new(builder))
}

/// The exercise store, filled from `exercises.dir` when one is configured.
pub async fn load_exercises(config: &ExecutorConfig) -> Result<Arc<InMemoryExerciseStore>> {
    let store = InMemoryExerciseStore::new();
    match &config.exercises.dir {
        Some(dir) => {
            let count = store.load_dir(dir).await?;
            log::info!("Loaded {} exercises from {}", count, dir.display());
        }
        None => log::warn!("No exercise directory configured; submissions will be rejected"),
    }
    Ok(Arc::new(store))
}
