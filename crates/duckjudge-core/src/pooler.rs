// src/pooler.rs
//! Warm cache of filesystem images, one population per image family.
//!
//! The pooler is a single task that owns every piece of cache state. Callers
//! talk to it over a bounded channel; builds run on spawned tasks gated by a
//! semaphore and report back over a second channel. A periodic tick retunes
//! each family's target from recent request history, tops the warm queue up
//! and evicts the surplus.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{CacheTargetData, PoolConfig};
use crate::errors::ExecutorError;
use crate::executors::WardenClient;
use crate::resources::ImageFamily;

/// A root filesystem ready to back one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemImage {
    pub id: Uuid,
    pub family: ImageFamily,
    pub path: PathBuf,
    /// sha256 of the image file, when it was produced locally.
    pub content_hash: Option<String>,
    pub built_at: SystemTime,
}

/// One served request, kept for retuning.
#[derive(Debug, Clone, Copy)]
pub struct FilesystemRequestData {
    pub requested_at: Instant,
    pub was_cache_hit: bool,
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, family: ImageFamily, id: Uuid) -> Result<FilesystemImage, ExecutorError>;

    async fn discard(&self, image: &FilesystemImage) -> Result<(), ExecutorError>;
}

/// Builds images by running `<script> <family> <output path>`.
pub struct ScriptImageBuilder {
    script: PathBuf,
    image_dir: PathBuf,
}

impl ScriptImageBuilder {
    pub fn new(script: impl Into<PathBuf>, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            image_dir: image_dir.into(),
        }
    }
}

#[async_trait]
impl ImageBuilder for ScriptImageBuilder {
    async fn build(&self, family: ImageFamily, id: Uuid) -> Result<FilesystemImage, ExecutorError> {
        let path = self.image_dir.join(format!("{}-{}.ext4", family, id));
        let output = Command::new(&self.script)
            .arg(family.as_str())
            .arg(&path)
            .output()
            .await
            .map_err(|e| ExecutorError::infrastructure(format!("could not run image build script: {}", e)))?;

        if !output.status.success() {
            return Err(ExecutorError::infrastructure(format!(
                "image build for {} exited with {}: {}",
                family,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let content_hash = sha256_file(&path).await?;
        debug!("built {} image {} ({})", family, id, content_hash);
        Ok(FilesystemImage {
            id,
            family,
            path,
            content_hash: Some(content_hash),
            built_at: SystemTime::now(),
        })
    }

    async fn discard(&self, image: &FilesystemImage) -> Result<(), ExecutorError> {
        match tokio::fs::remove_file(&image.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn sha256_file(path: &std::path::Path) -> Result<String, ExecutorError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Has the warden create and mount a scratch filesystem per image.
pub struct WardenImageBuilder {
    client: WardenClient,
    image_dir: PathBuf,
}

impl WardenImageBuilder {
    pub fn new(client: WardenClient, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            image_dir: image_dir.into(),
        }
    }
}

#[async_trait]
impl ImageBuilder for WardenImageBuilder {
    async fn build(&self, family: ImageFamily, id: Uuid) -> Result<FilesystemImage, ExecutorError> {
        self.client.prepare_filesystem(id).await?;
        Ok(FilesystemImage {
            id,
            family,
            path: self.image_dir.join(id.to_string()),
            content_hash: None,
            built_at: SystemTime::now(),
        })
    }

    async fn discard(&self, image: &FilesystemImage) -> Result<(), ExecutorError> {
        self.client.unmount(image.id).await
    }
}

/// Drops history older than `period`.
pub fn prune_history(history: &mut VecDeque<FilesystemRequestData>, now: Instant, period: Duration) -> usize {
    let Some(cutoff) = now.checked_sub(period) else {
        return 0;
    };
    let mut pruned = 0;
    while history.front().is_some_and(|r| r.requested_at < cutoff) {
        history.pop_front();
        pruned += 1;
    }
    pruned
}

fn safety_buffer(hit_ratio: f64) -> f64 {
    (1.5 / (hit_ratio * 1.1).max(0.8)).clamp(1.2, 2.0)
}

/// Recomputes `current` from the request rate over `period`, scaled up when
/// the hit ratio is poor. Without history the target decays one step toward
/// `min`. The result always lies within `[min, max]`.
pub fn retune(targets: CacheTargetData, history: &VecDeque<FilesystemRequestData>, period: Duration) -> CacheTargetData {
    let wanted = if history.is_empty() {
        targets.current.saturating_sub(1)
    } else {
        let minutes = (period.as_secs_f64() / 60.0).max(1.0 / 60.0);
        let per_minute = history.len() as f64 / minutes;
        let hits = history.iter().filter(|r| r.was_cache_hit).count();
        let hit_ratio = hits as f64 / history.len() as f64;
        (per_minute * safety_buffer(hit_ratio)).ceil() as usize
    };

    CacheTargetData {
        current: wanted.max(targets.min).min(targets.max),
        ..targets
    }
}

/// State of one family, as seen from outside the pooler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyPoolStatus {
    pub targets: CacheTargetData,
    pub warm: usize,
    pub building: usize,
    pub waiting: usize,
    pub tracked_requests: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub compiler: FamilyPoolStatus,
    pub executor: FamilyPoolStatus,
}

impl PoolSnapshot {
    pub fn family(&self, family: ImageFamily) -> &FamilyPoolStatus {
        match family {
            ImageFamily::Compiler => &self.compiler,
            ImageFamily::Executor => &self.executor,
        }
    }
}

type ImageReply = oneshot::Sender<Result<FilesystemImage, ExecutorError>>;

enum PoolMessage {
    Acquire { family: ImageFamily, reply: ImageReply },
    Discard(FilesystemImage),
    Snapshot(oneshot::Sender<PoolSnapshot>),
}

struct BuildOutcome {
    family: ImageFamily,
    result: Result<FilesystemImage, ExecutorError>,
}

/// Handle to the pooler task.
#[derive(Clone)]
pub struct FilesystemPooler {
    tx: mpsc::Sender<PoolMessage>,
}

fn pooler_stopped() -> ExecutorError {
    ExecutorError::infrastructure("filesystem pooler is not running")
}

impl FilesystemPooler {
    pub fn spawn(
        config: &PoolConfig,
        builder: Arc<dyn ImageBuilder>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.request_channel_capacity.max(1));
        let (built_tx, built_rx) = mpsc::unbounded_channel();

        let actor = PoolActor {
            builder,
            builds: Arc::new(Semaphore::new(config.build_concurrency.max(1))),
            period: config.tracking_period(),
            compiler: FamilyPool::new(config.targets(ImageFamily::Compiler)),
            executor: FamilyPool::new(config.targets(ImageFamily::Executor)),
            built_tx,
            retuning: false,
        };
        let handle = tokio::spawn(actor.run(rx, built_rx, config.polling_interval(), shutdown));
        (Self { tx }, handle)
    }

    /// Returns a warm image, or waits for one to be built.
    pub async fn acquire(
        &self,
        family: ImageFamily,
        cancel: &CancellationToken,
    ) -> Result<FilesystemImage, ExecutorError> {
        let (reply, rx) = oneshot::channel();
        tokio::select! {
            _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
            sent = self.tx.send(PoolMessage::Acquire { family, reply }) => {
                sent.map_err(|_| pooler_stopped())?
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
            result = rx => result.map_err(|_| pooler_stopped())?,
        }
    }

    /// Hands a used image back for disposal.
    pub async fn discard(&self, image: FilesystemImage) -> Result<(), ExecutorError> {
        self.tx
            .send(PoolMessage::Discard(image))
            .await
            .map_err(|_| pooler_stopped())
    }

    pub async fn snapshot(&self) -> Result<PoolSnapshot, ExecutorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PoolMessage::Snapshot(reply))
            .await
            .map_err(|_| pooler_stopped())?;
        rx.await.map_err(|_| pooler_stopped())
    }
}

struct FamilyPool {
    targets: CacheTargetData,
    warm: VecDeque<FilesystemImage>,
    history: VecDeque<FilesystemRequestData>,
    waiters: VecDeque<ImageReply>,
    building: usize,
}

impl FamilyPool {
    fn new(targets: CacheTargetData) -> Self {
        Self {
            targets,
            warm: VecDeque::new(),
            history: VecDeque::new(),
            waiters: VecDeque::new(),
            building: 0,
        }
    }

    /// Gives `image` to the oldest live waiter, or returns it when none is left.
    fn hand_to_waiter(&mut self, mut image: FilesystemImage) -> Option<FilesystemImage> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Ok(image)) {
                Ok(()) => return None,
                Err(Ok(returned)) => image = returned,
                Err(Err(_)) => return None,
            }
        }
        Some(image)
    }

    fn status(&self) -> FamilyPoolStatus {
        FamilyPoolStatus {
            targets: self.targets,
            warm: self.warm.len(),
            building: self.building,
            waiting: self.waiters.iter().filter(|w| !w.is_closed()).count(),
            tracked_requests: self.history.len(),
        }
    }
}

struct PoolActor {
    builder: Arc<dyn ImageBuilder>,
    builds: Arc<Semaphore>,
    period: Duration,
    compiler: FamilyPool,
    executor: FamilyPool,
    built_tx: mpsc::UnboundedSender<BuildOutcome>,
    /// The startup fill uses the configured targets as they are.
    retuning: bool,
}

impl PoolActor {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<PoolMessage>,
        mut built_rx: mpsc::UnboundedReceiver<BuildOutcome>,
        polling_interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("filesystem pooler started, polling every {:?}", polling_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.maintain(),
                Some(outcome) = built_rx.recv() => self.on_built(outcome),
                message = rx.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
            }
        }
        info!("filesystem pooler stopped");
    }

    fn pool_mut(&mut self, family: ImageFamily) -> &mut FamilyPool {
        match family {
            ImageFamily::Compiler => &mut self.compiler,
            ImageFamily::Executor => &mut self.executor,
        }
    }

    fn handle(&mut self, message: PoolMessage) {
        match message {
            PoolMessage::Acquire { family, reply } => {
                let pool = self.pool_mut(family);
                let requested_at = Instant::now();
                if let Some(image) = pool.warm.pop_front() {
                    pool.history.push_back(FilesystemRequestData {
                        requested_at,
                        was_cache_hit: true,
                    });
                    if let Err(Ok(image)) = reply.send(Ok(image)) {
                        pool.warm.push_front(image);
                    }
                    return;
                }

                pool.history.push_back(FilesystemRequestData {
                    requested_at,
                    was_cache_hit: false,
                });
                pool.waiters.retain(|w| !w.is_closed());
                pool.waiters.push_back(reply);
                if pool.waiters.len() > pool.building {
                    debug!("no warm {} image, building on demand", family);
                    self.spawn_build(family);
                }
            }
            PoolMessage::Discard(image) => self.spawn_discard(image),
            PoolMessage::Snapshot(reply) => {
                let _ = reply.send(PoolSnapshot {
                    compiler: self.compiler.status(),
                    executor: self.executor.status(),
                });
            }
        }
    }

    fn on_built(&mut self, outcome: BuildOutcome) {
        let family = outcome.family;
        let pool = self.pool_mut(family);
        pool.building = pool.building.saturating_sub(1);

        match outcome.result {
            Ok(image) => {
                if let Some(image) = pool.hand_to_waiter(image) {
                    pool.warm.push_back(image);
                }
            }
            Err(e) => {
                error!("building a {} image failed: {}", family, e);
                // Fail a waiter only when the builds still in flight cannot cover it.
                pool.waiters.retain(|w| !w.is_closed());
                if pool.waiters.len() > pool.building {
                    if let Some(waiter) = pool.waiters.pop_front() {
                        let _ = waiter.send(Err(e));
                    }
                }
            }
        }
    }

    fn maintain(&mut self) {
        let now = Instant::now();
        let period = self.period;
        let retuning = self.retuning;
        self.retuning = true;
        for family in ImageFamily::ALL {
            let pool = self.pool_mut(family);
            let pruned = prune_history(&mut pool.history, now, period);
            if pruned > 0 {
                debug!("pruned {} {} request records", pruned, family);
            }

            if retuning {
                let retuned = retune(pool.targets, &pool.history, period);
                if retuned.current != pool.targets.current {
                    info!(
                        "{} cache target {} -> {} ({} requests tracked)",
                        family,
                        pool.targets.current,
                        retuned.current,
                        pool.history.len()
                    );
                }
                pool.targets = retuned;
            }

            let mut evicted = Vec::new();
            while pool.warm.len() > pool.targets.current {
                if let Some(image) = pool.warm.pop_front() {
                    evicted.push(image);
                }
            }

            pool.waiters.retain(|w| !w.is_closed());
            let supply = pool.warm.len() + pool.building;
            let demand = pool.targets.current + pool.waiters.len();
            let deficit = demand.saturating_sub(supply);

            for image in evicted {
                debug!("evicting {} image {}", family, image.id);
                self.spawn_discard(image);
            }
            for _ in 0..deficit {
                self.spawn_build(family);
            }
        }
    }

    fn spawn_build(&mut self, family: ImageFamily) {
        self.pool_mut(family).building += 1;
        let builder = self.builder.clone();
        let permits = self.builds.clone();
        let built_tx = self.built_tx.clone();

        tokio::spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(permit) => {
                    let result = builder.build(family, Uuid::new_v4()).await;
                    drop(permit);
                    result
                }
                Err(_) => Err(ExecutorError::infrastructure("image build slots closed")),
            };
            let _ = built_tx.send(BuildOutcome { family, result });
        });
    }

    fn spawn_discard(&self, image: FilesystemImage) {
        let builder = self.builder.clone();
        tokio::spawn(async move {
            if let Err(e) = builder.discard(&image).await {
                warn!("could not discard image {}: {}", image.id, e);
            }
        });
    }
}
