// src/fleet.rs
//! The fleet of execution environments and the accounting that guards it.
//!
//! Every environment splits its allocation into `max_concurrent_jobs` equal
//! reservations. A job holds exactly one reservation for as long as its
//! [`EnvironmentLease`] lives; dropping the lease gives it back. New
//! environments are launched only while the cluster budget allows, and are
//! torn down by a reaper task when poisoned or idle.

use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{EnvironmentsConfig, ExecutorConfig, TimeoutConfig};
use crate::errors::ExecutorError;
use crate::executors::{LaunchSpec, SandboxBackend, SandboxHandle};
use crate::pooler::{FilesystemImage, FilesystemPooler};
use crate::resources::{ImageFamily, Resources};

/// One live environment.
#[derive(Debug, Clone)]
pub struct ExecutionEnvironment {
    pub vm_id: Uuid,
    pub family: ImageFamily,
    pub image: FilesystemImage,
    pub handle: SandboxHandle,
    pub allocated: Resources,
    pub per_job: Resources,
    pub used: Resources,
    pub active_jobs: HashSet<Uuid>,
    pub serviced_jobs: Vec<Uuid>,
    pub file_hashes: BTreeMap<String, String>,
    /// Set once the environment must not take new jobs.
    pub draining: bool,
    pub idle_since: Instant,
}

/// Read-only view of an environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentStatus {
    pub vm_id: Uuid,
    pub family: ImageFamily,
    pub allocated: Resources,
    pub used: Resources,
    pub active_jobs: usize,
    pub serviced_jobs: usize,
    pub draining: bool,
    pub file_hashes: BTreeMap<String, String>,
}

impl From<&ExecutionEnvironment> for EnvironmentStatus {
    fn from(env: &ExecutionEnvironment) -> Self {
        Self {
            vm_id: env.vm_id,
            family: env.family,
            allocated: env.allocated,
            used: env.used,
            active_jobs: env.active_jobs.len(),
            serviced_jobs: env.serviced_jobs.len(),
            draining: env.draining,
            file_hashes: env.file_hashes.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct FleetTable {
    environments: HashMap<Uuid, ExecutionEnvironment>,
    /// Allocations of live and launching environments.
    committed: Resources,
}

enum Reservation {
    Existing(SandboxHandle),
    Launch(Commitment),
    Full,
}

/// Budget set aside for an environment that is still launching. Handed
/// back on drop unless the environment made it into the table.
struct Commitment {
    fleet: FleetManager,
    resources: Resources,
    settled: bool,
}

impl Commitment {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for Commitment {
    fn drop(&mut self) {
        if !self.settled {
            self.fleet.uncommit(self.resources);
        }
    }
}

type LeaseReply = oneshot::Sender<Result<EnvironmentLease, ExecutorError>>;

enum ReaperMessage {
    Evict(Uuid),
}

struct FleetInner {
    table: Mutex<FleetTable>,
    backend: Arc<dyn SandboxBackend>,
    pooler: FilesystemPooler,
    environments: EnvironmentsConfig,
    timeouts: TimeoutConfig,
    budget: Resources,
    files_to_check: Vec<String>,
    reaper_tx: mpsc::UnboundedSender<ReaperMessage>,
    capacity: Notify,
}

/// Owner of the environment table.
#[derive(Clone)]
pub struct FleetManager {
    inner: Arc<FleetInner>,
}

impl FleetManager {
    /// Creates the manager and spawns its reaper, which runs until `shutdown`.
    pub fn spawn(
        config: &ExecutorConfig,
        backend: Arc<dyn SandboxBackend>,
        pooler: FilesystemPooler,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (reaper_tx, reaper_rx) = mpsc::unbounded_channel();
        let fleet = Self {
            inner: Arc::new(FleetInner {
                table: Mutex::new(FleetTable::default()),
                backend,
                pooler,
                environments: config.environments.clone(),
                timeouts: config.timeouts.clone(),
                budget: config.cluster.budget(),
                files_to_check: config.guest.files_to_check.clone(),
                reaper_tx,
                capacity: Notify::new(),
            }),
        };

        let reaper = fleet.clone();
        let handle = tokio::spawn(async move { reaper.run_reaper(reaper_rx, shutdown).await });
        info!(
            "fleet manager started with a budget of {:.1} vCPU / {} MB",
            fleet.inner.budget.vcpus, fleet.inner.budget.memory_mb
        );
        (fleet, handle)
    }

    pub fn backend(&self) -> &Arc<dyn SandboxBackend> {
        &self.inner.backend
    }

    /// Reserves a slot for `job_id` on an environment of `family`, launching
    /// one when none has room. Waits for capacity up to the resource request
    /// timeout.
    pub async fn acquire(
        &self,
        job_id: Uuid,
        family: ImageFamily,
        cancel: &CancellationToken,
    ) -> Result<EnvironmentLease, ExecutorError> {
        let deadline = Instant::now() + self.inner.timeouts.resource_request();

        loop {
            let notified = self.inner.capacity.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_reserve(job_id, family) {
                Reservation::Existing(handle) => {
                    debug!("job {} joined environment {}", job_id, handle.vm_id);
                    return Ok(EnvironmentLease::new(self.clone(), job_id, handle));
                }
                Reservation::Launch(commitment) => {
                    return self.launch(job_id, family, commitment, deadline, cancel).await
                }
                Reservation::Full => debug!("fleet is full, job {} waits for capacity", job_id),
            }

            tokio::select! {
                _ = &mut notified => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ExecutorError::exhausted(format!("no {} capacity", family)));
                }
                _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
            }
        }
    }

    fn try_reserve(&self, job_id: Uuid, family: ImageFamily) -> Reservation {
        let allocation = self.inner.environments.allocation(family);
        let mut table = self.lock();

        let candidate = table
            .environments
            .values_mut()
            .filter(|env| env.family == family && !env.draining)
            .filter(|env| env.active_jobs.len() < allocation.max_concurrent_jobs as usize)
            .find(|env| env.used.fits(env.per_job, env.allocated));

        if let Some(env) = candidate {
            env.used = env.used.saturating_add(env.per_job);
            env.active_jobs.insert(job_id);
            env.serviced_jobs.push(job_id);
            return Reservation::Existing(env.handle.clone());
        }

        if table.committed.fits(allocation.resources(), self.inner.budget) {
            table.committed = table.committed.saturating_add(allocation.resources());
            return Reservation::Launch(Commitment {
                fleet: self.clone(),
                resources: allocation.resources(),
                settled: false,
            });
        }
        Reservation::Full
    }

    async fn launch(
        &self,
        job_id: Uuid,
        family: ImageFamily,
        commitment: Commitment,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<EnvironmentLease, ExecutorError> {
        let image = tokio::select! {
            image = self.inner.pooler.acquire(family, cancel) => image,
            _ = tokio::time::sleep_until(deadline) => {
                Err(ExecutorError::exhausted(format!("no {} filesystem image in time", family)))
            }
        }?;

        let spec = LaunchSpec {
            vm_id: Uuid::new_v4(),
            family,
            image,
            resources: commitment.resources,
        };
        // Booting runs on its own task so that a caller going away cannot
        // strand a half-started sandbox.
        let (ready_tx, ready_rx) = oneshot::channel();
        let fleet = self.clone();
        tokio::spawn(async move { fleet.finish_launch(job_id, spec, commitment, ready_tx).await });

        let lease = tokio::select! {
            ready = ready_rx => ready.map_err(|_| ExecutorError::infrastructure("environment launch was interrupted"))??,
            _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
        };
        if cancel.is_cancelled() {
            drop(lease);
            return Err(ExecutorError::Cancelled);
        }
        Ok(lease)
    }

    /// Boots `spec` and hands the first lease of the new environment to
    /// `ready`. A sandbox nobody waits for anymore is torn down again.
    async fn finish_launch(&self, job_id: Uuid, spec: LaunchSpec, commitment: Commitment, ready: LeaseReply) {
        let vm_id = spec.vm_id;
        let family = spec.family;
        let booted = match tokio::time::timeout(self.inner.timeouts.launch(), self.boot(&spec)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::infrastructure(format!(
                "environment {} did not launch within {:?}",
                vm_id,
                self.inner.timeouts.launch()
            ))),
        };
        let (handle, file_hashes) = match booted {
            Ok(booted) => booted,
            Err(e) => {
                error!("launching {} environment {} failed: {}", family, vm_id, e);
                drop(commitment);
                self.return_image(vm_id, spec.image).await;
                let _ = ready.send(Err(e));
                return;
            }
        };

        if ready.is_closed() {
            warn!("launch of {} environment {} was abandoned, stopping it", family, vm_id);
            if let Err(e) = self.inner.backend.terminate(&handle).await {
                error!("terminating environment {} failed: {}", vm_id, e);
            }
            self.return_image(vm_id, spec.image).await;
            return;
        }

        let allocation = self.inner.environments.allocation(family);
        let per_job = allocation.per_job();
        {
            let mut table = self.lock();
            table.environments.insert(
                vm_id,
                ExecutionEnvironment {
                    vm_id,
                    family,
                    image: spec.image,
                    handle: handle.clone(),
                    allocated: allocation.resources(),
                    per_job,
                    used: per_job,
                    active_jobs: HashSet::from([job_id]),
                    serviced_jobs: vec![job_id],
                    file_hashes,
                    draining: false,
                    idle_since: Instant::now(),
                },
            );
        }
        commitment.settle();
        info!("{} environment {} is up, serving job {}", family, vm_id, job_id);

        // An undeliverable lease is dropped here, which releases it.
        let _ = ready.send(Ok(EnvironmentLease::new(self.clone(), job_id, handle)));
    }

    async fn return_image(&self, vm_id: Uuid, image: FilesystemImage) {
        if let Err(e) = self.inner.pooler.discard(image).await {
            warn!("could not return image of {}: {}", vm_id, e);
        }
    }

    /// Launches the sandbox and, for compiler environments, records the
    /// hashes of the files the grading classpath depends on.
    async fn boot(&self, spec: &LaunchSpec) -> Result<(SandboxHandle, BTreeMap<String, String>), ExecutorError> {
        let handle = self.inner.backend.launch(spec).await?;
        if spec.family != ImageFamily::Compiler {
            return Ok((handle, BTreeMap::new()));
        }

        let checked = self
            .inner
            .backend
            .health(&handle, self.inner.files_to_check.clone(), self.inner.timeouts.query())
            .await
            .and_then(|reply| {
                reply
                    .into_result()
                    .map_err(|msg| ExecutorError::infrastructure(format!("health check failed: {}", msg)))
            });
        match checked {
            Ok(hashes) => {
                debug!("environment {} file hashes: {:?}", spec.vm_id, hashes);
                Ok((handle, hashes))
            }
            Err(e) => {
                let _ = self.inner.backend.terminate(&handle).await;
                Err(e)
            }
        }
    }

    fn uncommit(&self, resources: Resources) {
        {
            let mut table = self.lock();
            table.committed = table.committed.saturating_sub(resources);
        }
        self.inner.capacity.notify_waiters();
    }

    /// Returns `job_id`'s reservation. False when the job held none.
    pub fn release(&self, vm_id: Uuid, job_id: Uuid) -> bool {
        let evict = {
            let mut table = self.lock();
            let Some(env) = table.environments.get_mut(&vm_id) else {
                return false;
            };
            if !env.active_jobs.remove(&job_id) {
                return false;
            }
            env.used = env.used.saturating_sub(env.per_job);
            if env.active_jobs.is_empty() {
                env.used = Resources::ZERO;
                env.idle_since = Instant::now();
            }
            env.draining && env.active_jobs.is_empty()
        };

        debug!("job {} released environment {}", job_id, vm_id);
        if evict {
            let _ = self.inner.reaper_tx.send(ReaperMessage::Evict(vm_id));
        }
        self.inner.capacity.notify_waiters();
        true
    }

    /// Stops handing out `vm_id` and tears it down once its last job leaves.
    pub fn poison(&self, vm_id: Uuid, reason: &str) {
        let idle = {
            let mut table = self.lock();
            match table.environments.get_mut(&vm_id) {
                Some(env) => {
                    env.draining = true;
                    env.active_jobs.is_empty()
                }
                None => return,
            }
        };
        warn!("environment {} poisoned: {}", vm_id, reason);
        if idle {
            let _ = self.inner.reaper_tx.send(ReaperMessage::Evict(vm_id));
        }
    }

    /// Reservations currently held on `vm_id`; zero for unknown environments.
    pub fn active_reservations(&self, vm_id: Uuid) -> usize {
        self.lock()
            .environments
            .get(&vm_id)
            .map_or(0, |env| env.active_jobs.len())
    }

    pub fn snapshot(&self) -> Vec<EnvironmentStatus> {
        let mut statuses: Vec<_> = self.lock().environments.values().map(EnvironmentStatus::from).collect();
        statuses.sort_by_key(|s| s.vm_id);
        statuses
    }

    pub fn committed(&self) -> Resources {
        self.lock().committed
    }

    /// Evicts every environment that has been idle for the configured timeout.
    pub async fn reap_idle(&self, now: Instant) -> usize {
        let idle_timeout = self.inner.environments.idle_timeout();
        let idle: Vec<Uuid> = {
            let mut table = self.lock();
            table
                .environments
                .values_mut()
                .filter(|env| env.active_jobs.is_empty())
                .filter(|env| now.saturating_duration_since(env.idle_since) >= idle_timeout)
                .map(|env| {
                    env.draining = true;
                    env.vm_id
                })
                .collect()
        };

        let mut evicted = 0;
        for vm_id in idle {
            if self.evict(vm_id).await {
                evicted += 1;
            }
        }
        evicted
    }

    /// Removes a drained environment and destroys it.
    async fn evict(&self, vm_id: Uuid) -> bool {
        let env = {
            let mut table = self.lock();
            let drained = table
                .environments
                .get(&vm_id)
                .is_some_and(|env| env.draining && env.active_jobs.is_empty());
            if !drained {
                return false;
            }
            let Some(env) = table.environments.remove(&vm_id) else {
                return false;
            };
            table.committed = table.committed.saturating_sub(env.allocated);
            env
        };
        self.inner.capacity.notify_waiters();

        info!(
            "evicting {} environment {} after {} jobs",
            env.family,
            vm_id,
            env.serviced_jobs.len()
        );
        if let Err(e) = self.inner.backend.terminate(&env.handle).await {
            error!("terminating environment {} failed: {}", vm_id, e);
        }
        if let Err(e) = self.inner.pooler.discard(env.image).await {
            warn!("could not discard image of {}: {}", vm_id, e);
        }
        true
    }

    async fn run_reaper(&self, mut rx: mpsc::UnboundedReceiver<ReaperMessage>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.environments.reaper_interval().max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(ReaperMessage::Evict(vm_id)) = rx.recv() => {
                    self.evict(vm_id).await;
                }
                _ = ticker.tick() => {
                    let evicted = self.reap_idle(Instant::now()).await;
                    if evicted > 0 {
                        debug!("reaped {} idle environments", evicted);
                    }
                }
            }
        }

        let remaining: Vec<SandboxHandle> = {
            let mut table = self.lock();
            let handles = table.environments.drain().map(|(_, env)| env.handle).collect();
            table.committed = Resources::ZERO;
            handles
        };
        for handle in remaining {
            if let Err(e) = self.inner.backend.terminate(&handle).await {
                warn!("terminating {} on shutdown failed: {}", handle.vm_id, e);
            }
        }
        info!("fleet reaper stopped");
    }

    fn lock(&self) -> MutexGuard<'_, FleetTable> {
        self.inner.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A job's reservation on one environment. Released on drop.
pub struct EnvironmentLease {
    fleet: FleetManager,
    job_id: Uuid,
    handle: SandboxHandle,
    released: bool,
}

impl EnvironmentLease {
    fn new(fleet: FleetManager, job_id: Uuid, handle: SandboxHandle) -> Self {
        Self {
            fleet,
            job_id,
            handle,
            released: false,
        }
    }

    pub fn handle(&self) -> &SandboxHandle {
        &self.handle
    }

    pub fn vm_id(&self) -> Uuid {
        self.handle.vm_id
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Marks the environment unusable; it is torn down after this lease and
    /// any others on it are released.
    pub fn poison(&self, reason: &str) {
        self.fleet.poison(self.handle.vm_id, reason);
    }

    pub fn release(mut self) {
        self.released = self.fleet.release(self.handle.vm_id, self.job_id);
    }
}

impl Drop for EnvironmentLease {
    fn drop(&mut self) {
        if !self.released {
            self.fleet.release(self.handle.vm_id, self.job_id);
        }
    }
}

impl std::fmt::Debug for EnvironmentLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentLease")
            .field("vm_id", &self.handle.vm_id)
            .field("job_id", &self.job_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheTargetData, FamilyAllocation};
    use crate::test_utils::{CountingImageBuilder, ScriptedBackend};

    fn config(max_jobs: u32, total_vcpus: f64) -> ExecutorConfig {
        let mut config = ExecutorConfig::default();
        config.cluster.total_vcpus = total_vcpus;
        config.cluster.total_memory_mb = 4096;
        config.cluster.oversubscription = 1.0;
        config.environments.executor = FamilyAllocation {
            vcpus: 1.0,
            memory_mb: 256,
            max_concurrent_jobs: max_jobs,
        };
        config.environments.compiler = FamilyAllocation {
            vcpus: 1.0,
            memory_mb: 512,
            max_concurrent_jobs: max_jobs,
        };
        config.environments.idle_timeout_secs = 60;
        config.environments.reaper_interval_secs = 3600;
        config.timeouts.resource_request_secs = 1;
        config.pool.polling_interval_secs = 3600;
        config.pool.compiler = CacheTargetData { min: 0, current: 0, max: 1 };
        config.pool.executor = CacheTargetData { min: 0, current: 0, max: 1 };
        config
    }

    struct Harness {
        fleet: FleetManager,
        backend: ScriptedBackend,
        images: Arc<CountingImageBuilder>,
        shutdown: CancellationToken,
    }

    fn start(config: ExecutorConfig) -> Harness {
        let shutdown = CancellationToken::new();
        let images = Arc::new(CountingImageBuilder::new());
        let backend = ScriptedBackend::new();
        let (pooler, _) = FilesystemPooler::spawn(&config.pool, images.clone(), shutdown.clone());
        let (fleet, _) = FleetManager::spawn(&config, Arc::new(backend.clone()), pooler, shutdown.clone());
        Harness {
            fleet,
            backend,
            images,
            shutdown,
        }
    }

    async fn eventually<F: FnMut() -> bool>(mut done: F) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_jobs_share_an_environment_up_to_capacity() {
        let h = start(config(2, 8.0));
        let cancel = CancellationToken::new();

        let a = h.fleet.acquire(Uuid::new_v4(), ImageFamily::Executor, &cancel).await.unwrap();
        let b = h.fleet.acquire(Uuid::new_v4(), ImageFamily::Executor, &cancel).await.unwrap();
        let c = h.fleet.acquire(Uuid::new_v4(), ImageFamily::Executor, &cancel).await.unwrap();

        assert_eq!(a.vm_id(), b.vm_id());
        assert_ne!(a.vm_id(), c.vm_id());
        assert_eq!(h.fleet.active_reservations(a.vm_id()), 2);
        assert_eq!(h.backend.launched().len(), 2);

        let status = h.fleet.snapshot().into_iter().find(|s| s.vm_id == a.vm_id()).unwrap();
        assert_eq!(status.used, Resources::new(1.0, 256));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_drop_releases_the_reservation() {
        let h = start(config(2, 8.0));
        let cancel = CancellationToken::new();
        let job = Uuid::new_v4();

        let lease = h.fleet.acquire(job, ImageFamily::Executor, &cancel).await.unwrap();
        let vm_id = lease.vm_id();
        drop(lease);

        assert_eq!(h.fleet.active_reservations(vm_id), 0);
        assert!(!h.fleet.release(vm_id, job));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_full_cluster_is_resource_exhausted() {
        let h = start(config(1, 1.0));
        let cancel = CancellationToken::new();

        let _held = h.fleet.acquire(Uuid::new_v4(), ImageFamily::Executor, &cancel).await.unwrap();
        let err = h
            .fleet
            .acquire(Uuid::new_v4(), ImageFamily::Executor, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::ResourceExhausted(_)));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_waiter_gets_released_capacity() {
        let h = start(config(1, 1.0));
        let cancel = CancellationToken::new();

        let held = h.fleet.acquire(Uuid::new_v4(), ImageFamily::Executor, &cancel).await.unwrap();
        let vm_id = held.vm_id();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(held);
        });

        let next = h.fleet.acquire(Uuid::new_v4(), ImageFamily::Executor, &cancel).await.unwrap();
        assert_eq!(next.vm_id(), vm_id);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_reservation() {
        let h = start(config(1, 1.0));
        let held = h
            .fleet
            .acquire(Uuid::new_v4(), ImageFamily::Executor, &CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = h
            .fleet
            .acquire(Uuid::new_v4(), ImageFamily::Executor, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Cancelled));
        assert_eq!(h.fleet.active_reservations(held.vm_id()), 1);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_poisoned_environment_is_evicted_after_release() {
        let h = start(config(2, 8.0));
        let cancel = CancellationToken::new();

        let lease = h.fleet.acquire(Uuid::new_v4(), ImageFamily::Executor, &cancel).await.unwrap();
        let vm_id = lease.vm_id();
        lease.poison("run timed out");

        let other = h.fleet.acquire(Uuid::new_v4(), ImageFamily::Executor, &cancel).await.unwrap();
        assert_ne!(other.vm_id(), vm_id);

        drop(lease);
        let backend = h.backend.clone();
        eventually(|| backend.terminated().contains(&vm_id)).await;
        let images = h.images.clone();
        eventually(|| images.discarded() == 1).await;
        assert!(h.fleet.snapshot().iter().all(|s| s.vm_id != vm_id));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_failed_launch_returns_budget() {
        let h = start(config(1, 1.0));
        h.backend.fail_launches(Some("warden unreachable"));

        let err = h
            .fleet
            .acquire(Uuid::new_v4(), ImageFamily::Executor, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_infrastructure());
        assert_eq!(h.fleet.committed(), Resources::ZERO);

        h.backend.fail_launches(None);
        assert!(h
            .fleet
            .acquire(Uuid::new_v4(), ImageFamily::Executor, &CancellationToken::new())
            .await
            .is_ok());
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_dropped_acquire_returns_budget_and_stops_the_launch() {
        let h = start(config(1, 1.0));
        h.backend.delay_launches(Some(Duration::from_millis(100)));

        let fleet = h.fleet.clone();
        let pending = tokio::spawn(async move {
            fleet
                .acquire(Uuid::new_v4(), ImageFamily::Executor, &CancellationToken::new())
                .await
        });
        let backend = h.backend.clone();
        eventually(|| backend.launched().len() == 1).await;
        pending.abort();
        let _ = pending.await;

        let backend = h.backend.clone();
        eventually(|| backend.terminated().len() == 1).await;
        let fleet = h.fleet.clone();
        eventually(|| fleet.committed() == Resources::ZERO).await;
        let images = h.images.clone();
        eventually(|| images.discarded() == 1).await;
        assert!(h.fleet.snapshot().is_empty());

        h.backend.delay_launches(None);
        assert!(h
            .fleet
            .acquire(Uuid::new_v4(), ImageFamily::Executor, &CancellationToken::new())
            .await
            .is_ok());
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_cancel_during_boot_returns_promptly() {
        let h = start(config(1, 1.0));
        h.backend.delay_launches(Some(Duration::from_millis(300)));
        let cancel = CancellationToken::new();

        let fleet = h.fleet.clone();
        let token = cancel.clone();
        let pending = tokio::spawn(async move { fleet.acquire(Uuid::new_v4(), ImageFamily::Executor, &token).await });
        let backend = h.backend.clone();
        eventually(|| backend.launched().len() == 1).await;

        cancel.cancel();
        let err = tokio::time::timeout(Duration::from_millis(100), pending)
            .await
            .expect("acquire ignored the cancellation")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Cancelled));

        let backend = h.backend.clone();
        eventually(|| backend.terminated().len() == 1).await;
        let fleet = h.fleet.clone();
        eventually(|| fleet.committed() == Resources::ZERO).await;
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_compiler_environments_record_file_hashes() {
        let h = start(config(1, 8.0));
        let lease = h
            .fleet
            .acquire(Uuid::new_v4(), ImageFamily::Compiler, &CancellationToken::new())
            .await
            .unwrap();

        let status = h.fleet.snapshot().into_iter().find(|s| s.vm_id == lease.vm_id()).unwrap();
        assert_eq!(status.file_hashes.len(), 1);
        assert!(status.file_hashes.contains_key("/app/lib/gson-2.13.1.jar"));
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_idle_environments_are_reaped() {
        let h = start(config(1, 8.0));
        let lease = h
            .fleet
            .acquire(Uuid::new_v4(), ImageFamily::Executor, &CancellationToken::new())
            .await
            .unwrap();
        let vm_id = lease.vm_id();

        assert_eq!(h.fleet.reap_idle(Instant::now() + Duration::from_secs(120)).await, 0);
        drop(lease);
        assert_eq!(h.fleet.reap_idle(Instant::now()).await, 0);
        assert_eq!(h.fleet.reap_idle(Instant::now() + Duration::from_secs(120)).await, 1);

        assert!(h.backend.terminated().contains(&vm_id));
        assert_eq!(h.fleet.committed(), Resources::ZERO);
        h.shutdown.cancel();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reservations_never_exceed_allocation() {
        let h = start(config(3, 2.0));
        let fleet = h.fleet.clone();
        let observed_over = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut tasks = Vec::new();
        for i in 0..24 {
            let fleet = fleet.clone();
            let over = observed_over.clone();
            tasks.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                if i % 5 == 0 {
                    cancel.cancel();
                }
                if let Ok(lease) = fleet.acquire(Uuid::new_v4(), ImageFamily::Executor, &cancel).await {
                    for status in fleet.snapshot() {
                        if status.active_jobs > 3 || !status.used.fits(Resources::ZERO, status.allocated) {
                            over.store(true, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    drop(lease);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(!observed_over.load(std::sync::atomic::Ordering::SeqCst));
        assert!(fleet.snapshot().iter().all(|s| s.active_jobs == 0 && s.used == Resources::ZERO));
        assert!(fleet.snapshot().len() <= 2);
        h.shutdown.cancel();
    }
}
