//! Configuration types for the executor.
//!
//! Every field carries a serde default, so an empty YAML document yields a
//! complete configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::resources::{ImageFamily, Resources};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub environments: EnvironmentsConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub handler: HandlerConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub warden: WardenConfig,

    #[serde(default)]
    pub guest: GuestConfig,

    #[serde(default)]
    pub vm: VmConfig,

    #[serde(default)]
    pub exercises: ExercisesConfig,
}

/// Wall-clock budgets, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    /// One guest round trip.
    #[serde(default = "default_query_secs")]
    pub query_secs: u64,

    /// Waiting for fleet capacity or a filesystem image.
    #[serde(default = "default_resource_request_secs")]
    pub resource_request_secs: u64,

    #[serde(default = "default_compilation_secs")]
    pub compilation_secs: u64,

    #[serde(default = "default_execution_secs")]
    pub execution_secs: u64,

    /// Booting a new environment until its guest answers.
    #[serde(default = "default_launch_secs")]
    pub launch_secs: u64,
}

impl TimeoutConfig {
    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    pub fn resource_request(&self) -> Duration {
        Duration::from_secs(self.resource_request_secs)
    }

    pub fn compilation(&self) -> Duration {
        Duration::from_secs(self.compilation_secs)
    }

    pub fn execution(&self) -> Duration {
        Duration::from_secs(self.execution_secs)
    }

    pub fn launch(&self) -> Duration {
        Duration::from_secs(self.launch_secs)
    }

    /// Longest a caller waits for one job: two reservations, compilation and the run.
    pub fn job_deadline(&self) -> Duration {
        (self.resource_request() + self.launch()) * 2 + self.compilation() + self.execution()
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            query_secs: default_query_secs(),
            resource_request_secs: default_resource_request_secs(),
            compilation_secs: default_compilation_secs(),
            execution_secs: default_execution_secs(),
            launch_secs: default_launch_secs(),
        }
    }
}

/// Host capacity shared by every environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    #[serde(default = "default_total_memory_mb")]
    pub total_memory_mb: u64,

    #[serde(default = "default_total_vcpus")]
    pub total_vcpus: f64,

    /// Multiplier applied to the totals before admission.
    #[serde(default = "default_oversubscription")]
    pub oversubscription: f64,
}

impl ClusterConfig {
    pub fn budget(&self) -> Resources {
        Resources::new(self.total_vcpus, self.total_memory_mb).scaled(self.oversubscription)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            total_memory_mb: default_total_memory_mb(),
            total_vcpus: default_total_vcpus(),
            oversubscription: default_oversubscription(),
        }
    }
}

/// Resources given to one environment of a family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FamilyAllocation {
    pub vcpus: f64,
    pub memory_mb: u64,
    pub max_concurrent_jobs: u32,
}

impl FamilyAllocation {
    pub fn resources(&self) -> Resources {
        Resources::new(self.vcpus, self.memory_mb)
    }

    /// Share of the allocation one job reserves.
    pub fn per_job(&self) -> Resources {
        let jobs = self.max_concurrent_jobs.max(1);
        Resources::new(self.vcpus / jobs as f64, self.memory_mb / jobs as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentsConfig {
    #[serde(default = "default_executor_allocation")]
    pub executor: FamilyAllocation,

    #[serde(default = "default_compiler_allocation")]
    pub compiler: FamilyAllocation,

    /// Environments without jobs for this long are reclaimed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

impl EnvironmentsConfig {
    pub fn allocation(&self, family: ImageFamily) -> &FamilyAllocation {
        match family {
            ImageFamily::Compiler => &self.compiler,
            ImageFamily::Executor => &self.executor,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

impl Default for EnvironmentsConfig {
    fn default() -> Self {
        Self {
            executor: default_executor_allocation(),
            compiler: default_compiler_allocation(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

/// Bounds of the warm-image population for one family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheTargetData {
    pub min: usize,
    pub current: usize,
    pub max: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Window of request history used when retuning targets.
    #[serde(default = "default_tracking_period_secs")]
    pub tracking_period_secs: u64,

    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: u64,

    #[serde(default = "default_build_concurrency")]
    pub build_concurrency: usize,

    #[serde(default = "default_request_channel_capacity")]
    pub request_channel_capacity: usize,

    #[serde(default = "default_compiler_targets")]
    pub compiler: CacheTargetData,

    #[serde(default = "default_executor_targets")]
    pub executor: CacheTargetData,

    /// Where built images are placed.
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,

    /// Script invoked as `<script> <family> <output path>`. Without one,
    /// images are prepared through the warden.
    #[serde(default)]
    pub build_script: Option<PathBuf>,
}

impl PoolConfig {
    pub fn targets(&self, family: ImageFamily) -> CacheTargetData {
        match family {
            ImageFamily::Compiler => self.compiler,
            ImageFamily::Executor => self.executor,
        }
    }

    pub fn tracking_period(&self) -> Duration {
        Duration::from_secs(self.tracking_period_secs)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tracking_period_secs: default_tracking_period_secs(),
            polling_interval_secs: default_polling_interval_secs(),
            build_concurrency: default_build_concurrency(),
            request_channel_capacity: default_request_channel_capacity(),
            compiler: default_compiler_targets(),
            executor: default_executor_targets(),
            image_dir: default_image_dir(),
            build_script: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerConfig {
    /// Workers per service.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_handler_polling_ms")]
    pub polling_interval_ms: u64,

    /// Unacknowledged deliveries a worker may hold.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl HandlerConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            polling_interval_ms: default_handler_polling_ms(),
            prefetch: default_prefetch(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,

    #[serde(default = "default_max_test_cases")]
    pub max_test_cases: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: default_max_source_bytes(),
            max_test_cases: default_max_test_cases(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WardenConfig {
    #[serde(default = "default_warden_url")]
    pub base_url: String,

    /// Host the published container ports are reachable on.
    #[serde(default = "default_guest_host")]
    pub guest_host: String,

    /// First host port handed to new environments.
    #[serde(default = "default_first_port")]
    pub first_port: u16,

    #[serde(default = "default_port_count")]
    pub port_count: u16,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            base_url: default_warden_url(),
            guest_host: default_guest_host(),
            first_port: default_first_port(),
            port_count: default_port_count(),
        }
    }
}

/// How the host reaches the guest agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GuestTransport {
    /// Direct TCP to the environment's published port.
    #[default]
    Tcp,
    /// Unix socket exposed by the VMM, one per environment, named
    /// `<port>.sock` inside `uds_dir`.
    Vsock { uds_dir: PathBuf, guest_port: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuestConfig {
    #[serde(default)]
    pub transport: GuestTransport,

    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Paths whose hashes are recorded after a compiler environment boots.
    #[serde(default = "default_files_to_check")]
    pub files_to_check: Vec<String>,

    /// Largest reply frame accepted from a guest.
    #[serde(default = "default_max_reply_bytes")]
    pub max_reply_bytes: usize,
}

impl GuestConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            transport: GuestTransport::default(),
            retry_count: default_retry_count(),
            base_backoff_ms: default_base_backoff_ms(),
            files_to_check: default_files_to_check(),
            max_reply_bytes: default_max_reply_bytes(),
        }
    }
}

/// Environments booted straight from pooled images by a host script,
/// instead of containers managed by the warden.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VmConfig {
    /// Run as `<shell> <script> <family> <image path> <vm id> <socket path> <vcpus> <memory mb>`.
    /// The process must stay up for as long as the environment lives and
    /// expose the guest's vsock proxy at the socket path. Pairs with
    /// `pool.build_script`.
    #[serde(default)]
    pub launch_script: Option<PathBuf>,

    #[serde(default = "default_shell")]
    pub shell: String,

    /// Proxy sockets are created here as `<vm id>.sock`.
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    #[serde(default = "default_vm_guest_port")]
    pub guest_port: u32,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            launch_script: None,
            shell: default_shell(),
            socket_dir: default_socket_dir(),
            guest_port: default_vm_guest_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExercisesConfig {
    /// Directory of `<exerciseId>.tc` and `<exerciseId>.template.java` files.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_query_secs() -> u64 {
    15
}

fn default_resource_request_secs() -> u64 {
    30
}

fn default_compilation_secs() -> u64 {
    60
}

fn default_execution_secs() -> u64 {
    30
}

fn default_launch_secs() -> u64 {
    60
}

fn default_total_memory_mb() -> u64 {
    8192
}

fn default_total_vcpus() -> f64 {
    8.0
}

fn default_oversubscription() -> f64 {
    1.5
}

fn default_executor_allocation() -> FamilyAllocation {
    FamilyAllocation {
        vcpus: 1.0,
        memory_mb: 256,
        max_concurrent_jobs: 4,
    }
}

fn default_compiler_allocation() -> FamilyAllocation {
    FamilyAllocation {
        vcpus: 2.0,
        memory_mb: 2048,
        max_concurrent_jobs: 4,
    }
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_reaper_interval_secs() -> u64 {
    15
}

fn default_tracking_period_secs() -> u64 {
    600
}

fn default_polling_interval_secs() -> u64 {
    15
}

fn default_build_concurrency() -> usize {
    4
}

fn default_request_channel_capacity() -> usize {
    256
}

fn default_compiler_targets() -> CacheTargetData {
    CacheTargetData {
        min: 1,
        current: 1,
        max: 16,
    }
}

fn default_executor_targets() -> CacheTargetData {
    CacheTargetData {
        min: 2,
        current: 5,
        max: 32,
    }
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("/var/lib/duckjudge/images")
}

fn default_workers() -> usize {
    4
}

fn default_handler_polling_ms() -> u64 {
    100
}

fn default_prefetch() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_max_source_bytes() -> usize {
    64 * 1024
}

fn default_max_test_cases() -> usize {
    200
}

fn default_warden_url() -> String {
    "http://127.0.0.1:7139".to_string()
}

fn default_guest_host() -> String {
    "127.0.0.1".to_string()
}

fn default_first_port() -> u16 {
    15050
}

fn default_port_count() -> u16 {
    1000
}

fn default_retry_count() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    100
}

fn default_files_to_check() -> Vec<String> {
    vec!["/app/lib/gson-2.13.1.jar".to_string()]
}

fn default_max_reply_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/run/duckjudge/vms")
}

fn default_vm_guest_port() -> u32 {
    5000
}
