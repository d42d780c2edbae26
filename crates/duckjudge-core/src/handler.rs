// src/handler.rs
//! Per-job pipeline and the worker pools that drive it.
//!
//! A job moves through `Validating → Assigned → Compiling → Running` and
//! ends `Completed`, `Failed` or `TimedOut`. Compilation and execution each
//! hold an [`EnvironmentLease`] only for the duration of their phase, so the
//! reservation is returned on every exit path, cancellation included.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use duckjudge_types::{
    CompileRequest, ExecuteRequest, ExecuteResponse, ExecutionStyle, JobStatus, RunOutput, RunRequest,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analyzer::{CodeAnalysisResult, Parser, SourceAnalyzer};
use crate::config::{ExecutorConfig, HandlerConfig, LimitsConfig, TimeoutConfig};
use crate::errors::ExecutorError;
use crate::fleet::{EnvironmentLease, FleetManager};
use crate::harness::{fence_user_code, instrument, parse_output};
use crate::queue::{Consumer, Delivery, Queue, QueueBroker, ServiceData};
use crate::resources::ImageFamily;
use crate::testcases::{parse_test_cases, ExerciseStore, TestCase};

pub const JAVA: &str = "java";

/// A decoded submission as it travels over the request queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionJob {
    pub execution_id: Uuid,
    /// Secret that authenticates harness output lines for this job only.
    pub signing_key: Uuid,
    pub style: ExecutionStyle,
    pub language: String,
    pub source: String,
    pub exercise_id: Option<Uuid>,
}

impl ExecutionJob {
    /// Decodes and bounds-checks the payload of `request`.
    pub fn from_request(request: &ExecuteRequest, limits: &LimitsConfig) -> Result<Self, ExecutorError> {
        let bytes = STANDARD
            .decode(request.code_b64().trim())
            .map_err(|_| ExecutorError::invalid_request("source is not valid base64"))?;
        if bytes.len() > limits.max_source_bytes {
            return Err(ExecutorError::invalid_request(format!(
                "source exceeds {} bytes",
                limits.max_source_bytes
            )));
        }
        let source =
            String::from_utf8(bytes).map_err(|_| ExecutorError::invalid_request("source is not valid UTF-8"))?;

        Ok(Self {
            execution_id: Uuid::new_v4(),
            signing_key: Uuid::new_v4(),
            style: request.style(),
            language: JAVA.to_string(),
            source,
            exercise_id: request.exercise_id(),
        })
    }

    /// Seed of the harness helper names: the exercise for submissions, the
    /// execution itself for dry runs.
    pub fn prefix_seed(&self) -> Uuid {
        self.exercise_id.unwrap_or(self.execution_id)
    }

    pub fn fenced_source(&self) -> String {
        fence_user_code(&self.source, self.signing_key)
    }
}

/// One message on a service's response queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub execution_id: Uuid,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ExecuteResponse>,
    /// Internal description of an infrastructure fault. Never shown to learners.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl JobUpdate {
    pub fn status(execution_id: Uuid, status: JobStatus) -> Self {
        Self {
            execution_id,
            status,
            response: None,
            fault: None,
        }
    }

    pub fn finished(execution_id: Uuid, result: Result<ExecuteResponse, ExecutorError>) -> Self {
        match result {
            Ok(response) => Self {
                response: Some(response),
                ..Self::status(execution_id, JobStatus::Completed)
            },
            Err(e) if e.is_infrastructure() => Self {
                fault: Some(e.to_string()),
                ..Self::status(execution_id, JobStatus::Failed)
            },
            Err(ExecutorError::TimedOut) => Self {
                response: Some(ExecutorError::TimedOut.to_response()),
                ..Self::status(execution_id, JobStatus::TimedOut)
            },
            Err(e) => Self {
                response: Some(e.to_response()),
                ..Self::status(execution_id, JobStatus::Failed)
            },
        }
    }
}

#[derive(Debug, Default)]
struct CancellationTable {
    /// Published jobs no worker has picked up yet.
    queued: HashSet<Uuid>,
    running: HashMap<Uuid, CancellationToken>,
    /// Queued jobs cancelled before a worker picked them up.
    cancelled_early: HashSet<Uuid>,
}

/// Cancellation tokens of jobs, keyed by execution id.
#[derive(Debug, Clone, Default)]
pub struct JobCancellations {
    table: Arc<Mutex<CancellationTable>>,
}

impl JobCancellations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a job as published, so a cancellation arriving before a
    /// worker starts it is remembered.
    pub fn enqueue(&self, execution_id: Uuid) {
        self.lock().queued.insert(execution_id);
    }

    /// Token for a job that is about to start, derived from `parent`.
    pub fn register(&self, execution_id: Uuid, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        let mut table = self.lock();
        table.queued.remove(&execution_id);
        if table.cancelled_early.remove(&execution_id) {
            token.cancel();
        }
        table.running.insert(execution_id, token.clone());
        token
    }

    /// Cancels a running job, or flags a queued one. Jobs that already
    /// finished, or were never published, are ignored.
    pub fn cancel(&self, execution_id: Uuid) {
        let mut table = self.lock();
        if let Some(token) = table.running.get(&execution_id) {
            token.cancel();
        } else if table.queued.contains(&execution_id) {
            table.cancelled_early.insert(execution_id);
        }
    }

    pub fn remove(&self, execution_id: Uuid) {
        let mut table = self.lock();
        table.running.remove(&execution_id);
        table.queued.remove(&execution_id);
        table.cancelled_early.remove(&execution_id);
    }

    pub fn running(&self) -> usize {
        self.lock().running.len()
    }

    /// Cancellations waiting for their job to be picked up.
    pub fn pending_cancellations(&self) -> usize {
        self.lock().cancelled_early.len()
    }

    fn lock(&self) -> MutexGuard<'_, CancellationTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Runs single jobs against the fleet.
pub struct ExecutionHandler {
    fleet: FleetManager,
    exercises: Arc<dyn ExerciseStore>,
    analyzer: SourceAnalyzer,
    parser: Parser,
    timeouts: TimeoutConfig,
    limits: LimitsConfig,
}

impl ExecutionHandler {
    pub fn new(config: &ExecutorConfig, fleet: FleetManager, exercises: Arc<dyn ExerciseStore>) -> Self {
        Self {
            fleet,
            exercises,
            analyzer: SourceAnalyzer::new(),
            parser: Parser::new(),
            timeouts: config.timeouts.clone(),
            limits: config.limits.clone(),
        }
    }

    pub fn fleet(&self) -> &FleetManager {
        &self.fleet
    }

    /// Takes `job` from validation to a graded response, reporting every
    /// intermediate status through `on_status`.
    pub async fn handle<F>(
        &self,
        job: &ExecutionJob,
        cancel: &CancellationToken,
        on_status: F,
    ) -> Result<ExecuteResponse, ExecutorError>
    where
        F: Fn(JobStatus) + Send + Sync,
    {
        let transition = |status: JobStatus| {
            info!("job {} is {:?}", job.execution_id, status);
            on_status(status);
        };

        transition(JobStatus::Validating);
        let (analysis, cases) = self.validate(job).await?;
        let source = instrument(
            &job.source,
            &analysis,
            job.style,
            job.signing_key,
            job.prefix_seed(),
            &cases,
        )?;

        let class_files = self
            .compile(job, &analysis.main_class_name, source, cancel, &transition)
            .await?;
        let output = self
            .run(job, &analysis.main_class_name, class_files, cancel, &transition)
            .await?;

        parse_output(&output, job.signing_key, job.style)
    }

    async fn validate(&self, job: &ExecutionJob) -> Result<(CodeAnalysisResult, Vec<TestCase>), ExecutorError> {
        let exercise_id = match (job.style, job.exercise_id) {
            (ExecutionStyle::Submit, None) => {
                return Err(ExecutorError::invalid_request("submission names no exercise"));
            }
            (ExecutionStyle::Submit, Some(id)) => Some(id),
            (ExecutionStyle::Dry, _) => None,
        };

        let template = match exercise_id {
            Some(id) => self.exercises.template(id).await?,
            None => None,
        };
        let template = template
            .map(|src| {
                self.parser
                    .parse_source(&src)
                    .map_err(|e| ExecutorError::config_error(format!("exercise template does not parse: {e}")))
            })
            .transpose()?;

        let analysis = self
            .analyzer
            .analyze_with_template(&job.source, job.style, template.as_ref())?;
        if !analysis.passed_validation {
            let reason = analysis.failure.unwrap_or_else(|| "validation failed".to_string());
            return Err(ExecutorError::Validation(reason));
        }
        if analysis.was_synthesized() {
            debug!("job {} had no entry point, one was synthesized", job.execution_id);
        }

        let cases = match exercise_id {
            Some(id) => {
                let document = self.exercises.test_cases(id).await?;
                let cases = parse_test_cases(&document, &analysis.main_class_name)?;
                if cases.len() > self.limits.max_test_cases {
                    return Err(ExecutorError::config_error(format!(
                        "exercise has {} test cases, the limit is {}",
                        cases.len(),
                        self.limits.max_test_cases
                    )));
                }
                cases
            }
            None => Vec::new(),
        };
        Ok((analysis, cases))
    }

    async fn compile(
        &self,
        job: &ExecutionJob,
        class_name: &str,
        source: String,
        cancel: &CancellationToken,
        transition: &(impl Fn(JobStatus) + Sync),
    ) -> Result<BTreeMap<String, String>, ExecutorError> {
        let lease = self.fleet.acquire(job.execution_id, ImageFamily::Compiler, cancel).await?;
        transition(JobStatus::Assigned);
        transition(JobStatus::Compiling);

        let request = CompileRequest {
            job_id: job.execution_id,
            src_files: BTreeMap::from([(class_name.to_string(), STANDARD.encode(source))]),
        };
        let budget = self.timeouts.compilation();
        let reply = guarded(
            &lease,
            budget,
            cancel,
            self.fleet.backend().compile(lease.handle(), request, budget),
        )
        .await?;
        lease.release();

        reply.into_result().map_err(ExecutorError::Compilation)
    }

    async fn run(
        &self,
        job: &ExecutionJob,
        class_name: &str,
        class_files: BTreeMap<String, String>,
        cancel: &CancellationToken,
        transition: &(impl Fn(JobStatus) + Sync),
    ) -> Result<RunOutput, ExecutorError> {
        let lease = self.fleet.acquire(job.execution_id, ImageFamily::Executor, cancel).await?;
        transition(JobStatus::Running);

        let budget = self.timeouts.execution();
        let request = RunRequest {
            job_id: job.execution_id,
            entrypoint: class_name.to_string(),
            class_files,
            timeout_ms: budget.as_millis() as u64,
        };
        // The guest enforces the budget itself; the host bound only catches a guest that stops answering.
        let reply = guarded(
            &lease,
            budget + self.timeouts.query(),
            cancel,
            self.fleet.backend().run(lease.handle(), request, budget),
        )
        .await?;

        let output = reply
            .into_result()
            .map_err(|e| ExecutorError::infrastructure(format!("guest could not start the program: {e}")))?;
        if output.timed_out {
            lease.poison("run exceeded its wall-clock budget");
            return Err(ExecutorError::TimedOut);
        }
        lease.release();
        Ok(output)
    }
}

/// Bounds one guest call by `budget` and `cancel`. A failure that leaves the
/// environment in an unknown state poisons it.
async fn guarded<T, F>(
    lease: &EnvironmentLease,
    budget: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, ExecutorError>
where
    F: Future<Output = Result<T, ExecutorError>>,
{
    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
        result = tokio::time::timeout(budget, call) => result.unwrap_or(Err(ExecutorError::TimedOut)),
    };

    if let Err(e) = &outcome {
        if e.is_infrastructure() || matches!(e, ExecutorError::TimedOut | ExecutorError::Cancelled) {
            lease.poison(&e.to_string());
        }
    }
    outcome
}

/// Starts `config.workers` workers consuming `service`'s request queue.
///
/// Workers stop taking jobs once `shutdown` fires and wait for the ones they
/// hold to settle.
pub async fn spawn_workers(
    handler: Arc<ExecutionHandler>,
    broker: &QueueBroker,
    service: &ServiceData,
    config: &HandlerConfig,
    cancellations: JobCancellations,
    shutdown: CancellationToken,
) -> Result<Vec<JoinHandle<()>>, ExecutorError> {
    broker.declare_service(service).await;
    let responses = broker.queue(&service.response_queue_name).await?;

    let mut workers = Vec::with_capacity(config.workers);
    for index in 0..config.workers {
        let worker = Worker {
            name: format!("{}-{}", service.service_name, index),
            handler: handler.clone(),
            consumer: broker.consumer(&service.request_queue_name, config.prefetch).await?,
            responses: responses.clone(),
            cancellations: cancellations.clone(),
            polling_interval: config.polling_interval(),
        };
        workers.push(tokio::spawn(worker.run(shutdown.clone())));
    }
    info!(
        "started {} {} workers with prefetch {}",
        config.workers, service.service_name, config.prefetch
    );
    Ok(workers)
}

struct Worker {
    name: String,
    handler: Arc<ExecutionHandler>,
    consumer: Consumer,
    responses: Arc<Queue>,
    cancellations: JobCancellations,
    polling_interval: Duration,
}

impl Worker {
    async fn run(self, shutdown: CancellationToken) {
        let this = Arc::new(self);
        let mut jobs = JoinSet::new();

        loop {
            while let Some(finished) = jobs.try_join_next() {
                if let Err(e) = finished {
                    error!("{}: job task failed: {}", this.name, e);
                }
            }

            let delivery = match this.consumer.poll().await {
                Some(delivery) => delivery,
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(this.polling_interval) => {}
                    }
                    continue;
                }
            };
            if shutdown.is_cancelled() {
                delivery.nack(true);
                break;
            }

            let worker = this.clone();
            let shutdown = shutdown.clone();
            jobs.spawn(async move { worker.process(delivery, &shutdown).await });
        }

        debug!("{} draining {} jobs", this.name, jobs.len());
        while let Some(finished) = jobs.join_next().await {
            if let Err(e) = finished {
                error!("{}: job task failed: {}", this.name, e);
            }
        }
    }

    async fn process(&self, delivery: Delivery, shutdown: &CancellationToken) {
        let job: ExecutionJob = match delivery.decode() {
            Ok(job) => job,
            Err(e) => {
                warn!("{}: rejecting undecodable job: {}", self.name, e);
                delivery.nack(false);
                return;
            }
        };

        let id = job.execution_id;
        debug!("{} picked up job {}", self.name, id);
        let publish = |update: JobUpdate| {
            if let Err(e) = self.responses.send(&update) {
                warn!("could not publish {:?} for job {}: {}", update.status, id, e);
            }
        };

        let cancel = self.cancellations.register(id, shutdown);
        let result = self
            .handler
            .handle(&job, &cancel, |status| publish(JobUpdate::status(id, status)))
            .await;
        self.cancellations.remove(id);

        let update = JobUpdate::finished(id, result);
        match (&update.status, &update.fault) {
            (_, Some(fault)) => error!("job {} failed on infrastructure: {}", id, fault),
            (status, None) => info!("job {} is {:?}", id, status),
        }
        publish(update);
        delivery.ack();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheTargetData;
    use crate::pooler::FilesystemPooler;
    use crate::test_utils::{CountingImageBuilder, ScriptedBackend};
    use crate::testcases::InMemoryExerciseStore;
    use duckjudge_types::{DryExecuteRequest, SubmitExecuteRequest};

    const HELLO: &str = "public class Main { public static void main(String[] a) { System.out.println(1 + 1); } }";

    fn config() -> ExecutorConfig {
        let mut config = ExecutorConfig::default();
        config.timeouts.resource_request_secs = 1;
        config.timeouts.execution_secs = 1;
        config.timeouts.query_secs = 1;
        config.environments.reaper_interval_secs = 3600;
        config.pool.polling_interval_secs = 3600;
        config.pool.compiler = CacheTargetData { min: 0, current: 0, max: 2 };
        config.pool.executor = CacheTargetData { min: 0, current: 0, max: 2 };
        config
    }

    fn handler(config: &ExecutorConfig, backend: &ScriptedBackend, exercises: InMemoryExerciseStore) -> ExecutionHandler {
        let shutdown = CancellationToken::new();
        let (pooler, _) = FilesystemPooler::spawn(&config.pool, Arc::new(CountingImageBuilder::new()), shutdown.clone());
        let (fleet, _) = FleetManager::spawn(config, Arc::new(backend.clone()), pooler, shutdown);
        ExecutionHandler::new(config, fleet, Arc::new(exercises))
    }

    fn dry_job(source: &str) -> ExecutionJob {
        let request = ExecuteRequest::Dry(DryExecuteRequest {
            code_b64: STANDARD.encode(source),
        });
        ExecutionJob::from_request(&request, &LimitsConfig::default()).unwrap()
    }

    #[test]
    fn test_job_rejects_bad_payloads() {
        let limits = LimitsConfig {
            max_source_bytes: 8,
            ..LimitsConfig::default()
        };
        let not_base64 = ExecuteRequest::Dry(DryExecuteRequest {
            code_b64: "***".to_string(),
        });
        let too_big = ExecuteRequest::Dry(DryExecuteRequest {
            code_b64: STANDARD.encode("class Main {}"),
        });
        let not_utf8 = ExecuteRequest::Dry(DryExecuteRequest {
            code_b64: STANDARD.encode([0xff, 0xfe]),
        });
        for request in [not_base64, too_big, not_utf8] {
            let err = ExecutionJob::from_request(&request, &limits).unwrap_err();
            assert!(matches!(err, ExecutorError::InvalidRequest(_)), "{err}");
        }
    }

    #[test]
    fn test_submission_seeds_helpers_with_exercise() {
        let exercise_id = Uuid::new_v4();
        let request = ExecuteRequest::Submit(SubmitExecuteRequest {
            code_b64: STANDARD.encode(HELLO),
            exercise_id,
        });
        let job = ExecutionJob::from_request(&request, &LimitsConfig::default()).unwrap();
        assert_eq!(job.prefix_seed(), exercise_id);
        assert_eq!(job.language, "java");
        assert!(job.fenced_source().contains(&job.signing_key.to_string()));
        assert_ne!(dry_job(HELLO).prefix_seed(), exercise_id);
    }

    #[test]
    fn test_finished_updates_classify_errors() {
        let id = Uuid::new_v4();
        let fault = JobUpdate::finished(id, Err(ExecutorError::infrastructure("warden down")));
        assert_eq!(fault.status, JobStatus::Failed);
        assert!(fault.response.is_none());
        assert!(fault.fault.unwrap().contains("warden down"));

        let timeout = JobUpdate::finished(id, Err(ExecutorError::TimedOut));
        assert_eq!(timeout.status, JobStatus::TimedOut);
        assert!(timeout.response.unwrap().is_error());

        let compile = JobUpdate::finished(id, Err(ExecutorError::Compilation("';' expected".into())));
        assert_eq!(compile.status, JobStatus::Failed);
        assert!(compile.fault.is_none());
    }

    #[test]
    fn test_cancellation_before_start_still_lands() {
        let cancellations = JobCancellations::new();
        let parent = CancellationToken::new();
        let early = Uuid::new_v4();

        cancellations.enqueue(early);
        cancellations.cancel(early);
        assert_eq!(cancellations.pending_cancellations(), 1);
        assert!(cancellations.register(early, &parent).is_cancelled());
        assert_eq!(cancellations.pending_cancellations(), 0);

        let late = Uuid::new_v4();
        let token = cancellations.register(late, &parent);
        assert!(!token.is_cancelled());
        cancellations.cancel(late);
        assert!(token.is_cancelled());

        cancellations.remove(early);
        cancellations.remove(late);
        assert_eq!(cancellations.running(), 0);
    }

    #[test]
    fn test_cancelling_a_finished_job_leaves_nothing_behind() {
        let cancellations = JobCancellations::new();
        let parent = CancellationToken::new();
        let done = Uuid::new_v4();

        cancellations.enqueue(done);
        cancellations.register(done, &parent);
        cancellations.remove(done);
        cancellations.cancel(done);
        cancellations.cancel(Uuid::new_v4());

        assert_eq!(cancellations.pending_cancellations(), 0);
        assert_eq!(cancellations.running(), 0);
        assert!(!cancellations.register(done, &parent).is_cancelled());
    }

    #[tokio::test]
    async fn test_dry_run_reports_every_phase() {
        let config = config();
        let backend = ScriptedBackend::new();
        backend.on_run(|source| {
            let out = if source.contains("println(1 + 1)") { "2\n" } else { "" };
            ScriptedBackend::output(out)
        });
        let handler = handler(&config, &backend, InMemoryExerciseStore::new());

        let seen = Mutex::new(Vec::new());
        let response = handler
            .handle(&dry_job(HELLO), &CancellationToken::new(), |s| seen.lock().unwrap().push(s))
            .await
            .unwrap();

        assert_eq!(response.std_output(), Some("2"));
        assert_eq!(
            seen.into_inner().unwrap(),
            vec![
                JobStatus::Validating,
                JobStatus::Assigned,
                JobStatus::Compiling,
                JobStatus::Running
            ]
        );
    }

    #[tokio::test]
    async fn test_compile_errors_are_scrubbed() {
        let config = config();
        let backend = ScriptedBackend::new();
        backend.fail_compilation(Some(
            "/app/client-src/3f2b1c9e-1111-4222-8333-444455556666/Main.java:1: error: ';' expected",
        ));
        let handler = handler(&config, &backend, InMemoryExerciseStore::new());

        let err = handler
            .handle(&dry_job(HELLO), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Compilation(_)));
        assert_eq!(err.user_message(), "Main.java:1: error: ';' expected");
    }

    #[tokio::test]
    async fn test_syntax_errors_never_reach_the_fleet() {
        let config = config();
        let backend = ScriptedBackend::new();
        let handler = handler(&config, &backend, InMemoryExerciseStore::new());

        let err = handler
            .handle(&dry_job("public class {"), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Syntax(_)));
        assert!(backend.launched().is_empty());
    }

    #[tokio::test]
    async fn test_hung_run_times_out_and_releases() {
        let config = config();
        let backend = ScriptedBackend::new();
        backend.delay_runs(Duration::from_secs(30));
        let handler = handler(&config, &backend, InMemoryExerciseStore::new());

        let err = handler
            .handle(&dry_job(HELLO), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::TimedOut));
        for env in handler.fleet().snapshot() {
            assert_eq!(handler.fleet().active_reservations(env.vm_id), 0);
        }
    }

    #[tokio::test]
    async fn test_cancelled_job_releases_its_lease() {
        let config = config();
        let backend = ScriptedBackend::new();
        backend.delay_runs(Duration::from_secs(30));
        let handler = Arc::new(handler(&config, &backend, InMemoryExerciseStore::new()));

        let cancel = CancellationToken::new();
        let task = {
            let handler = handler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { handler.handle(&dry_job(HELLO), &cancel, |_| {}).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ExecutorError::Cancelled));
        assert!(handler.fleet().snapshot().iter().all(|e| e.active_jobs == 0));
    }

    #[tokio::test]
    async fn test_submission_without_test_cases_is_invalid() {
        let config = config();
        let backend = ScriptedBackend::new();
        let handler = handler(&config, &backend, InMemoryExerciseStore::new());
        let request = ExecuteRequest::Submit(SubmitExecuteRequest {
            code_b64: STANDARD.encode(HELLO),
            exercise_id: Uuid::new_v4(),
        });
        let job = ExecutionJob::from_request(&request, &LimitsConfig::default()).unwrap();

        let err = handler.handle(&job, &CancellationToken::new(), |_| {}).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidRequest(_)));
    }
}
