// src/service.rs
//! Front door of the execution pipeline.
//!
//! `ExecutorService` turns an [`ExecuteRequest`] into a job, routes it to the
//! service that owns its style (dry runs to `executor`, submissions to
//! `validator`) and waits for the matching terminal update on the response
//! queue.

use duckjudge_types::{ExecuteRequest, ExecuteResponse, ExecutionStyle};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ExecutorConfig, LimitsConfig};
use crate::errors::ExecutorError;
use crate::fleet::FleetManager;
use crate::handler::{spawn_workers, ExecutionHandler, ExecutionJob, JobCancellations, JobUpdate};
use crate::queue::{Consumer, QueueBroker, ServiceData};
use crate::testcases::ExerciseStore;

type PendingJobs = Arc<Mutex<HashMap<Uuid, oneshot::Sender<JobUpdate>>>>;

/// Updates the correlator may hold unsettled at once.
const RESPONSE_PREFETCH: usize = 64;

#[derive(Clone)]
pub struct ExecutorService {
    broker: QueueBroker,
    executor: ServiceData,
    validator: ServiceData,
    pending: PendingJobs,
    cancellations: JobCancellations,
    fleet: FleetManager,
    limits: LimitsConfig,
    deadline: Duration,
}

impl ExecutorService {
    /// Declares both services, starts their worker pools and the response
    /// correlators. Everything stops when `shutdown` fires.
    pub async fn start(
        config: &ExecutorConfig,
        fleet: FleetManager,
        exercises: Arc<dyn ExerciseStore>,
        shutdown: CancellationToken,
    ) -> Result<(Self, Vec<JoinHandle<()>>), ExecutorError> {
        let service = Self {
            broker: QueueBroker::new(config.handler.queue_capacity),
            executor: ServiceData::executor(),
            validator: ServiceData::validator(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            cancellations: JobCancellations::new(),
            fleet: fleet.clone(),
            limits: config.limits.clone(),
            deadline: config.timeouts.job_deadline(),
        };

        let handler = Arc::new(ExecutionHandler::new(config, fleet, exercises));
        let mut tasks = Vec::new();
        for data in [&service.executor, &service.validator] {
            tasks.extend(
                spawn_workers(
                    handler.clone(),
                    &service.broker,
                    data,
                    &config.handler,
                    service.cancellations.clone(),
                    shutdown.clone(),
                )
                .await?,
            );
            let responses = service
                .broker
                .consumer(&data.response_queue_name, RESPONSE_PREFETCH)
                .await?;
            tasks.push(tokio::spawn(correlate(responses, service.pending.clone(), shutdown.clone())));
        }

        info!("executor service started, job deadline {:?}", service.deadline);
        Ok((service, tasks))
    }

    /// Runs one request to completion.
    ///
    /// Recoverable failures come back as `Ok(ExecuteResponse::Error(..))`.
    /// `Err` means the request was never accepted, the deadline passed, or
    /// the sandbox itself failed.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, ExecutorError> {
        let job = ExecutionJob::from_request(&request, &self.limits)?;
        let id = job.execution_id;
        let service = match job.style {
            ExecutionStyle::Dry => &self.executor,
            ExecutionStyle::Submit => &self.validator,
        };

        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);
        let mut guard = PendingGuard {
            id,
            pending: self.pending.clone(),
            cancellations: self.cancellations.clone(),
            cancel_on_drop: false,
        };

        self.cancellations.enqueue(id);
        self.broker.publish(&service.request_queue_name, &job).await?;
        guard.cancel_on_drop = true;
        info!("job {} is Queued for {}", id, service.service_name);

        let update = match tokio::time::timeout(self.deadline, rx).await {
            Ok(Ok(update)) => update,
            Ok(Err(_)) => return Err(ExecutorError::infrastructure("job correlator stopped")),
            Err(_) => {
                warn!("job {} missed its deadline of {:?}", id, self.deadline);
                return Err(ExecutorError::TimedOut);
            }
        };
        guard.cancel_on_drop = false;

        match (update.response, update.fault) {
            (_, Some(fault)) => Err(ExecutorError::InfrastructureFault(fault)),
            (Some(response), None) => Ok(response),
            (None, None) => Err(ExecutorError::infrastructure(format!(
                "job ended {:?} without a response",
                update.status
            ))),
        }
    }

    /// Requests awaiting their terminal update.
    pub fn in_flight(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn fleet(&self) -> &FleetManager {
        &self.fleet
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<JobUpdate>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Forgets a pending request when its caller goes away, and cancels the job
/// if it was already queued.
struct PendingGuard {
    id: Uuid,
    pending: PendingJobs,
    cancellations: JobCancellations,
    cancel_on_drop: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id)
            .is_some();
        if !self.cancel_on_drop {
            // Never published, or already answered.
            self.cancellations.remove(self.id);
        } else if removed {
            debug!("caller of job {} went away, cancelling it", self.id);
            self.cancellations.cancel(self.id);
        }
    }
}

async fn correlate(responses: Consumer, pending: PendingJobs, shutdown: CancellationToken) {
    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            delivery = responses.next() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };

        let update: JobUpdate = match delivery.decode() {
            Ok(update) => update,
            Err(e) => {
                warn!("dropping undecodable job update: {}", e);
                delivery.nack(false);
                continue;
            }
        };
        delivery.ack();

        if !update.status.is_terminal() {
            debug!("job {} reported {:?}", update.execution_id, update.status);
            continue;
        }
        let waiter = pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&update.execution_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(update);
            }
            None => debug!("no caller waits for job {} any more", update.execution_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheTargetData;
    use crate::pooler::FilesystemPooler;
    use crate::test_utils::{CountingImageBuilder, ScriptedBackend};
    use crate::testcases::InMemoryExerciseStore;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use duckjudge_types::DryExecuteRequest;

    async fn start(backend: &ScriptedBackend) -> (ExecutorService, CancellationToken) {
        let mut config = ExecutorConfig::default();
        config.timeouts.execution_secs = 1;
        config.timeouts.query_secs = 1;
        config.handler.polling_interval_ms = 10;
        config.pool.polling_interval_secs = 3600;
        config.pool.compiler = CacheTargetData { min: 0, current: 0, max: 2 };
        config.pool.executor = CacheTargetData { min: 0, current: 0, max: 2 };

        let shutdown = CancellationToken::new();
        let (pooler, _) = FilesystemPooler::spawn(&config.pool, Arc::new(CountingImageBuilder::new()), shutdown.clone());
        let (fleet, _) = FleetManager::spawn(&config, Arc::new(backend.clone()), pooler, shutdown.clone());
        let (service, _) = ExecutorService::start(&config, fleet, Arc::new(InMemoryExerciseStore::new()), shutdown.clone())
            .await
            .unwrap();
        (service, shutdown)
    }

    fn dry(source: &str) -> ExecuteRequest {
        ExecuteRequest::Dry(DryExecuteRequest {
            code_b64: STANDARD.encode(source),
        })
    }

    #[tokio::test]
    async fn test_dry_run_round_trips_through_queues() {
        let backend = ScriptedBackend::new();
        backend.on_run(|_| ScriptedBackend::output("hello\n"));
        let (service, shutdown) = start(&backend).await;

        let response = service
            .execute(dry("public class Main { public static void main(String[] a) {} }"))
            .await
            .unwrap();
        assert_eq!(response.std_output(), Some("hello"));
        assert_eq!(service.in_flight(), 0);
        assert_eq!(service.cancellations.running(), 0);
        assert_eq!(service.cancellations.pending_cancellations(), 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_learner_errors_are_responses() {
        let backend = ScriptedBackend::new();
        let (service, shutdown) = start(&backend).await;

        let response = service.execute(dry("class {")).await.unwrap();
        let ExecuteResponse::Error(body) = response else {
            panic!("expected an error response");
        };
        assert_eq!(body.status_code, 422);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_infrastructure_faults_propagate() {
        let backend = ScriptedBackend::new();
        backend.fail_launches(Some("warden unreachable"));
        let (service, shutdown) = start(&backend).await;

        let err = service
            .execute(dry("public class Main { public static void main(String[] a) {} }"))
            .await
            .unwrap_err();
        assert!(err.is_infrastructure());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_bad_payload_is_rejected_before_queueing() {
        let backend = ScriptedBackend::new();
        let (service, shutdown) = start(&backend).await;

        let err = service
            .execute(ExecuteRequest::Dry(DryExecuteRequest {
                code_b64: "not base64!".to_string(),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidRequest(_)));
        assert_eq!(service.in_flight(), 0);
        assert_eq!(service.cancellations.pending_cancellations(), 0);
        shutdown.cancel();
    }
}
