// src/queue.rs
//! Named in-process queues with per-consumer prefetch limits.
//!
//! A delivery holds one prefetch permit until it is acknowledged or
//! rejected. Dropping an unsettled delivery puts its payload back on the
//! queue, the way a broker redelivers messages of a dead consumer.

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, RwLock, Semaphore};

use crate::errors::ExecutorError;

pub const EXECUTOR_SERVICE: &str = "executor";
pub const VALIDATOR_SERVICE: &str = "validator";

/// Queue names of one logical service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceData {
    pub service_name: String,
    pub request_queue_name: String,
    pub response_queue_name: String,
}

impl ServiceData {
    pub fn new(service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        Self {
            request_queue_name: format!("{}-requests", service_name),
            response_queue_name: format!("{}-responses", service_name),
            service_name,
        }
    }

    /// Serves dry runs.
    pub fn executor() -> Self {
        Self::new(EXECUTOR_SERVICE)
    }

    /// Serves graded submissions.
    pub fn validator() -> Self {
        Self::new(VALIDATOR_SERVICE)
    }
}

/// A bounded FIFO of JSON payloads shared by any number of consumers.
#[derive(Debug)]
pub struct Queue {
    name: String,
    tx: mpsc::Sender<Vec<u8>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl Queue {
    fn new(name: String, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name,
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Messages waiting to be delivered.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Serializes and enqueues `message` without waiting for room.
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), ExecutorError> {
        let payload = serde_json::to_vec(message)?;
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutorError::exhausted(format!("{} is full", self.name))),
            Err(TrySendError::Closed(_)) => Err(ExecutorError::infrastructure(format!("{} is closed", self.name))),
        }
    }

    fn requeue(&self, payload: Vec<u8>) {
        if let Err(e) = self.tx.try_send(payload) {
            warn!("dropping redelivery on {}: {}", self.name, e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueBroker {
    queues: Arc<RwLock<HashMap<String, Arc<Queue>>>>,
    capacity: usize,
}

impl QueueBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Returns the queue called `name`, creating it on first use.
    pub async fn declare(&self, name: &str) -> Arc<Queue> {
        if let Some(queue) = self.queues.read().await.get(name) {
            return queue.clone();
        }
        let mut queues = self.queues.write().await;
        queues
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("declared queue {}", name);
                Arc::new(Queue::new(name.to_string(), self.capacity))
            })
            .clone()
    }

    pub async fn declare_service(&self, service: &ServiceData) {
        self.declare(&service.request_queue_name).await;
        self.declare(&service.response_queue_name).await;
    }

    async fn existing(&self, name: &str) -> Result<Arc<Queue>, ExecutorError> {
        self.queues
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutorError::config_error(format!("queue {} was never declared", name)))
    }

    /// Serializes and enqueues `message`; fails when the queue is full.
    pub async fn publish<T: Serialize>(&self, queue_name: &str, message: &T) -> Result<(), ExecutorError> {
        self.existing(queue_name).await?.send(message)
    }

    pub async fn queue(&self, queue_name: &str) -> Result<Arc<Queue>, ExecutorError> {
        self.existing(queue_name).await
    }

    pub async fn consumer(&self, queue_name: &str, prefetch: usize) -> Result<Consumer, ExecutorError> {
        let limit = prefetch.max(1);
        Ok(Consumer {
            queue: self.existing(queue_name).await?,
            prefetch: Arc::new(Semaphore::new(limit)),
            limit,
        })
    }
}

/// Takes deliveries from one queue, at most `prefetch` unsettled at a time.
#[derive(Debug, Clone)]
pub struct Consumer {
    queue: Arc<Queue>,
    prefetch: Arc<Semaphore>,
    limit: usize,
}

impl Consumer {
    /// Waits for the next message.
    pub async fn next(&self) -> Option<Delivery> {
        let permit = self.prefetch.clone().acquire_owned().await.ok()?;
        let payload = self.queue.rx.lock().await.recv().await?;
        Some(self.delivery(payload, permit))
    }

    /// Returns a message if one is waiting and prefetch allows it.
    pub async fn poll(&self) -> Option<Delivery> {
        let permit = self.prefetch.clone().try_acquire_owned().ok()?;
        let payload = self.queue.rx.lock().await.try_recv().ok()?;
        Some(self.delivery(payload, permit))
    }

    /// Deliveries taken but not yet settled.
    pub fn unacked(&self) -> usize {
        self.limit.saturating_sub(self.prefetch.available_permits())
    }

    fn delivery(&self, payload: Vec<u8>, permit: OwnedSemaphorePermit) -> Delivery {
        Delivery {
            payload: Some(payload),
            queue: self.queue.clone(),
            _permit: permit,
        }
    }
}

#[derive(Debug)]
pub struct Delivery {
    payload: Option<Vec<u8>>,
    queue: Arc<Queue>,
    _permit: OwnedSemaphorePermit,
}

impl Delivery {
    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ExecutorError> {
        Ok(serde_json::from_slice(self.payload())?)
    }

    pub fn ack(mut self) {
        self.payload = None;
    }

    /// Rejects the message, optionally putting it back on the queue.
    pub fn nack(mut self, requeue: bool) {
        if let Some(payload) = self.payload.take() {
            if requeue {
                self.queue.requeue(payload);
            } else {
                warn!("discarding rejected message on {}", self.queue.name);
            }
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(payload) = self.payload.take() {
            debug!("unsettled delivery returned to {}", self.queue.name);
            self.queue.requeue(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_queue_names() {
        let service = ServiceData::validator();
        assert_eq!(service.service_name, "validator");
        assert_eq!(service.request_queue_name, "validator-requests");
        assert_eq!(service.response_queue_name, "validator-responses");
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_queue_fails() {
        let broker = QueueBroker::new(4);
        let err = broker.publish("nowhere", &json!({})).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Config(_)));
    }

    #[tokio::test]
    async fn test_prefetch_bounds_unacked_deliveries() {
        let broker = QueueBroker::new(8);
        broker.declare("jobs").await;
        for i in 0..3 {
            broker.publish("jobs", &json!({ "n": i })).await.unwrap();
        }

        let consumer = broker.consumer("jobs", 2).await.unwrap();
        let first = consumer.poll().await.unwrap();
        let second = consumer.poll().await.unwrap();
        assert!(consumer.poll().await.is_none());
        assert_eq!(consumer.unacked(), 2);

        first.ack();
        let third = consumer.poll().await.unwrap();
        assert_eq!(third.decode::<serde_json::Value>().unwrap()["n"], 2);
        drop(second);
        drop(third);
    }

    #[tokio::test]
    async fn test_dropped_delivery_is_redelivered() {
        let broker = QueueBroker::new(8);
        let queue = broker.declare("jobs").await;
        broker.publish("jobs", &json!("payload")).await.unwrap();

        let consumer = broker.consumer("jobs", 1).await.unwrap();
        drop(consumer.poll().await.unwrap());
        assert_eq!(queue.depth(), 1);

        consumer.poll().await.unwrap().nack(false);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_is_resource_exhausted() {
        let broker = QueueBroker::new(1);
        broker.declare("jobs").await;
        broker.publish("jobs", &1).await.unwrap();
        let err = broker.publish("jobs", &2).await.unwrap_err();
        assert!(matches!(err, ExecutorError::ResourceExhausted(_)));
    }
}
