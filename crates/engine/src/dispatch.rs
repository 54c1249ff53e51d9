//! Dispatch trigger plumbing.
//!
//! Intake pushes one delivery id per committed pending row onto a
//! [`DispatchQueue`]; a [`WorkerPool`] pops ids and runs one orchestration per
//! id with bounded concurrency. Triggers are at-least-once: the orchestrator
//! claims the row before working on it, so a second trigger for the same id is
//! a no-op whether the first is still running or already done.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use herald_common::types::Channel;

use crate::error::{EngineError, EngineResult};
use crate::orchestrator::Orchestrator;
use crate::repository::DeliveryRepository;

#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Short name of the queue backend, for diagnostics.
    fn backend(&self) -> &'static str;

    async fn push(&self, delivery_id: Uuid) -> EngineResult<()>;

    /// Wait up to `timeout` for the next delivery id.
    async fn pop(&self, timeout: Duration) -> EngineResult<Option<Uuid>>;
}

/// In-process queue. Triggers do not survive a restart; startup recovery
/// re-enqueues whatever is still pending.
pub struct MemoryQueue {
    sender: mpsc::UnboundedSender<Uuid>,
    receiver: Mutex<mpsc::UnboundedReceiver<Uuid>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchQueue for MemoryQueue {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn push(&self, delivery_id: Uuid) -> EngineResult<()> {
        self.sender
            .send(delivery_id)
            .map_err(|_| EngineError::Queue("dispatch queue closed".to_string()))
    }

    async fn pop(&self, timeout: Duration) -> EngineResult<Option<Uuid>> {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(delivery_id)) => Ok(Some(delivery_id)),
            Ok(None) => Err(EngineError::Queue("dispatch queue closed".to_string())),
            Err(_) => Ok(None),
        }
    }
}

/// Redis list queue (`LPUSH` / `BRPOP`), shared between the API and workers.
///
/// `BRPOP` blocks the multiplexed connection it runs on, so the consuming side
/// should own its connection manager.
pub struct RedisQueue {
    redis: ConnectionManager,
    key: String,
}

impl RedisQueue {
    pub fn new(redis: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            redis,
            key: key.into(),
        }
    }
}

#[async_trait]
impl DispatchQueue for RedisQueue {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn push(&self, delivery_id: Uuid) -> EngineResult<()> {
        let mut redis = self.redis.clone();
        redis
            .lpush::<_, _, ()>(&self.key, delivery_id.to_string())
            .await?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> EngineResult<Option<Uuid>> {
        let mut redis = self.redis.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.key)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut redis)
            .await?;

        match popped {
            Some((_, raw)) => Uuid::parse_str(&raw)
                .map(Some)
                .map_err(|_| EngineError::Queue(format!("invalid delivery id on queue: {}", raw))),
            None => Ok(None),
        }
    }
}

/// Producer side of the dispatch queue.
#[derive(Clone)]
pub struct DispatchTrigger {
    queue: Arc<dyn DispatchQueue>,
}

impl DispatchTrigger {
    pub fn new(queue: Arc<dyn DispatchQueue>) -> Self {
        Self { queue }
    }

    pub fn backend(&self) -> &'static str {
        self.queue.backend()
    }

    /// Schedule asynchronous processing of a committed pending delivery.
    ///
    /// Must only be called after the transaction inserting the row committed.
    pub async fn schedule(&self, delivery_id: Uuid, channel: Channel) -> EngineResult<()> {
        self.queue.push(delivery_id).await?;
        tracing::debug!(delivery_id = %delivery_id, channel = %channel, "Delivery scheduled");
        Ok(())
    }
}

/// Bounded pool of orchestrations fed from a dispatch queue.
pub struct WorkerPool {
    queue: Arc<dyn DispatchQueue>,
    orchestrator: Arc<Orchestrator>,
    workers: usize,
    poll_timeout: Duration,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn DispatchQueue>, orchestrator: Arc<Orchestrator>, workers: usize) -> Self {
        Self {
            queue,
            orchestrator,
            workers: workers.max(1),
            poll_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Re-enqueue unclaimed deliveries (triggers lost between commit and
    /// push) and deliveries whose claim has expired (orchestrations that died
    /// mid-way). Returns how many were enqueued.
    ///
    /// An id that is still on the queue gets a second trigger; whichever runs
    /// second loses the claim and does nothing.
    pub async fn recover(&self, repository: &dyn DeliveryRepository) -> EngineResult<usize> {
        let mut ids = repository.unclaimed_ids().await?;
        ids.extend(repository.stale_claim_ids(self.orchestrator.claim_lease()).await?);
        for delivery_id in &ids {
            self.queue.push(*delivery_id).await?;
        }
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Re-enqueued pending deliveries");
        }
        Ok(ids.len())
    }

    /// Re-enqueue deliveries whose claim has expired.
    async fn requeue_stale(&self) {
        let lease = self.orchestrator.claim_lease();
        let stale = match self.orchestrator.repository.stale_claim_ids(lease).await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::error!(error = %e, "Failed to look up stale claims");
                return;
            }
        };
        for delivery_id in stale {
            match self.queue.push(delivery_id).await {
                Ok(()) => tracing::warn!(delivery_id = %delivery_id, "Re-enqueued abandoned delivery"),
                Err(e) => tracing::error!(delivery_id = %delivery_id, error = %e, "Failed to re-enqueue"),
            }
        }
    }

    /// Consume the queue until `shutdown` flips to `true` (or its sender is
    /// dropped), then wait for in-flight orchestrations to finish.
    ///
    /// Once per claim lease the pool also re-enqueues deliveries whose claim
    /// expired while the process was running.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> EngineResult<()> {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut in_flight = JoinSet::new();
        let lease = self.orchestrator.claim_lease().max(Duration::from_millis(1));
        let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + lease, lease);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(workers = self.workers, "Dispatch worker pool started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => permit
                    .map_err(|_| EngineError::Queue("worker pool closed".to_string()))?,
                _ = sweep.tick() => {
                    self.requeue_stale().await;
                    continue;
                }
                _ = shutdown.changed() => break,
            };

            match self.queue.pop(self.poll_timeout).await {
                Ok(Some(delivery_id)) => {
                    let orchestrator = self.orchestrator.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        process(&orchestrator, delivery_id).await;
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to pop dispatch queue");
                    tokio::time::sleep(self.poll_timeout).await;
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Orchestration task panicked");
                }
            }
        }

        tracing::info!(in_flight = in_flight.len(), "Dispatch worker pool draining");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Orchestration task panicked");
            }
        }
        tracing::info!("Dispatch worker pool stopped");
        Ok(())
    }
}

async fn process(orchestrator: &Orchestrator, delivery_id: Uuid) {
    match orchestrator.resolve_and_deliver(delivery_id).await {
        Ok(outcome) => {
            tracing::info!(
                delivery_id = %delivery_id,
                message_id = %outcome.message_id,
                archived = outcome.archived.len(),
                "Delivery resolved"
            );
        }
        // Already logged; a stale or duplicate trigger is not worth more noise.
        Err(EngineError::DeliveryNotFound(_) | EngineError::AlreadyClaimed(_)) => {}
        Err(e) => {
            tracing::error!(delivery_id = %delivery_id, error = %e, "Orchestration failed");
        }
    }
}
