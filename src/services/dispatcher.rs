//! Background fan-out for hub broadcasts and notifications
//!
//! Architecture:
//! - Two pools of workers, each worker draining its own bounded MPSC queue
//! - Broadcast pool: jobs for a conversation always land on the same worker, so
//!   a channel has exactly one dispatch path and keeps FIFO order
//! - Notification pool: sharded by recipient; a slow notifier only backs up
//!   this pool, never live frames
//! - Submission never waits: a full queue rejects the job
//! - Graceful shutdown drains queued jobs before the workers exit

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FanoutConfig;
use crate::metrics;
use crate::services::notification_producer::{NotificationRequest, Notifier};
use crate::websocket::{BroadcastHub, HubEvent};

#[derive(Debug)]
pub enum FanoutJob {
    Broadcast {
        conversation_id: Uuid,
        event: HubEvent,
        exclude_user: Option<Uuid>,
    },
    Notify(NotificationRequest),
    Shutdown,
}

impl FanoutJob {
    fn kind(&self) -> &'static str {
        match self {
            FanoutJob::Broadcast { .. } => "broadcast",
            FanoutJob::Notify(_) => "notify",
            FanoutJob::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("fan-out queue is full")]
    QueueFull,
    #[error("fan-out dispatcher is stopped")]
    Closed,
}

struct Shared {
    broadcast_queues: Vec<mpsc::Sender<FanoutJob>>,
    notify_queues: Vec<mpsc::Sender<FanoutJob>>,
    closed: AtomicBool,
}

impl Shared {
    fn all_queues(&self) -> impl Iterator<Item = &mpsc::Sender<FanoutJob>> {
        self.broadcast_queues.iter().chain(self.notify_queues.iter())
    }
}

/// Cloneable submission handle.
#[derive(Clone)]
pub struct FanoutDispatcher {
    shared: Arc<Shared>,
}

/// Worker tasks, joined on shutdown.
pub struct DispatcherHandle {
    workers: Vec<JoinHandle<()>>,
}

fn shard_of(key: Uuid, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

impl FanoutDispatcher {
    /// Spawns the workers on the current runtime.
    pub fn start(
        hub: BroadcastHub,
        notifier: Arc<dyn Notifier>,
        config: FanoutConfig,
    ) -> (Self, DispatcherHandle) {
        let broadcast_count = config.workers.max(1);
        let notify_count = config.notify_workers.max(1);
        let capacity = config.queue_capacity.max(1);
        let mut broadcast_queues = Vec::with_capacity(broadcast_count);
        let mut notify_queues = Vec::with_capacity(notify_count);
        let mut workers = Vec::with_capacity(broadcast_count + notify_count);

        for index in 0..broadcast_count + notify_count {
            let (sender, receiver) = mpsc::channel(capacity);
            if index < broadcast_count {
                broadcast_queues.push(sender);
            } else {
                notify_queues.push(sender);
            }
            workers.push(spawn_worker(
                index,
                receiver,
                hub.clone(),
                Arc::clone(&notifier),
                config.notify_timeout,
            ));
        }

        info!(
            broadcast_workers = broadcast_count,
            notify_workers = notify_count,
            capacity,
            "fan-out dispatcher started"
        );

        let dispatcher = Self {
            shared: Arc::new(Shared {
                broadcast_queues,
                notify_queues,
                closed: AtomicBool::new(false),
            }),
        };
        (dispatcher, DispatcherHandle { workers })
    }

    pub fn broadcast(
        &self,
        conversation_id: Uuid,
        event: HubEvent,
        exclude_user: Option<Uuid>,
    ) -> Result<(), DispatchError> {
        self.submit(
            conversation_id,
            FanoutJob::Broadcast {
                conversation_id,
                event,
                exclude_user,
            },
        )
    }

    pub fn notify(&self, request: NotificationRequest) -> Result<(), DispatchError> {
        let key = request.recipient_id;
        self.submit(key, FanoutJob::Notify(request))
    }

    fn submit(&self, key: Uuid, job: FanoutJob) -> Result<(), DispatchError> {
        let kind = job.kind();
        if self.shared.closed.load(Ordering::Acquire) {
            metrics::FANOUT_JOBS_REJECTED.with_label_values(&[kind]).inc();
            return Err(DispatchError::Closed);
        }

        let pool = match job {
            FanoutJob::Notify(_) => &self.shared.notify_queues,
            _ => &self.shared.broadcast_queues,
        };
        let queue = &pool[shard_of(key, pool.len())];
        match queue.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                metrics::FANOUT_JOBS_REJECTED.with_label_values(&[kind]).inc();
                warn!(kind, "fan-out queue full, job rejected");
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                metrics::FANOUT_JOBS_REJECTED.with_label_values(&[kind]).inc();
                Err(DispatchError::Closed)
            }
        }
    }

    /// Stops accepting jobs, lets every worker drain its queue, then joins them.
    pub async fn shutdown(&self, handle: DispatcherHandle) {
        self.shared.closed.store(true, Ordering::Release);
        for queue in self.shared.all_queues() {
            // Waits for queue space; the sentinel is processed after queued jobs.
            let _ = queue.send(FanoutJob::Shutdown).await;
        }
        for worker in handle.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "fan-out worker ended abnormally");
            }
        }
        info!("fan-out dispatcher stopped");
    }
}

fn spawn_worker(
    index: usize,
    mut receiver: mpsc::Receiver<FanoutJob>,
    hub: BroadcastHub,
    notifier: Arc<dyn Notifier>,
    notify_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(worker = index, "fan-out worker started");

        while let Some(job) = receiver.recv().await {
            match job {
                FanoutJob::Broadcast {
                    conversation_id,
                    event,
                    exclude_user,
                } => {
                    let report = hub.broadcast(conversation_id, &event, exclude_user);
                    debug!(
                        worker = index,
                        conversation_id = %conversation_id,
                        event = event.event_type(),
                        delivered = report.delivered,
                        dropped = report.dropped,
                        "broadcast dispatched"
                    );
                }
                FanoutJob::Notify(request) => {
                    match tokio::time::timeout(notify_timeout, notifier.notify(&request)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            metrics::NOTIFICATIONS_FAILED.inc();
                            warn!(
                                recipient_id = %request.recipient_id,
                                error = %e,
                                "notification dispatch failed"
                            );
                        }
                        Err(_) => {
                            metrics::NOTIFICATIONS_FAILED.inc();
                            warn!(recipient_id = %request.recipient_id, "notification dispatch timed out");
                        }
                    }
                }
                FanoutJob::Shutdown => break,
            }
        }

        debug!(worker = index, "fan-out worker stopped");
    })
}
