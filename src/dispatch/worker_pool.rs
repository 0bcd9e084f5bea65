//! Bounded worker pool draining the owned-task set.
//!
//! One feeder iterates the owned set and pushes every task id into a
//! bounded queue, sleeping a fixed interval between full passes; a full
//! queue blocks the feeder, which is the system's only explicit
//! backpressure mechanism. N workers drain the queue and invoke the
//! externally supplied per-task action. A task's failure is logged and
//! never terminates its worker. Every blocking send and receive races
//! against the shutdown signal so shutdown is bounded in time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
#[cfg(test)]
use mockall::automock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::DispatchConfig;
use crate::Result;

/// Per-task synchronization action, supplied by the composing
/// application. Invoked for every owned task id at the feeder's
/// cadence, with bounded concurrency.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskAction: Send + Sync + 'static {
    async fn run(
        &self,
        task_id: u64,
    ) -> Result<()>;
}

pub struct WorkerPool {
    workers: usize,
    queue_capacity: usize,
    feed_interval: Duration,
}

impl WorkerPool {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            feed_interval: config.feed_interval(),
        }
    }

    /// Spawn the feeder and worker loops; returns their join handles so
    /// the caller can await a bounded drain at shutdown.
    pub fn start(
        &self,
        owned: Arc<DashSet<u64>>,
        action: Arc<dyn TaskAction>,
        shutdown: watch::Receiver<()>,
    ) -> Vec<JoinHandle<()>> {
        let (tx, rx) = flume::bounded::<u64>(self.queue_capacity);

        let mut handles = Vec::with_capacity(self.workers + 1);
        handles.push(tokio::spawn(feed_loop(
            owned,
            tx,
            self.feed_interval,
            shutdown.clone(),
        )));

        for worker_id in 0..self.workers {
            handles.push(tokio::spawn(work_loop(
                worker_id,
                rx.clone(),
                action.clone(),
                shutdown.clone(),
            )));
        }

        info!("worker pool started: {} workers, queue capacity {}", self.workers, self.queue_capacity);
        handles
    }
}

async fn feed_loop(
    owned: Arc<DashSet<u64>>,
    tx: flume::Sender<u64>,
    interval: Duration,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        // Snapshot first: holding shard guards across an await would
        // block the dispatcher's concurrent mutations.
        let ids: Vec<u64> = owned.iter().map(|entry| *entry.key()).collect();
        debug!("feeding {} owned tasks", ids.len());

        for id in ids {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("feeder shutting down");
                    return;
                }
                sent = tx.send_async(id) => {
                    if sent.is_err() {
                        warn!("task queue closed, feeder exiting");
                        return;
                    }
                }
            }
        }

        tokio::select! {
            _ = shutdown.changed() => {
                info!("feeder shutting down");
                return;
            }
            _ = sleep(interval) => {}
        }
    }
}

async fn work_loop(
    worker_id: usize,
    rx: flume::Receiver<u64>,
    action: Arc<dyn TaskAction>,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("worker {} shutting down", worker_id);
                return;
            }
            received = rx.recv_async() => {
                let task_id = match received {
                    Ok(task_id) => task_id,
                    Err(_) => {
                        debug!("queue drained and closed, worker {} exiting", worker_id);
                        return;
                    }
                };

                debug!("worker {} running task {}", worker_id, task_id);
                if let Err(e) = action.run(task_id).await {
                    // Per-task failure isolation: log and keep draining.
                    error!("worker {}: sync action failed for task {}: {}", worker_id, task_id, e);
                }
            }
        }
    }
}
