use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::DashSet;
use tokio::sync::watch;

use super::TaskAction;
use super::WorkerPool;
use crate::DispatchConfig;
use crate::DispatchError;
use crate::Result;

/// Records invocations per task id; fails every call for `failing_id`.
struct RecordingAction {
    seen: DashMap<u64, usize>,
    failing_id: Option<u64>,
    delay: Duration,
}

impl RecordingAction {
    fn new(failing_id: Option<u64>) -> Self {
        Self {
            seen: DashMap::new(),
            failing_id,
            delay: Duration::from_millis(0),
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            failing_id: None,
            delay,
        }
    }
}

#[async_trait]
impl TaskAction for RecordingAction {
    async fn run(
        &self,
        task_id: u64,
    ) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        *self.seen.entry(task_id).or_insert(0) += 1;

        if self.failing_id == Some(task_id) {
            return Err(DispatchError::ActionFailed {
                task_id,
                message: "simulated failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn pool_config(workers: usize) -> DispatchConfig {
    DispatchConfig {
        workers,
        queue_capacity: 2,
        feed_interval_in_ms: 50,
        ..DispatchConfig::default()
    }
}

fn owned_set(ids: std::ops::Range<u64>) -> Arc<DashSet<u64>> {
    let owned = DashSet::new();
    for id in ids {
        owned.insert(id);
    }
    Arc::new(owned)
}

/// # Case 1: Every owned task is executed, repeatedly, by N workers
#[tokio::test]
async fn test_pool_drains_owned_set() {
    let owned = owned_set(0..8);
    let action = Arc::new(RecordingAction::new(None));
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let handles = WorkerPool::new(&pool_config(3)).start(owned, action.clone(), shutdown_rx);

    // A few feeder passes at 50ms cadence.
    tokio::time::sleep(Duration::from_millis(400)).await;
    shutdown_tx.send(()).expect("signal shutdown");
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop must stop after shutdown")
            .expect("join");
    }

    for id in 0..8u64 {
        let runs = action.seen.get(&id).map(|e| *e.value()).unwrap_or(0);
        assert!(runs >= 2, "task {} ran {} times, expected repeated passes", id, runs);
    }
}

/// # Case 2: One task's failure never kills its worker
#[tokio::test]
async fn test_task_failure_is_isolated() {
    let owned = owned_set(0..5);
    let action = Arc::new(RecordingAction::new(Some(3)));
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let handles = WorkerPool::new(&pool_config(2)).start(owned, action.clone(), shutdown_rx);

    tokio::time::sleep(Duration::from_millis(400)).await;
    shutdown_tx.send(()).expect("signal shutdown");
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop must stop after shutdown")
            .expect("join");
    }

    // The failing task keeps being retried on later passes, and the
    // healthy ones keep executing alongside it.
    assert!(action.seen.get(&3).map(|e| *e.value()).unwrap_or(0) >= 2);
    for id in [0u64, 1, 2, 4] {
        assert!(action.seen.get(&id).map(|e| *e.value()).unwrap_or(0) >= 2);
    }
}

/// # Case 3: Shutdown unblocks a feeder stuck on a full queue
///
/// ## Setup
/// 1. Many owned tasks, one slow worker, capacity-2 queue: the feeder
///    is parked in a blocking send when shutdown fires.
#[tokio::test]
async fn test_shutdown_unblocks_backpressured_feeder() {
    let owned = owned_set(0..100);
    let action = Arc::new(RecordingAction::with_delay(Duration::from_millis(100)));
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let handles = WorkerPool::new(&pool_config(1)).start(owned, action, shutdown_rx);

    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown_tx.send(()).expect("signal shutdown");

    // Feeder exits mid-send; the worker finishes its in-flight action.
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("shutdown must be bounded in time")
            .expect("join");
    }
}
