//! Membership-driven task ownership.
//!
//! Ownership is derived, never negotiated: a task belongs to the
//! process whose address the ring returns for the task's stringified
//! id. Every membership change rebuilds the ring from scratch and
//! recomputes the owned set over the full inventory; the incremental
//! table-watch path only ever has to add between passes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::TaskTableWatcher;
use crate::ring::HashRing;
use crate::storage::TaskStore;
use crate::utils::sleep_or_shutdown;
use crate::CoordinationError;
use crate::Error;
use crate::NodeDescriptor;
use crate::Registry;
use crate::Result;
use crate::Settings;

pub struct TaskDispatcher<R, S>
where
    R: Registry,
    S: TaskStore,
{
    registry: Arc<R>,
    store: Arc<S>,

    ring: Arc<HashRing>,
    /// Task ids currently owned by this process. Shared with the worker
    /// pool's feeder; both the redispatch path and the table-watch path
    /// mutate it concurrently.
    owned: Arc<DashSet<u64>>,

    my_address: String,
    membership_path: String,
    retry_interval: Duration,
    shutdown: watch::Receiver<()>,
}

impl<R, S> TaskDispatcher<R, S>
where
    R: Registry,
    S: TaskStore,
{
    pub fn new(
        registry: Arc<R>,
        store: Arc<S>,
        settings: &Settings,
        shutdown: watch::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            store,
            ring: Arc::new(HashRing::new(settings.dispatch.replicas)),
            owned: Arc::new(DashSet::new()),
            my_address: settings.cluster.listen_address.clone(),
            membership_path: settings.cluster.membership_path(),
            retry_interval: settings.registry.watch_retry_interval(),
            shutdown,
        }
    }

    pub fn owned(&self) -> Arc<DashSet<u64>> {
        self.owned.clone()
    }

    pub fn ring(&self) -> Arc<HashRing> {
        self.ring.clone()
    }

    /// First full dispatch pass, run before the worker pool starts so
    /// workers never observe an unpopulated owned set on a stable ring.
    pub async fn bootstrap(&self) -> Result<()> {
        match self.registry.get_children(&self.membership_path).await {
            Ok(children) => self.redispatch(&children).await,
            Err(Error::Coordination(CoordinationError::NoNode(_))) => {
                warn!("membership path {} not provisioned yet, starting empty", self.membership_path);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Membership watch loop: re-lists children with a fresh watch on
    /// the initial pass and after every children-changed notification,
    /// triggering a full redispatch each time. The notification carries
    /// no payload; the full re-list is deliberate (level-triggered
    /// watches do not guarantee intermediate states are observed).
    pub async fn dispatch_tasks(&self) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        info!("membership watch started on {}", self.membership_path);

        loop {
            match self.registry.watch_children(&self.membership_path).await {
                Ok((children, handle)) => {
                    if let Err(e) = self.redispatch(&children).await {
                        // A failed pass leaves ownership stale; retry at
                        // the backoff cadence rather than waiting for
                        // the next membership event, which may never
                        // come on a stable ring.
                        if !self.recover(&e).await {
                            warn!("redispatch failed: {}, retrying", e);
                        }
                        if sleep_or_shutdown(self.retry_interval, &mut shutdown).await {
                            break;
                        }
                        continue;
                    }

                    tokio::select! {
                        _ = shutdown.changed() => break,
                        event = handle => {
                            match event {
                                Ok(event) => {
                                    if let Some(error) = event.error {
                                        warn!("membership watch aborted: {}", error);
                                    } else {
                                        debug!("membership changed under {}", self.membership_path);
                                    }
                                }
                                Err(_) => warn!("membership watch dropped"),
                            }
                        }
                    }
                }
                Err(e) => {
                    if !self.recover(&e).await {
                        return Err(e);
                    }
                    if sleep_or_shutdown(self.retry_interval, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("membership watch stopped");
        Ok(())
    }

    /// Full ownership recomputation against a membership snapshot:
    /// read every member's descriptor, rebuild the ring, then replace
    /// the owned set with the ring's verdict over the full non-deleted
    /// inventory.
    pub async fn redispatch(
        &self,
        children: &[String],
    ) -> Result<()> {
        let mut addresses = Vec::with_capacity(children.len());
        for child in children {
            let child_path = format!("{}/{}", self.membership_path, child);
            let bytes = match self.registry.get(&child_path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("skipping unreadable member {}: {}", child_path, e);
                    continue;
                }
            };
            match bincode::deserialize::<NodeDescriptor>(&bytes) {
                Ok(descriptor) => addresses.push(descriptor.address),
                Err(e) => {
                    warn!("skipping malformed descriptor at {}: {}", child_path, e);
                }
            }
        }

        // The ring is rebuilt wholesale, never patched.
        self.ring.clear();
        self.ring.add(&addresses);
        debug!("ring rebuilt with {} members: {:?}", addresses.len(), addresses);

        let inventory = self.store.all_tasks()?;
        let mine: HashSet<u64> = inventory
            .iter()
            .filter(|task| self.is_mine(task.id))
            .map(|task| task.id)
            .collect();

        // Replace, not grow: tasks deleted or reassigned since the last
        // pass drop out here.
        self.owned.retain(|id| mine.contains(id));
        for id in &mine {
            self.owned.insert(*id);
        }

        info!(
            "redispatch complete: {} of {} tasks owned by {}",
            mine.len(),
            inventory.len(),
            self.my_address
        );
        Ok(())
    }

    /// Change-feed loop: incrementally claim newly-created or updated
    /// tasks that hash to this process without waiting for the next
    /// full redispatch. Deleted-flagged rows are dropped immediately.
    pub async fn watch_task_table(&self) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        let mut watcher = TaskTableWatcher::new(self.store.watch());
        info!("task-table watch started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                change = watcher.next_change() => {
                    let change = match change {
                        Some(change) => change,
                        None => {
                            warn!("task-table change feed ended");
                            break;
                        }
                    };

                    if change.deleted {
                        if self.owned.remove(&change.id).is_some() {
                            debug!("dropped deleted task {}", change.id);
                        }
                        continue;
                    }

                    if self.is_mine(change.id) && self.owned.insert(change.id) {
                        info!("claimed task {} from change feed", change.id);
                    }
                }
            }
        }

        info!("task-table watch stopped");
        Ok(())
    }

    fn is_mine(
        &self,
        task_id: u64,
    ) -> bool {
        self.ring.get(&task_id.to_string()).as_deref() == Some(self.my_address.as_str())
    }

    /// Retry-policy classification for membership watch failures.
    async fn recover(
        &self,
        error: &Error,
    ) -> bool {
        match error {
            Error::Coordination(e) if e.needs_reconnect() => {
                warn!("session lost during membership watch: {}, reconnecting", e);
                if let Err(reconnect_err) = self.registry.reconnect().await {
                    warn!("reconnect failed: {}", reconnect_err);
                }
                true
            }
            Error::Coordination(CoordinationError::NoNode(_)) => {
                debug!("membership path {} not provisioned yet, retrying", self.membership_path);
                true
            }
            Error::Coordination(e) if e.is_recoverable() => {
                warn!("recoverable membership watch error: {}", e);
                true
            }
            _ => false,
        }
    }
}
