//! Builder for assembling a [`SyncNode`].
//!
//! Wires production defaults (sled-backed task table, framed-protocol
//! registry client) from [`Settings`], with overrides for the database
//! handle. The per-task action has no default: it is the composing
//! application's contract.
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let node = NodeBuilder::new(settings, shutdown_rx)
//!     .action(Arc::new(HostSyncAction::new(api)))
//!     .build()
//!     .await?;
//! node.run().await?;
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use super::SyncNode;
use crate::storage::init_task_db;
use crate::Error;
use crate::MembershipRegistry;
use crate::Result;
use crate::ServiceRegistrar;
use crate::Settings;
use crate::SledTaskStore;
use crate::StorageError;
use crate::TaskAction;
use crate::TaskDispatcher;
use crate::WorkerPool;

pub struct NodeBuilder {
    settings: Settings,
    shutdown: watch::Receiver<()>,
    db: Option<sled::Db>,
    action: Option<Arc<dyn TaskAction>>,
}

impl NodeBuilder {
    pub fn new(
        settings: Settings,
        shutdown: watch::Receiver<()>,
    ) -> Self {
        Self {
            settings,
            shutdown,
            db: None,
            action: None,
        }
    }

    /// Override the embedded database (e.g. an in-memory one in tests).
    pub fn db(
        mut self,
        db: sled::Db,
    ) -> Self {
        self.db = Some(db);
        self
    }

    /// Per-task synchronization action to execute for owned tasks.
    pub fn action(
        mut self,
        action: Arc<dyn TaskAction>,
    ) -> Self {
        self.action = Some(action);
        self
    }

    /// Validate settings, open storage and connect the coordination
    /// session, returning a node ready to [`SyncNode::run`].
    pub async fn build(self) -> Result<SyncNode<MembershipRegistry, SledTaskStore>> {
        self.settings.validate()?;

        let action = self
            .action
            .ok_or_else(|| Error::Fatal("a TaskAction must be supplied".to_string()))?;

        let db = match self.db {
            Some(db) => db,
            None => init_task_db(&self.settings.cluster.db_root_dir).map_err(StorageError::IoError)?,
        };
        let store = Arc::new(SledTaskStore::new(&db)?);

        let registry = Arc::new(MembershipRegistry::new(self.settings.registry.clone()));
        registry.connect().await?;

        let registrar = Arc::new(ServiceRegistrar::new(
            registry.clone(),
            self.settings.cluster.clone(),
            self.settings.registry.watch_retry_interval(),
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            registry.clone(),
            store,
            &self.settings,
            self.shutdown.clone(),
        ));
        let pool = WorkerPool::new(&self.settings.dispatch);

        info!("node assembled for {}", self.settings.cluster.listen_address);
        Ok(SyncNode {
            settings: self.settings,
            registrar,
            dispatcher,
            pool,
            action,
            shutdown: self.shutdown,
        })
    }
}
