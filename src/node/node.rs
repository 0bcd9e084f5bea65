//! Running node: self-registration, bootstrap, background loops.

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::watch;
use tracing::info;

use crate::storage::TaskStore;
use crate::utils::spawn_loop;
use crate::Registry;
use crate::Result;
use crate::ServiceRegistrar;
use crate::Settings;
use crate::TaskAction;
use crate::TaskDispatcher;
use crate::WorkerPool;

/// One sharding peer: registered in the coordination service, watching
/// membership and the task table, executing its owned share of tasks.
pub struct SyncNode<R, S>
where
    R: Registry,
    S: TaskStore,
{
    pub(crate) settings: Settings,
    pub(crate) registrar: Arc<ServiceRegistrar<R>>,
    pub(crate) dispatcher: Arc<TaskDispatcher<R, S>>,
    pub(crate) pool: WorkerPool,
    pub(crate) action: Arc<dyn TaskAction>,
    pub(crate) shutdown: watch::Receiver<()>,
}

impl<R, S> SyncNode<R, S>
where
    R: Registry,
    S: TaskStore,
{
    /// Register, run the blocking bootstrap dispatch pass, then spawn
    /// every background loop and park until shutdown. All loops share
    /// one shutdown signal, so teardown is bounded in time.
    pub async fn run(self) -> Result<()> {
        self.registrar.register().await?;

        // Workers must not start against an unpopulated owned set.
        self.dispatcher.bootstrap().await?;

        let mut handles = Vec::new();

        // Re-establishes the ephemeral registration after every session
        // loss; the initial blocking pass above only covers startup.
        let registrar = self.registrar.clone();
        let shutdown = self.shutdown.clone();
        spawn_loop(
            "registration-watch",
            async move { registrar.maintain_registration(shutdown).await },
            &mut handles,
        );

        let dispatcher = self.dispatcher.clone();
        spawn_loop(
            "membership-watch",
            async move { dispatcher.dispatch_tasks().await },
            &mut handles,
        );

        let dispatcher = self.dispatcher.clone();
        spawn_loop(
            "task-table-watch",
            async move { dispatcher.watch_task_table().await },
            &mut handles,
        );

        for service in self.settings.cluster.peer_services.clone() {
            let registrar = self.registrar.clone();
            let shutdown = self.shutdown.clone();
            spawn_loop(
                &format!("discovery-{}", service),
                async move { registrar.discover(&service, shutdown).await },
                &mut handles,
            );
        }

        handles.extend(self.pool.start(
            self.dispatcher.owned(),
            self.action.clone(),
            self.shutdown.clone(),
        ));

        let mut shutdown = self.shutdown.clone();
        let _ = shutdown.changed().await;
        info!("shutdown signal received, draining background loops");
        for handle in handles {
            let _ = handle.await;
        }
        info!("node stopped");
        Ok(())
    }

    /// Task ids currently owned by this process.
    pub fn owned_tasks(&self) -> Arc<DashSet<u64>> {
        self.dispatcher.owned()
    }

    /// Random peer address of a discovered service type.
    pub fn resolve_peer(
        &self,
        service: &str,
    ) -> Option<String> {
        self.registrar.resolve(service)
    }
}
