//! Ephemeral self-registration and peer discovery.
//!
//! Registration writes this process's serialized descriptor to an
//! ephemeral node under `{services_base}/{module_name}`; the
//! coordination service removes it when the session expires, so no
//! extra heartbeat protocol is needed. Discovery keeps one
//! atomically-swapped address list per peer service type, refreshed on
//! every children-changed notification.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::Registry;
use super::CreateMode;
use super::WatchHandle;
use crate::utils::sleep_or_shutdown;
use crate::ClusterConfig;
use crate::CoordinationError;
use crate::Error;
use crate::Result;

/// Serialized registration payload. Peers only ever consume the
/// `address` field; the rest is diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub address: String,
    pub scheme: String,
    pub version: String,
    pub pid: u32,
}

impl NodeDescriptor {
    pub fn from_cluster(cluster: &ClusterConfig) -> Self {
        Self {
            address: cluster.listen_address.clone(),
            scheme: cluster.scheme.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
        }
    }
}

pub struct ServiceRegistrar<R>
where
    R: Registry,
{
    registry: Arc<R>,
    cluster: ClusterConfig,
    retry_interval: Duration,

    /// Peer address snapshots, one slot per discovered service type.
    peers: HashMap<String, ArcSwap<Vec<String>>>,
}

impl<R> ServiceRegistrar<R>
where
    R: Registry,
{
    pub fn new(
        registry: Arc<R>,
        cluster: ClusterConfig,
        retry_interval: Duration,
    ) -> Self {
        let peers = cluster
            .peer_services
            .iter()
            .map(|service| (service.clone(), ArcSwap::from_pointee(Vec::new())))
            .collect();

        Self {
            registry,
            cluster,
            retry_interval,
            peers,
        }
    }

    /// Write this process's descriptor to its ephemeral registration
    /// node. Liveness of the registration is tied to session expiry.
    pub async fn register(&self) -> Result<()> {
        let descriptor = NodeDescriptor::from_cluster(&self.cluster);
        let encoded = bincode::serialize(&descriptor)
            .map_err(|e| Error::Fatal(format!("descriptor serialization failed: {}", e)))?;

        let base_path = self.cluster.membership_path();
        self.registry.create_recursive(&base_path, &[]).await?;

        let node_path = format!("{}/{}", base_path, descriptor.address);
        match self
            .registry
            .create(&node_path, &encoded, CreateMode::Ephemeral)
            .await
        {
            Ok(created) => {
                info!("registered {} at {}", descriptor.address, created);
                Ok(())
            }
            Err(Error::Coordination(CoordinationError::NodeExists(_))) => {
                // Stale registration from a previous session; overwrite.
                warn!("registration node {} already exists, updating", node_path);
                self.registry.update(&node_path, &encoded).await
            }
            Err(e) => Err(e),
        }
    }

    /// Registration-maintenance loop: keep the ephemeral registration
    /// alive across session loss. Registers, then watches the
    /// registration node; a reconnect tears the old session down and
    /// wakes the watch with an error, after which the next pass
    /// re-creates the node on the fresh session. Without this, a
    /// reconnected process would silently stay out of the membership
    /// forever.
    pub async fn maintain_registration(
        &self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let node_path = format!(
            "{}/{}",
            self.cluster.membership_path(),
            self.cluster.listen_address
        );
        info!("registration watch started on {}", node_path);

        loop {
            let armed = async {
                self.register().await?;
                let (_, handle) = self.registry.get_with_watch(&node_path).await?;
                Ok::<WatchHandle, Error>(handle)
            }
            .await;

            match armed {
                Ok(handle) => {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        event = handle => {
                            match event {
                                Ok(event) => {
                                    if let Some(error) = event.error {
                                        warn!("registration watch on {} aborted: {}", node_path, error);
                                    } else {
                                        debug!("registration node {} changed", node_path);
                                    }
                                }
                                Err(_) => warn!("registration watch on {} dropped", node_path),
                            }
                        }
                    }
                }
                Err(e) => {
                    if !self.recover(&node_path, &e).await {
                        return Err(e);
                    }
                    if sleep_or_shutdown(self.retry_interval, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("registration watch stopped");
        Ok(())
    }

    /// Discovery loop for one peer service type: list children with a
    /// watch, swap the snapshot, then wait for the next change. Runs
    /// until shutdown; watch errors follow the reconnect/backoff policy.
    pub async fn discover(
        &self,
        service: &str,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let path = self.cluster.service_path(service);
        info!("discovering peers of '{}' under {}", service, path);

        loop {
            match self.refresh(service, &path).await {
                Ok(handle) => {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        event = handle => {
                            match event {
                                Ok(event) => {
                                    if let Some(error) = event.error {
                                        warn!("children watch on {} aborted: {}", path, error);
                                    } else {
                                        debug!("children changed under {}", path);
                                    }
                                }
                                Err(_) => warn!("children watch on {} dropped", path),
                            }
                        }
                    }
                }
                Err(e) => {
                    if !self.recover(&path, &e).await {
                        return Err(e);
                    }
                    if sleep_or_shutdown(self.retry_interval, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("discovery of '{}' stopped", service);
        Ok(())
    }

    /// One discovery pass: re-list children and swap the snapshot,
    /// returning the armed one-shot watch.
    pub(crate) async fn refresh(
        &self,
        service: &str,
        path: &str,
    ) -> Result<WatchHandle> {
        let (children, handle) = self.registry.watch_children(path).await?;
        debug!("{} peers of '{}': {:?}", children.len(), service, children);

        if let Some(slot) = self.peers.get(service) {
            slot.store(Arc::new(children));
        }
        Ok(handle)
    }

    /// Current peer-address snapshot for `service`.
    pub fn peers_of(
        &self,
        service: &str,
    ) -> Vec<String> {
        self.peers
            .get(service)
            .map(|slot| slot.load().as_ref().clone())
            .unwrap_or_default()
    }

    /// Uniformly random peer address for an outbound call.
    pub fn resolve(
        &self,
        service: &str,
    ) -> Option<String> {
        let slot = self.peers.get(service)?;
        let addresses = slot.load();
        if addresses.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..addresses.len());
        Some(addresses[index].clone())
    }

    /// Classify a discovery failure per the retry policy. Returns false
    /// only for errors the loop must surface.
    async fn recover(
        &self,
        path: &str,
        error: &Error,
    ) -> bool {
        match error {
            Error::Coordination(e) if e.needs_reconnect() => {
                warn!("session lost while watching {}: {}, reconnecting", path, e);
                if let Err(reconnect_err) = self.registry.reconnect().await {
                    warn!("reconnect failed: {}", reconnect_err);
                }
                true
            }
            Error::Coordination(CoordinationError::NoNode(_)) => {
                // Service base path not provisioned yet.
                debug!("{} not provisioned yet, retrying", path);
                true
            }
            Error::Coordination(e) if e.is_recoverable() => {
                warn!("recoverable watch error on {}: {}", path, e);
                true
            }
            _ => false,
        }
    }
}
