//! Coordination-service client and service registration.
//!
//! The coordination service is an external ZooKeeper-like system:
//! strongly consistent metadata nodes, session-scoped ephemeral nodes,
//! and one-shot level-triggered watches. [`MembershipRegistry`] speaks
//! its length-prefixed binary protocol; [`ServiceRegistrar`] builds
//! ephemeral self-registration and peer discovery on top of it.

mod client;
pub(crate) mod protocol;
mod registrar;

#[cfg(test)]
mod registrar_test;

pub use client::*;
pub use protocol::CreateMode;
pub use protocol::WatchKind;
pub use registrar::*;

use tokio::sync::oneshot;

/// Payload of a one-shot watch notification.
///
/// The notification carries no description of what changed; a handler
/// always re-reads the watched node. The service's watches are
/// level-triggered and intermediate states are not guaranteed to be
/// observed, so re-reading is the only correct strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverEvent {
    /// Path of the node the watch was set on.
    pub key: String,
    /// Optional payload attached by the server; empty for children
    /// watches.
    pub data: Vec<u8>,
    /// Set when the watch fired because the session was lost.
    pub error: Option<String>,
}

/// One-shot change-notification handle returned by watch operations.
pub type WatchHandle = oneshot::Receiver<DiscoverEvent>;
