//! # task-ring
//!
//! A coordination layer that shards periodic host-synchronization work
//! across a fleet of identical processes without a central scheduler.
//!
//! Every process embeds a [`SyncNode`]: it registers itself as an
//! ephemeral node in an external ZooKeeper-like coordination service,
//! watches its own service path for membership changes, and maintains a
//! consistent-hash ring over the live membership. Each durable task in
//! the local [`TaskStore`] hashes onto exactly one live member; the
//! members that own a task run it, everyone else ignores it. When a
//! process joins or dies, only the ring-adjacent slice of tasks moves.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use task_ring::NodeBuilder;
//! use task_ring::Settings;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load(Some("task-ring.toml"))?;
//!     let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
//!
//!     let node = NodeBuilder::new(settings, shutdown_rx)
//!         .action(Arc::new(MySyncAction))
//!         .build()
//!         .await?;
//!
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         shutdown_tx.send(()).ok();
//!     });
//!
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod constants;
mod dispatch;
mod errors;
mod node;
mod registry;
mod ring;
mod storage;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use config::*;
pub use dispatch::*;
pub use errors::*;
pub use node::*;
pub use registry::*;
pub use ring::*;
pub use storage::*;
