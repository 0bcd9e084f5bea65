//! Task ownership and execution.
//!
//! [`TaskDispatcher`] decides which tasks this process owns: it rebuilds
//! its hash ring on every membership change and recomputes the owned set
//! over the full task inventory, while the table watcher adds
//! newly-created tasks between passes. [`WorkerPool`] drains the owned
//! set through one bounded queue at the feeder's cadence.

mod dispatcher;
mod table_watcher;
mod worker_pool;

#[cfg(test)]
mod worker_pool_test;

pub use dispatcher::*;
pub use table_watcher::*;
pub use worker_pool::*;
