// -
// Database namespaces

/// Sled tree holding the persisted task table
pub(crate) const TASK_TABLE_TREE: &str = "_sync_task_tree";

// -
// Wire protocol

/// Reserved transaction id for server-pushed watch notifications
pub(crate) const WATCH_NOTIFICATION_XID: u64 = u64::MAX;
