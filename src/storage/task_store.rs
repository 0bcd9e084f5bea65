//! Persisted task table with a change feed.
//!
//! Rows live in one sled tree keyed by big-endian task id; sled's
//! subscriber doubles as the change feed (insert/update/replace surface
//! as `Event::Insert` with the fully-materialized row). Deletion is a
//! soft-delete flag on the row, so deletes also arrive through the
//! insert path.

use sled::Tree;
use tracing::warn;

use crate::constants::TASK_TABLE_TREE;
use crate::utils::task_id_from_key;
use crate::utils::task_key;
use crate::Result;
use crate::StorageError;

/// One row of the task table. Identity is the numeric id only.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SyncTask {
    pub id: u64,
    /// Soft-delete marker; deleted rows are excluded from dispatch.
    pub deleted: bool,
    /// Opaque application payload (e.g. cloud-account parameters).
    pub payload: Vec<u8>,
}

/// Change-feed event: the id and soft-delete state of the row after the
/// mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskChange {
    pub id: u64,
    pub deleted: bool,
}

/// Read access to the task inventory plus its change feed.
pub trait TaskStore: Send + Sync + 'static {
    /// Full scan of all non-deleted tasks. Malformed rows are skipped
    /// and logged, never abort the scan.
    fn all_tasks(&self) -> Result<Vec<SyncTask>>;

    /// Subscribe to the change feed (insert/update/replace operations).
    fn watch(&self) -> TaskTableSubscription;

    fn upsert(
        &self,
        task: &SyncTask,
    ) -> Result<()>;

    /// Set the soft-delete marker; absent rows get a tombstone so the
    /// change feed still carries the deletion.
    fn mark_deleted(
        &self,
        id: u64,
    ) -> Result<()>;
}

pub struct SledTaskStore {
    tree: Tree,
}

impl SledTaskStore {
    pub fn new(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree(TASK_TABLE_TREE)?;
        Ok(Self { tree })
    }

    #[cfg(test)]
    pub(crate) fn tree_for_test(&self) -> &Tree {
        &self.tree
    }

    fn decode_row(
        key: &[u8],
        value: &[u8],
    ) -> Option<SyncTask> {
        let task: SyncTask = match bincode::deserialize(value) {
            Ok(task) => task,
            Err(e) => {
                warn!("skipping malformed task row: {}", e);
                return None;
            }
        };
        match task_id_from_key(key) {
            Ok(id) if id == task.id => Some(task),
            Ok(id) => {
                warn!("task row key {} disagrees with row id {}, skipping", id, task.id);
                None
            }
            Err(e) => {
                warn!("skipping task row with malformed key: {}", e);
                None
            }
        }
    }
}

impl TaskStore for SledTaskStore {
    fn all_tasks(&self) -> Result<Vec<SyncTask>> {
        let mut tasks = Vec::new();
        for entry in self.tree.iter() {
            let (key, value) = entry.map_err(StorageError::from)?;
            if let Some(task) = Self::decode_row(&key, &value) {
                if !task.deleted {
                    tasks.push(task);
                }
            }
        }
        Ok(tasks)
    }

    fn watch(&self) -> TaskTableSubscription {
        TaskTableSubscription {
            inner: self.tree.watch_prefix(vec![]),
        }
    }

    fn upsert(
        &self,
        task: &SyncTask,
    ) -> Result<()> {
        let encoded = bincode::serialize(task).map_err(StorageError::BincodeError)?;
        self.tree
            .insert(task_key(task.id), encoded)
            .map_err(StorageError::from)?;
        Ok(())
    }

    fn mark_deleted(
        &self,
        id: u64,
    ) -> Result<()> {
        let existing = self.tree.get(task_key(id)).map_err(StorageError::from)?;
        let mut task = existing
            .and_then(|value| Self::decode_row(&task_key(id), &value))
            .unwrap_or(SyncTask {
                id,
                deleted: true,
                payload: vec![],
            });
        task.deleted = true;
        self.upsert(&task)
    }
}

/// Change-feed subscription over the task tree.
pub struct TaskTableSubscription {
    inner: sled::Subscriber,
}

impl TaskTableSubscription {
    /// Next insert/update/replace event, skipping rows that fail to
    /// decode. Resolves to `None` when the store is dropped.
    pub async fn next(&mut self) -> Option<TaskChange> {
        loop {
            let event = (&mut self.inner).await?;
            match event {
                sled::Event::Insert { key: _, value } => {
                    match bincode::deserialize::<SyncTask>(&value) {
                        Ok(task) => {
                            return Some(TaskChange {
                                id: task.id,
                                deleted: task.deleted,
                            })
                        }
                        Err(e) => {
                            warn!("skipping malformed change-feed row: {}", e);
                            continue;
                        }
                    }
                }
                // The feed is scoped to insert/update/replace; physical
                // removals are not part of the contract.
                sled::Event::Remove { .. } => continue,
            }
        }
    }
}
