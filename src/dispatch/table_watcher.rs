use crate::storage::TaskChange;
use crate::storage::TaskTableSubscription;

/// Adapter over the task table's change feed.
///
/// Scoped to insert/update/replace operations with the post-change row
/// available in the event payload; decode failures are skipped inside
/// the subscription.
pub struct TaskTableWatcher {
    subscription: TaskTableSubscription,
}

impl TaskTableWatcher {
    pub fn new(subscription: TaskTableSubscription) -> Self {
        Self { subscription }
    }

    /// Next row-level change, or `None` once the feed closes.
    pub async fn next_change(&mut self) -> Option<TaskChange> {
        self.subscription.next().await
    }
}
