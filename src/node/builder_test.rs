use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::NodeBuilder;
use crate::Error;
use crate::Result;
use crate::Settings;
use crate::TaskAction;

struct NoopAction;

#[async_trait]
impl TaskAction for NoopAction {
    async fn run(
        &self,
        _task_id: u64,
    ) -> Result<()> {
        Ok(())
    }
}

/// # Case 1: Building without a task action fails fast
#[tokio::test]
async fn test_build_requires_action() {
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let result = NodeBuilder::new(Settings::default(), shutdown_rx).build().await;
    assert!(matches!(result.err(), Some(Error::Fatal(_))));
}

/// # Case 2: Invalid settings are rejected before any side effects
#[tokio::test]
async fn test_build_validates_settings() {
    let mut settings = Settings::default();
    settings.dispatch.workers = 0;

    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let result = NodeBuilder::new(settings, shutdown_rx)
        .action(Arc::new(NoopAction))
        .build()
        .await;
    assert!(matches!(result.err(), Some(Error::InvalidConfig(_))));
}
