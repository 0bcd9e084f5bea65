use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

/// Sleep for `duration`, racing against the shutdown signal.
///
/// Returns `true` when shutdown fired (or its sender was dropped), so
/// watch loops can observe cancellation within one backoff interval.
pub(crate) async fn sleep_or_shutdown(
    duration: Duration,
    shutdown: &mut watch::Receiver<()>,
) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = sleep(duration) => false,
    }
}
