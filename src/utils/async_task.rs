use std::future::Future;

use tokio::task::JoinHandle;
use tracing::error;

use crate::Result;

/// Spawn a named background loop and track its handle. The loop's
/// terminal error, if any, is logged; supervision is external.
pub(crate) fn spawn_loop<F>(
    name: &str,
    future: F,
    handles: &mut Vec<JoinHandle<()>>,
) where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    handles.push(tokio::spawn(async move {
        if let Err(e) = future.await {
            error!("background loop '{}' stopped with error: {:?}", name, e);
        }
    }));
}
