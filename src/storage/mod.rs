mod task_store;


use std::path::Path;

#[doc(hidden)]
pub use task_store::*;
use tracing::debug;
use tracing::warn;

/// Open the embedded database holding the task table.
pub fn init_task_db(
    db_root_path: impl AsRef<Path> + std::fmt::Debug
) -> std::result::Result<sled::Db, std::io::Error> {
    debug!("init_task_db from path: {:?}", &db_root_path);

    let path = db_root_path.as_ref().join("task_table");

    sled::Config::default()
        .path(&path)
        .cache_capacity(10 * 1024 * 1024) //10MB
        .flush_every_ms(Some(3))
        .open()
        .map_err(|e| {
            warn!("Try to open DB at this location: {:?} and failed: {:?}", path, e);
            std::io::Error::other(e)
        })
}
