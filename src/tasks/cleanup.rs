//! Expired Entry Sweep
//!
//! Background task that periodically asks the active backend to drop
//! expired entries. Reads already ignore expired entries; the sweep only
//! reclaims their space.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheManager;

/// Spawns the periodic sweep.
///
/// Returns `None` when `interval_secs` is 0, which disables the task. The
/// handle can be aborted during shutdown.
///
/// # Example
/// ```ignore
/// let manager = Arc::new(CacheManager::new(config.cache.clone()));
/// let sweep = spawn_cleanup_task(manager.clone(), 60);
/// // Later, during shutdown:
/// if let Some(handle) = sweep { handle.abort(); }
/// ```
pub fn spawn_cleanup_task(manager: Arc<CacheManager>, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        info!("Expired entry sweep disabled");
        return None;
    }
    let interval = Duration::from_secs(interval_secs);

    Some(tokio::spawn(async move {
        info!(interval_secs, "Starting expired entry sweep");

        loop {
            tokio::time::sleep(interval).await;

            let removed = manager.sweep_expired().await;
            if removed > 0 {
                info!(removed, "Swept expired cache entries");
            } else {
                debug!("Sweep found no expired entries");
            }
        }
    }))
}
