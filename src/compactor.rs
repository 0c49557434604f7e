use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::store::Store;

/// Background task that rewrites the WAL once enough appends accumulate.
pub async fn run_compactor(store: Arc<Store>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = store.appends_since_compact().await;
        if appends < threshold {
            debug!("compactor idle: {appends}/{threshold} appends since last compaction");
            continue;
        }
        match store.compact().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
