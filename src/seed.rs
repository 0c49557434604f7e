use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::model::{Document, LESSONS};
use crate::store::Store;

/// Load a JSON array of lessons into the `products` collection.
///
/// Lessons are created out-of-band — this is the out-of-band path. The seed
/// only runs against an empty collection, so a restart never duplicates it.
pub async fn load_lessons(store: &Store, path: &Path) -> Result<usize, Box<dyn std::error::Error>> {
    if store.count(LESSONS).await > 0 {
        info!("products collection already populated, skipping seed");
        return Ok(0);
    }

    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<Value> = serde_json::from_str(&raw)?;

    let mut inserted = 0;
    for entry in entries {
        let Value::Object(mut map) = entry else {
            warn!("skipping non-object seed entry");
            continue;
        };
        map.entry("version").or_insert(Value::from(0u64));
        store.insert_one(LESSONS, Document::from_object(map)).await?;
        inserted += 1;
    }

    info!("seeded {inserted} lessons from {}", path.display());
    Ok(inserted)
}
