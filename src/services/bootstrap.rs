//! Startup bucket provisioning.

use crate::services::object_store::{ObjectStore, StorageResult};
use tracing::{info, warn};

/// Make sure the configured bucket exists. Safe to run on every start and
/// from several instances at once.
pub async fn ensure_bucket(store: &dyn ObjectStore) -> StorageResult<()> {
    let bucket = store.bucket();
    if store.bucket_exists().await? {
        info!(bucket, "bucket present");
        return Ok(());
    }

    warn!(bucket, "bucket missing, creating it");
    store.create_bucket().await?;
    info!(bucket, "bucket created");
    Ok(())
}
