//! Background job: delete tokens past their retention window.
//!
//! A token becomes prunable once its expiry or revocation predates the
//! per-kind retention cutoff; live never-expiring tokens are never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;

use crate::config::AuthConfig;
use crate::errors::StoreError;
use crate::store::TokenStore;

/// Spawn the background prune task. Call this once at startup.
pub fn spawn(store: Arc<dyn TokenStore>, config: Arc<AuthConfig>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3600)); // every hour
        loop {
            interval.tick().await;
            if let Err(e) = prune_once(store.as_ref(), &config).await {
                tracing::error!("prune job failed: {}", e);
            }
        }
    })
}

/// One sweep over every configured retention window. Returns the number of
/// tokens removed.
pub async fn prune_once(
    store: &dyn TokenStore,
    config: &AuthConfig,
) -> Result<u64, StoreError> {
    let now = Utc::now();
    let mut removed = 0;
    for (token_type, cutoff) in config.retention_cutoffs(now) {
        removed += store.prune_expired(Some(token_type), cutoff).await?;
    }
    if removed > 0 {
        tracing::info!(removed, "pruned stale tokens");
    }
    Ok(removed)
}
