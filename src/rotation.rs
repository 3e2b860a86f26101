use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::config::AuthConfig;
use crate::errors::{Error, StoreError};
use crate::pair::TokenPairBuilder;
use crate::store::TokenStore;
use crate::token::{NewTokenPair, Token, TokenType};

/// Expiries for the replacement pair. `None` falls back to the configured
/// per-kind default.
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationExpirations {
    pub access: Option<DateTime<Utc>>,
    pub refresh: Option<DateTime<Utc>>,
}

/// Exchanges a refresh token for a fresh pair, revoking the old one.
pub struct Rotator {
    store: Arc<dyn TokenStore>,
    config: Arc<AuthConfig>,
}

impl Rotator {
    pub fn new(store: Arc<dyn TokenStore>, config: Arc<AuthConfig>) -> Self {
        Self { store, config }
    }

    /// Rotate `old_refresh`: soft-revoke it and issue a replacement pair
    /// that inherits its subject, group and name, carrying
    /// `access_abilities`. Both writes happen in one transaction, so a
    /// concurrent authentication sees either the old state or the complete
    /// new one.
    ///
    /// Preconditions, checked before anything persists:
    /// - `old_refresh` must be a refresh token (`InvalidArgument`);
    /// - its abilities must cover `access_abilities`, unless it carries the
    ///   wildcard (`MissingAbility` with the first gap).
    pub async fn rotate(
        &self,
        old_refresh: &Token,
        access_abilities: &[String],
        expirations: RotationExpirations,
    ) -> Result<NewTokenPair, Error> {
        self.rotate_inner(old_refresh, access_abilities, expirations, false)
            .await
    }

    /// Like [`rotate`](Self::rotate), additionally deleting access tokens
    /// previously issued in the same group, inside the same transaction,
    /// before the replacement pair is written.
    pub async fn rotate_discarding_access(
        &self,
        old_refresh: &Token,
        access_abilities: &[String],
        expirations: RotationExpirations,
    ) -> Result<NewTokenPair, Error> {
        self.rotate_inner(old_refresh, access_abilities, expirations, true)
            .await
    }

    async fn rotate_inner(
        &self,
        old_refresh: &Token,
        access_abilities: &[String],
        expirations: RotationExpirations,
        discard_prior_access: bool,
    ) -> Result<NewTokenPair, Error> {
        if old_refresh.token_type != TokenType::Refresh {
            return Err(Error::InvalidArgument("rotation requires a refresh token"));
        }
        if let Some(missing) = old_refresh.abilities.first_missing(access_abilities) {
            return Err(Error::MissingAbility(missing));
        }

        let mut builder = TokenPairBuilder::from_token(old_refresh, Arc::clone(&self.config))
            .abilities(access_abilities.iter().cloned());
        if let Some(at) = expirations.access {
            builder = builder.access_expires_at(Some(at));
        }
        if let Some(at) = expirations.refresh {
            builder = builder.refresh_expires_at(Some(at));
        }
        let prepared = builder.prepare()?;

        let mut revoked = old_refresh.clone();
        revoked.revoke();

        let saved: Arc<Mutex<Option<NewTokenPair>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&saved);
        self.store
            .run_in_transaction(Box::new(move |tx| {
                Box::pin(async move {
                    let mut revoked = revoked;
                    tx.save(&mut revoked).await?;
                    if discard_prior_access {
                        if let Some(group) = revoked.group_id {
                            tx.delete_by_group(group, Some(TokenType::Access)).await?;
                        }
                    }
                    let pair = prepared.persist(tx).await?;
                    let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    *slot = Some(pair);
                    Ok(())
                })
            }))
            .await?;

        let mut saved = saved.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let pair = saved.take().ok_or_else(|| {
            StoreError::Internal(anyhow::anyhow!("rotation committed without a pair"))
        })?;
        tracing::info!(
            old = %old_refresh.id,
            group = ?pair.group_id(),
            "refresh token rotated"
        );
        Ok(pair)
    }
}
