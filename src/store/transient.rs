use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{TokenStore, TxWork};
use crate::abilities::AbilitySet;
use crate::errors::StoreError;
use crate::secret;
use crate::token::{SubjectRef, Token, TokenId, TokenType};

/// A non-persistent token for impersonation and test scenarios.
///
/// Implements the store interface over a single fixed token: lookups
/// resolve it, every mutating operation fails with
/// [`StoreError::ReadOnly`]. When driving an `AuthenticationGuard` with
/// one of these, disable usage tracking in the config: persisting
/// `last_used_at` is a mutation and fails like any other.
pub struct TransientToken {
    token: Token,
    secret: String,
}

impl TransientToken {
    /// Mint a transient token: never expires, ungrouped, id assigned
    /// locally. The plaintext stays readable via [`secret`](Self::secret)
    /// for the lifetime of the value.
    pub fn issue(
        token_type: TokenType,
        subject: SubjectRef,
        abilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let plaintext = secret::generate_secret();
        let now = Utc::now();
        let token = Token {
            id: TokenId::generate(),
            token_type,
            subject,
            group_id: None,
            name: None,
            secret_hash: secret::hash_secret(plaintext.expose()),
            abilities: AbilitySet::new(abilities),
            revoked_at: None,
            expires_at: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        Self {
            token,
            secret: plaintext.expose().to_string(),
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

#[async_trait]
impl TokenStore for TransientToken {
    async fn find_by_type_and_hash(
        &self,
        token_type: Option<TokenType>,
        secret_hash: &str,
    ) -> Result<Option<Token>, StoreError> {
        let kind_matches = token_type
            .as_ref()
            .map_or(true, |kind| kind == &self.token.token_type);
        if kind_matches && self.token.secret_hash == secret_hash {
            Ok(Some(self.token.clone()))
        } else {
            Ok(None)
        }
    }

    async fn save(&self, _token: &mut Token) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    async fn delete(&self, _token: &Token) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }

    async fn delete_by_id_or_group(
        &self,
        _id: TokenId,
        _group_id: Option<i64>,
    ) -> Result<u64, StoreError> {
        Err(StoreError::ReadOnly)
    }

    async fn delete_by_group(
        &self,
        _group_id: i64,
        _token_type: Option<TokenType>,
    ) -> Result<u64, StoreError> {
        Err(StoreError::ReadOnly)
    }

    async fn next_group_id(&self, _subject: &SubjectRef) -> Result<i64, StoreError> {
        Err(StoreError::ReadOnly)
    }

    async fn prune_expired(
        &self,
        _token_type: Option<TokenType>,
        _cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Err(StoreError::ReadOnly)
    }

    async fn run_in_transaction(&self, _work: TxWork) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }
}

// ── Tests ───────────────────────────────────────────────────────
