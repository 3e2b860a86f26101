use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{TokenStore, TxWork};
use crate::errors::StoreError;
use crate::token::{SubjectRef, Token, TokenId, TokenType};

/// In-memory store for tests and embedded use.
///
/// Transactions are snapshot/rollback and not serializable under
/// concurrent writers; the Postgres backend is the concurrency-bearing
/// implementation.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tokens: Arc<Mutex<HashMap<TokenId, Token>>>,
    in_tx: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Fetch a token by id, mainly for assertions in tests.
    pub fn get(&self, id: TokenId) -> Option<Token> {
        self.lock().get(&id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TokenId, Token>> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn find_by_type_and_hash(
        &self,
        token_type: Option<TokenType>,
        secret_hash: &str,
    ) -> Result<Option<Token>, StoreError> {
        let tokens = self.lock();
        Ok(tokens
            .values()
            .find(|t| {
                t.secret_hash == secret_hash
                    && token_type.as_ref().map_or(true, |kind| &t.token_type == kind)
            })
            .cloned())
    }

    async fn save(&self, token: &mut Token) -> Result<(), StoreError> {
        let mut tokens = self.lock();
        let collision = tokens
            .values()
            .any(|t| t.secret_hash == token.secret_hash && t.id != token.id);
        if collision {
            return Err(StoreError::Conflict);
        }
        if token.id.is_nil() {
            token.id = TokenId::generate();
        }
        token.updated_at = Utc::now();
        tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn delete(&self, token: &Token) -> Result<(), StoreError> {
        self.lock().remove(&token.id);
        Ok(())
    }

    async fn delete_by_id_or_group(
        &self,
        id: TokenId,
        group_id: Option<i64>,
    ) -> Result<u64, StoreError> {
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|token_id, token| {
            let in_family =
                *token_id == id || (group_id.is_some() && token.group_id == group_id);
            !in_family
        });
        Ok((before - tokens.len()) as u64)
    }

    async fn delete_by_group(
        &self,
        group_id: i64,
        token_type: Option<TokenType>,
    ) -> Result<u64, StoreError> {
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, token| {
            let matches = token.group_id == Some(group_id)
                && token_type.as_ref().map_or(true, |kind| &token.token_type == kind);
            !matches
        });
        Ok((before - tokens.len()) as u64)
    }

    async fn next_group_id(&self, subject: &SubjectRef) -> Result<i64, StoreError> {
        let tokens = self.lock();
        let max = tokens
            .values()
            .filter(|t| &t.subject == subject)
            .filter_map(|t| t.group_id)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn prune_expired(
        &self,
        token_type: Option<TokenType>,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, token| {
            let kind_matches = token_type
                .as_ref()
                .map_or(true, |kind| &token.token_type == kind);
            let stale = token.expires_at.map_or(false, |at| at <= cutoff)
                || token.revoked_at.map_or(false, |at| at <= cutoff);
            !(kind_matches && stale)
        });
        Ok((before - tokens.len()) as u64)
    }

    async fn run_in_transaction(&self, work: TxWork) -> Result<(), StoreError> {
        if self.in_tx {
            return work(self).await;
        }
        let snapshot = self.lock().clone();
        let scoped = MemoryStore {
            tokens: Arc::clone(&self.tokens),
            in_tx: true,
        };
        match work(&scoped).await {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.lock() = snapshot;
                Err(e)
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
