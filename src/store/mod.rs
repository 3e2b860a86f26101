pub mod memory;
pub mod postgres;
pub mod transient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::errors::StoreError;
use crate::token::{SubjectRef, Token, TokenId, TokenType};

/// Unit of work executed inside a store transaction. The closure receives a
/// transaction-scoped store; nested `run_in_transaction` calls on that
/// handle run inline in the same transaction.
pub type TxWork =
    Box<dyn for<'a> FnOnce(&'a dyn TokenStore) -> BoxFuture<'a, Result<(), StoreError>> + Send>;

/// Persistence boundary for tokens.
///
/// Implementations must keep `secret_hash` globally unique (surfacing a
/// collision as the retryable [`StoreError::Conflict`]) and keep lookup by
/// `(type, hash)` indexed. Deletes are idempotent: removing an
/// already-removed token or family is a no-op, never an error.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Look up a token by secret hash, optionally constrained to one kind.
    async fn find_by_type_and_hash(
        &self,
        token_type: Option<TokenType>,
        secret_hash: &str,
    ) -> Result<Option<Token>, StoreError>;

    /// Persist the token, assigning an id on first save.
    async fn save(&self, token: &mut Token) -> Result<(), StoreError>;

    async fn delete(&self, token: &Token) -> Result<(), StoreError>;

    /// Delete the token with `id` plus, when `group_id` is present, every
    /// token sharing that group. One conditional statement, so two
    /// concurrent reuse cascades cannot interleave a read-then-delete.
    async fn delete_by_id_or_group(
        &self,
        id: TokenId,
        group_id: Option<i64>,
    ) -> Result<u64, StoreError>;

    /// Delete all tokens in a group, optionally restricted to one kind.
    async fn delete_by_group(
        &self,
        group_id: i64,
        token_type: Option<TokenType>,
    ) -> Result<u64, StoreError>;

    /// Next free group id for a subject: `max(existing) + 1`, or 1 when the
    /// subject has no grouped tokens.
    async fn next_group_id(&self, subject: &SubjectRef) -> Result<i64, StoreError>;

    /// Delete tokens whose expiry or revocation predates `cutoff`,
    /// optionally restricted to one kind. The selection predicate for the
    /// external pruning collaborator.
    async fn prune_expired(
        &self,
        token_type: Option<TokenType>,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Run `work` atomically: every store call made through the handle it
    /// receives commits together or not at all.
    async fn run_in_transaction(&self, work: TxWork) -> Result<(), StoreError>;
}
