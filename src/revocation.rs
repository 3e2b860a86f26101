use std::sync::Arc;

use crate::errors::StoreError;
use crate::store::TokenStore;
use crate::token::{Token, TokenType};

/// Cascading group deletion, used by reuse detection and rotation cleanup.
///
/// Both operations are idempotent: cascading an already-deleted family is
/// a no-op, so two concurrent reuse detections racing on the same group
/// converge on the same end state.
pub struct GroupRevocation {
    store: Arc<dyn TokenStore>,
}

impl GroupRevocation {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Delete every token in `group_id`, optionally one kind only.
    pub async fn delete_tokens_from_group(
        &self,
        group_id: i64,
        token_type: Option<TokenType>,
    ) -> Result<u64, StoreError> {
        let removed = self.store.delete_by_group(group_id, token_type).await?;
        tracing::debug!(group = group_id, removed, "group revocation");
        Ok(removed)
    }

    /// Delete the token itself plus, when grouped, every token sharing its
    /// group, so an ungrouped token still removes itself.
    pub async fn delete_all_tokens_in_same_family(
        &self,
        token: &Token,
    ) -> Result<u64, StoreError> {
        self.store
            .delete_by_id_or_group(token.id, token.group_id)
            .await
    }
}
