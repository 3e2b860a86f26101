use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::builder::TokenBuilder;
use crate::config::AuthConfig;
use crate::errors::{Error, StoreError};
use crate::store::TokenStore;
use crate::token::{NewToken, NewTokenPair, SubjectRef, Token, TokenType};

/// Hook run on the not-yet-persisted pair, inside the save transaction,
/// before either token is written. Hooks may mutate both tokens, e.g. to
/// cross-link identifiers.
pub type PairHook = Box<dyn FnOnce(&mut Token, &mut Token) + Send>;

/// Builds an access + refresh pair under the pairing invariants: set-equal
/// abilities, shared subject/group/name, atomic persistence.
///
/// Mutating setters fan out to both inner builders. There is no pair-level
/// kind or secret setter; both are per-token concerns that the pair fixes
/// by construction. Per-side adjustments go through [`map_access`] /
/// [`map_refresh`]; the pairing invariants are still validated at build
/// time.
///
/// [`map_access`]: Self::map_access
/// [`map_refresh`]: Self::map_refresh
pub struct TokenPairBuilder {
    access: TokenBuilder,
    refresh: TokenBuilder,
    hooks: Vec<PairHook>,
}

impl TokenPairBuilder {
    pub fn new(config: Arc<AuthConfig>) -> Self {
        Self {
            access: TokenBuilder::new(TokenType::Access, Arc::clone(&config)),
            refresh: TokenBuilder::new(TokenType::Refresh, config),
            hooks: Vec::new(),
        }
    }

    /// Seed a pair from an existing token: subject, group, name and
    /// abilities carry over. Expirations do not; the new pair picks up
    /// explicit or configured expiries. Used by rotation.
    pub fn from_token(existing: &Token, config: Arc<AuthConfig>) -> Self {
        let mut builder = Self::new(config)
            .subject(existing.subject.clone())
            .abilities(existing.abilities.iter());
        if let Some(group) = existing.group_id {
            builder = builder.group_id(group);
        }
        if let Some(name) = &existing.name {
            builder = builder.name(name.clone());
        }
        builder
    }

    pub fn subject(mut self, subject: SubjectRef) -> Self {
        self.access = self.access.subject(subject.clone());
        self.refresh = self.refresh.subject(subject);
        self
    }

    pub fn group_id(mut self, group_id: i64) -> Self {
        self.access = self.access.group_id(group_id);
        self.refresh = self.refresh.group_id(group_id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.access = self.access.name(name.clone());
        self.refresh = self.refresh.name(name);
        self
    }

    pub fn abilities(mut self, abilities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let list: Vec<String> = abilities.into_iter().map(Into::into).collect();
        self.access = self.access.abilities(list.clone());
        self.refresh = self.refresh.abilities(list);
        self
    }

    /// Shared expiry for both tokens; `None` pins both to never expire.
    pub fn expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.access = self.access.expires_at(expires_at);
        self.refresh = self.refresh.expires_at(expires_at);
        self
    }

    pub fn access_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.access = self.access.expires_at(expires_at);
        self
    }

    pub fn refresh_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.refresh = self.refresh.expires_at(expires_at);
        self
    }

    /// Adjust the access-side builder directly.
    pub fn map_access(mut self, f: impl FnOnce(TokenBuilder) -> TokenBuilder) -> Self {
        self.access = f(self.access);
        self
    }

    /// Adjust the refresh-side builder directly.
    pub fn map_refresh(mut self, f: impl FnOnce(TokenBuilder) -> TokenBuilder) -> Self {
        self.refresh = f(self.refresh);
        self
    }

    /// Reserve the subject's next group id and attach it to both tokens.
    /// Group ids are never assigned implicitly; this is the explicit
    /// generation operation.
    pub async fn assign_new_group(self, store: &dyn TokenStore) -> Result<Self, Error> {
        let subject = self
            .access
            .subject_ref()
            .ok_or(Error::InvalidArgument("token subject is required"))?
            .clone();
        let group = store.next_group_id(&subject).await?;
        Ok(self.group_id(group))
    }

    /// Register a before-save hook. Hooks run in registration order, all
    /// before persistence, all within the same transaction.
    pub fn before_build_save(
        mut self,
        hook: impl FnOnce(&mut Token, &mut Token) + Send + 'static,
    ) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Validate the pairing invariants, materialize both tokens and persist
    /// them atomically. On any failure the store ends up with neither.
    pub async fn build_pair(self, store: &dyn TokenStore) -> Result<NewTokenPair, Error> {
        Ok(self.prepare()?.persist(store).await?)
    }

    /// Validation and assembly without touching the store. Split out so
    /// rotation can persist the pair inside its own transaction.
    pub(crate) fn prepare(self) -> Result<PreparedPair, Error> {
        if self.access.ability_set() != self.refresh.ability_set() {
            return Err(Error::AbilitiesMismatch);
        }
        let access = self.access.assemble()?;
        let refresh = self.refresh.assemble()?;
        Ok(PreparedPair {
            access,
            refresh,
            hooks: self.hooks,
        })
    }
}

/// An assembled, not-yet-persisted pair plus its pending hooks.
pub(crate) struct PreparedPair {
    access: NewToken,
    refresh: NewToken,
    hooks: Vec<PairHook>,
}

impl PreparedPair {
    /// Persist both tokens atomically. Hooks run first, inside the same
    /// transaction.
    pub(crate) async fn persist(self, store: &dyn TokenStore) -> Result<NewTokenPair, StoreError> {
        let PreparedPair {
            access,
            refresh,
            hooks,
        } = self;
        let NewToken {
            token: mut access_token,
            secret: access_secret,
        } = access;
        let NewToken {
            token: mut refresh_token,
            secret: refresh_secret,
        } = refresh;

        let saved: Arc<Mutex<Option<(Token, Token)>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&saved);
        store
            .run_in_transaction(Box::new(move |tx| {
                Box::pin(async move {
                    for hook in hooks {
                        hook(&mut access_token, &mut refresh_token);
                    }
                    tx.save(&mut access_token).await?;
                    tx.save(&mut refresh_token).await?;
                    let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    *slot = Some((access_token, refresh_token));
                    Ok(())
                })
            }))
            .await?;

        let mut saved = saved.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (access_token, refresh_token) = saved.take().ok_or_else(|| {
            StoreError::Internal(anyhow::anyhow!("transaction committed without a saved pair"))
        })?;
        Ok(NewTokenPair {
            access: NewToken {
                token: access_token,
                secret: access_secret,
            },
            refresh: NewToken {
                token: refresh_token,
                secret: refresh_secret,
            },
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn config() -> Arc<AuthConfig> {
        Arc::new(AuthConfig::default())
    }

    #[tokio::test]
    async fn test_pair_shares_subject_group_name_and_abilities() {
        let store = MemoryStore::new();
        let pair = TokenPairBuilder::new(config())
            .subject(SubjectRef::new("user", "1"))
            .group_id(7)
            .name("cli")
            .abilities(["view", "edit"])
            .build_pair(&store)
            .await
            .unwrap();

        assert_eq!(pair.access.token.token_type, TokenType::Access);
        assert_eq!(pair.refresh.token.token_type, TokenType::Refresh);
        assert_eq!(pair.access.token.group_id, Some(7));
        assert_eq!(pair.refresh.token.group_id, Some(7));
        assert_eq!(pair.access.token.name.as_deref(), Some("cli"));
        assert_eq!(pair.refresh.token.name.as_deref(), Some("cli"));
        assert_eq!(pair.access.token.abilities, pair.refresh.token.abilities);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_unequal_abilities_fail_and_persist_nothing() {
        let store = MemoryStore::new();
        let result = TokenPairBuilder::new(config())
            .subject(SubjectRef::new("user", "1"))
            .abilities(["view"])
            .map_access(|b| b.abilities(["admin"]))
            .build_pair(&store)
            .await;

        assert!(matches!(result, Err(Error::AbilitiesMismatch)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_ability_equality_is_order_insensitive() {
        let store = MemoryStore::new();
        let result = TokenPairBuilder::new(config())
            .subject(SubjectRef::new("user", "1"))
            .abilities(["view", "edit"])
            .map_access(|b| b.abilities(["edit", "view"]))
            .build_pair(&store)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order_before_save() {
        let store = MemoryStore::new();
        let pair = TokenPairBuilder::new(config())
            .subject(SubjectRef::new("user", "1"))
            .before_build_save(|access, _refresh| {
                access.name = Some("first".to_string());
            })
            .before_build_save(|access, refresh| {
                // sees the previous hook's write; cross-links the pair
                refresh.name = access.name.clone();
                access.name = Some("second".to_string());
            })
            .build_pair(&store)
            .await
            .unwrap();

        assert_eq!(pair.access.token.name.as_deref(), Some("second"));
        assert_eq!(pair.refresh.token.name.as_deref(), Some("first"));

        let stored = store.get(pair.access.token.id).expect("persisted");
        assert_eq!(stored.name.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_failed_refresh_save_rolls_back_the_access_token() {
        let store = MemoryStore::new();
        let occupant = TokenBuilder::new(TokenType::Access, config())
            .subject(SubjectRef::new("user", "9"))
            .secret("occupied")
            .build(&store)
            .await
            .unwrap();

        // Force the refresh insert to collide after the access insert
        // succeeded; the whole pair must vanish.
        let taken = occupant.token.secret_hash.clone();
        let result = TokenPairBuilder::new(config())
            .subject(SubjectRef::new("user", "1"))
            .before_build_save(move |_access, refresh| {
                refresh.secret_hash = taken;
            })
            .build_pair(&store)
            .await;

        assert!(matches!(
            result,
            Err(Error::Store(StoreError::Conflict))
        ));
        assert_eq!(store.len(), 1, "only the pre-existing token survives");
    }

    #[tokio::test]
    async fn test_assign_new_group_uses_the_subject_counter() {
        let store = MemoryStore::new();
        let first = TokenPairBuilder::new(config())
            .subject(SubjectRef::new("user", "1"))
            .assign_new_group(&store)
            .await
            .unwrap()
            .build_pair(&store)
            .await
            .unwrap();
        assert_eq!(first.group_id(), Some(1));

        let second = TokenPairBuilder::new(config())
            .subject(SubjectRef::new("user", "1"))
            .assign_new_group(&store)
            .await
            .unwrap()
            .build_pair(&store)
            .await
            .unwrap();
        assert_eq!(second.group_id(), Some(2));
    }

    #[tokio::test]
    async fn test_from_token_copies_identity_fields() {
        let store = MemoryStore::new();
        let seed = TokenBuilder::new(TokenType::Refresh, config())
            .subject(SubjectRef::new("user", "5"))
            .group_id(3)
            .name("phone")
            .abilities(["view"])
            .build(&store)
            .await
            .unwrap();

        let pair = TokenPairBuilder::from_token(&seed.token, config())
            .build_pair(&store)
            .await
            .unwrap();

        assert_eq!(pair.access.token.subject, seed.token.subject);
        assert_eq!(pair.group_id(), Some(3));
        assert_eq!(pair.refresh.token.name.as_deref(), Some("phone"));
        assert_eq!(pair.refresh.token.abilities, seed.token.abilities);
    }
}
