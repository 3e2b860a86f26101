use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::abilities::AbilitySet;
use crate::config::AuthConfig;
use crate::errors::Error;
use crate::secret::{self, PlaintextSecret};
use crate::store::TokenStore;
use crate::token::{NewToken, SubjectRef, Token, TokenId, TokenType};

/// Fluent builder for a single token.
///
/// Setters are pure field writes, validated lazily when the token is
/// materialized. Unset fields resolve to defaults at that point: a random
/// 64-character secret, the configured per-kind expiry (absent config ⇒
/// never expires) and the wildcard ability set.
pub struct TokenBuilder {
    config: Arc<AuthConfig>,
    token_type: TokenType,
    subject: Option<SubjectRef>,
    group_id: Option<i64>,
    name: Option<String>,
    abilities: Option<AbilitySet>,
    /// Outer `None` = unset (use config default); `Some(None)` = pinned to
    /// never expire.
    expires_at: Option<Option<DateTime<Utc>>>,
    /// Plaintext plus its eagerly-computed digest.
    secret: Option<(PlaintextSecret, String)>,
}

impl TokenBuilder {
    pub fn new(token_type: TokenType, config: Arc<AuthConfig>) -> Self {
        Self {
            config,
            token_type,
            subject: None,
            group_id: None,
            name: None,
            abilities: None,
            expires_at: None,
            secret: None,
        }
    }

    /// Bind the kind from a configuration string; unknown names fail with
    /// [`Error::InvalidTokenType`] before anything else happens.
    pub fn for_type(name: &str, config: Arc<AuthConfig>) -> Result<Self, Error> {
        Ok(Self::new(TokenType::parse(name)?, config))
    }

    pub fn subject(mut self, subject: SubjectRef) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn group_id(mut self, group_id: i64) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn abilities(mut self, abilities: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.abilities = Some(AbilitySet::new(abilities));
        self
    }

    /// Explicit expiry. `None` pins the token to never expire, overriding
    /// any configured default.
    pub fn expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Use a caller-supplied secret. The digest is computed immediately;
    /// the plaintext lives only inside the builder until build returns it.
    pub fn secret(mut self, plaintext: &str) -> Self {
        let hash = secret::hash_secret(plaintext);
        self.secret = Some((PlaintextSecret::new(plaintext.to_string()), hash));
        self
    }

    pub(crate) fn subject_ref(&self) -> Option<&SubjectRef> {
        self.subject.as_ref()
    }

    /// Ability set this builder will issue, defaults applied.
    pub(crate) fn ability_set(&self) -> AbilitySet {
        self.abilities.clone().unwrap_or_else(AbilitySet::wildcard)
    }

    /// Materialize the token without persisting it. The id stays nil until
    /// a store assigns one.
    pub fn assemble(self) -> Result<NewToken, Error> {
        let subject = self
            .subject
            .ok_or(Error::InvalidArgument("token subject is required"))?;
        let now = Utc::now();
        let (plaintext, hash) = self.secret.unwrap_or_else(|| {
            let generated = secret::generate_secret();
            let digest = secret::hash_secret(generated.expose());
            (generated, digest)
        });
        let expires_at = match self.expires_at {
            Some(explicit) => explicit,
            None => self.config.default_expires_at(&self.token_type, now),
        };

        let token = Token {
            id: TokenId::nil(),
            token_type: self.token_type,
            subject,
            group_id: self.group_id,
            name: self.name,
            secret_hash: hash,
            abilities: self.abilities.unwrap_or_else(AbilitySet::wildcard),
            revoked_at: None,
            expires_at,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        Ok(NewToken {
            token,
            secret: plaintext,
        })
    }

    /// Materialize and persist. Store failures (including the retryable
    /// secret-hash conflict) propagate unchanged.
    pub async fn build(self, store: &dyn TokenStore) -> Result<NewToken, Error> {
        let mut fresh = self.assemble()?;
        store.save(&mut fresh.token).await?;
        Ok(fresh)
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::Duration;

    fn config() -> Arc<AuthConfig> {
        Arc::new(AuthConfig::default())
    }

    #[test]
    fn test_for_type_rejects_invalid_names() {
        assert!(matches!(
            TokenBuilder::for_type("Not A Type", config()),
            Err(Error::InvalidTokenType(_))
        ));
        assert!(TokenBuilder::for_type("access", config()).is_ok());
    }

    #[test]
    fn test_assemble_requires_a_subject() {
        let result = TokenBuilder::new(TokenType::Access, config()).assemble();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_generated_secret_matches_stored_hash() {
        let fresh = TokenBuilder::new(TokenType::Access, config())
            .subject(SubjectRef::new("user", "1"))
            .assemble()
            .unwrap();
        assert_eq!(fresh.secret.expose().len(), secret::SECRET_LEN);
        assert_eq!(
            fresh.token.secret_hash,
            secret::hash_secret(fresh.secret.expose())
        );
    }

    #[test]
    fn test_explicit_secret_is_hashed_and_returned() {
        let fresh = TokenBuilder::new(TokenType::Access, config())
            .subject(SubjectRef::new("user", "1"))
            .secret("chosen-by-caller")
            .assemble()
            .unwrap();
        assert_eq!(fresh.secret.expose(), "chosen-by-caller");
        assert_eq!(
            fresh.token.secret_hash,
            secret::hash_secret("chosen-by-caller")
        );
    }

    #[test]
    fn test_config_expiration_applies_when_unset() {
        let config = Arc::new(AuthConfig::default().with_expiration(TokenType::Access, 10));
        let before = Utc::now();
        let fresh = TokenBuilder::new(TokenType::Access, config)
            .subject(SubjectRef::new("user", "1"))
            .abilities(["*"])
            .assemble()
            .unwrap();
        let after = Utc::now();

        let expires_at = fresh.token.expires_at.expect("config expiry applies");
        assert!(expires_at >= before + Duration::minutes(10));
        assert!(expires_at <= after + Duration::minutes(10));
    }

    #[test]
    fn test_explicit_never_expires_beats_config_default() {
        let config = Arc::new(AuthConfig::default().with_expiration(TokenType::Access, 10));
        let fresh = TokenBuilder::new(TokenType::Access, config)
            .subject(SubjectRef::new("user", "1"))
            .expires_at(None)
            .assemble()
            .unwrap();
        assert_eq!(fresh.token.expires_at, None);
    }

    #[test]
    fn test_abilities_default_to_wildcard() {
        let fresh = TokenBuilder::new(TokenType::Access, config())
            .subject(SubjectRef::new("user", "1"))
            .assemble()
            .unwrap();
        assert!(fresh.token.can("anything"));
    }

    #[tokio::test]
    async fn test_build_persists_and_assigns_an_id() {
        let store = MemoryStore::new();
        let fresh = TokenBuilder::new(TokenType::Access, config())
            .subject(SubjectRef::new("user", "1"))
            .name("laptop")
            .build(&store)
            .await
            .unwrap();

        assert!(fresh.token.is_persisted());
        let found = store
            .find_by_type_and_hash(Some(TokenType::Access), &fresh.token.secret_hash)
            .await
            .unwrap()
            .expect("token was saved");
        assert_eq!(found.name.as_deref(), Some("laptop"));
    }
}
