use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::abilities::AbilitySet;
use crate::errors::Error;
use crate::secret::PlaintextSecret;

/// Token kind. `access` and `refresh` cooperate as a pair; anything else is
/// admitted as a custom kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TokenType {
    Access,
    Refresh,
    Custom(String),
}

impl TokenType {
    /// Parse a kind from a configuration string. Unknown names must be
    /// lowercase identifiers (`[a-z0-9_-]`); anything else fails with
    /// [`Error::InvalidTokenType`].
    pub fn parse(name: &str) -> Result<Self, Error> {
        let name = name.trim();
        match name {
            "access" => Ok(Self::Access),
            "refresh" => Ok(Self::Refresh),
            "" => Err(Error::InvalidTokenType(String::new())),
            other => {
                let valid = other
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
                if valid {
                    Ok(Self::Custom(other.to_string()))
                } else {
                    Err(Error::InvalidTokenType(other.to_string()))
                }
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TokenType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<TokenType> for String {
    fn from(token_type: TokenType) -> Self {
        match token_type {
            TokenType::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl TryFrom<String> for TokenType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// Opaque token identifier, assigned by the store on first save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(Uuid);

impl TokenId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub(crate) fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Polymorphic reference to the owning principal: a type tag plus an id,
/// resolved through an injected subject-repository capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    pub kind: String,
    pub id: String,
}

impl SubjectRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// The persisted credential record. The plaintext secret is never stored;
/// only its hash is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub token_type: TokenType,
    pub subject: SubjectRef,
    /// Tokens sharing a group are rotated and revoked together.
    pub group_id: Option<i64>,
    pub name: Option<String>,
    pub secret_hash: String,
    pub abilities: AbilitySet,
    /// Soft revocation. Once set the token is permanently inactive; it is
    /// not deleted until a reuse cascade or prune removes it.
    pub revoked_at: Option<DateTime<Utc>>,
    /// `None` means the token never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Token {
    /// Active iff not revoked and not past expiry.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |expires| expires > now)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn can(&self, ability: &str) -> bool {
        self.abilities.has_ability(ability)
    }

    pub fn revoke(&mut self) {
        if self.revoked_at.is_none() {
            self.revoked_at = Some(Utc::now());
        }
    }

    pub fn is_persisted(&self) -> bool {
        !self.id.is_nil()
    }
}

/// A freshly built token together with its one-time plaintext secret.
/// The plaintext is not retrievable after this value is dropped.
#[derive(Debug)]
pub struct NewToken {
    pub token: Token,
    pub secret: PlaintextSecret,
}

/// An access + refresh pair created or rotated atomically.
#[derive(Debug)]
pub struct NewTokenPair {
    pub access: NewToken,
    pub refresh: NewToken,
}

impl NewTokenPair {
    pub fn group_id(&self) -> Option<i64> {
        self.access.token.group_id
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_token() -> Token {
        let now = Utc::now();
        Token {
            id: TokenId::nil(),
            token_type: TokenType::Access,
            subject: SubjectRef::new("user", "42"),
            group_id: None,
            name: None,
            secret_hash: crate::secret::hash_secret("sample"),
            abilities: AbilitySet::wildcard(),
            revoked_at: None,
            expires_at: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_token_without_expiry_is_active() {
        let token = sample_token();
        assert!(token.is_active());
    }

    #[test]
    fn test_future_expiry_is_active_past_expiry_is_not() {
        let now = Utc::now();
        let mut token = sample_token();
        token.expires_at = Some(now + Duration::minutes(5));
        assert!(token.is_active_at(now));
        assert!(!token.is_active_at(now + Duration::minutes(6)));
    }

    #[test]
    fn test_expiry_boundary_is_inactive() {
        let now = Utc::now();
        let mut token = sample_token();
        token.expires_at = Some(now);
        assert!(!token.is_active_at(now));
    }

    #[test]
    fn test_revoked_token_is_inactive_even_without_expiry() {
        let mut token = sample_token();
        token.revoke();
        assert!(!token.is_active());
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let mut token = sample_token();
        token.revoke();
        let first = token.revoked_at;
        token.revoke();
        assert_eq!(token.revoked_at, first);
    }

    #[test]
    fn test_token_type_parse_round_trip() {
        assert_eq!(TokenType::parse("access").unwrap(), TokenType::Access);
        assert_eq!(TokenType::parse("refresh").unwrap(), TokenType::Refresh);
        assert_eq!(
            TokenType::parse("cli-session").unwrap(),
            TokenType::Custom("cli-session".to_string())
        );
    }

    #[test]
    fn test_token_type_rejects_garbage() {
        assert!(matches!(
            TokenType::parse(""),
            Err(Error::InvalidTokenType(_))
        ));
        assert!(matches!(
            TokenType::parse("Not A Type"),
            Err(Error::InvalidTokenType(_))
        ));
    }

    #[test]
    fn test_token_type_serde_as_string() {
        let json = serde_json::to_string(&TokenType::Refresh).unwrap();
        assert_eq!(json, "\"refresh\"");
        let parsed: TokenType = serde_json::from_str("\"cli-session\"").unwrap();
        assert_eq!(parsed, TokenType::Custom("cli-session".to_string()));
        assert!(serde_json::from_str::<TokenType>("\"Not A Type\"").is_err());
    }
}
