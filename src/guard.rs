use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::errors::{Error, StoreError};
use crate::events::{AuthEvent, EventSink};
use crate::revocation::GroupRevocation;
use crate::secret;
use crate::store::TokenStore;
use crate::token::{SubjectRef, Token, TokenType};

/// Request-scoped credential carrier: the headers to authenticate plus an
/// identity the guard memoizes outcomes against. Two `AuthRequest` values
/// are distinct requests even when their headers match.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    id: Uuid,
    headers: HeaderMap,
}

impl AuthRequest {
    pub fn from_headers(headers: HeaderMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            headers,
        }
    }

    pub fn empty() -> Self {
        Self::from_headers(HeaderMap::new())
    }

    /// Convenience constructor carrying `Authorization: Bearer <secret>`.
    pub fn bearer(secret: &str) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::try_from(format!("Bearer {secret}")) {
            headers.insert(AUTHORIZATION, value);
        }
        Self::from_headers(headers)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Secret carried in the standard bearer header, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
    }
}

/// Credential retrieval strategy. The default reads the bearer header;
/// inject another to pull secrets from cookies, query strings, etc.
pub trait CredentialExtractor: Send + Sync {
    fn extract(&self, request: &AuthRequest, expected: &TokenType) -> Option<String>;
}

/// Default strategy: `Authorization: Bearer <secret>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BearerExtractor;

impl CredentialExtractor for BearerExtractor {
    fn extract(&self, request: &AuthRequest, _expected: &TokenType) -> Option<String> {
        request.bearer_token().map(str::to_owned)
    }
}

/// Adapter so plain closures can serve as extraction strategies; see
/// [`AuthenticationGuard::with_extractor_fn`].
struct FnExtractor<F>(F);

impl<F> CredentialExtractor for FnExtractor<F>
where
    F: Fn(&AuthRequest, &TokenType) -> Option<String> + Send + Sync,
{
    fn extract(&self, request: &AuthRequest, expected: &TokenType) -> Option<String> {
        (self.0)(request, expected)
    }
}

/// Optional final authority over token validity. Receives the token and the
/// default activity verdict; whatever it returns wins.
pub trait ValidationOverride: Send + Sync {
    fn validate(&self, token: &Token, default_valid: bool) -> bool;
}

impl<F> ValidationOverride for F
where
    F: Fn(&Token, bool) -> bool + Send + Sync,
{
    fn validate(&self, token: &Token, default_valid: bool) -> bool {
        self(token, default_valid)
    }
}

/// Injected subject-repository capability: confirms the referenced
/// principal still exists and may authenticate.
#[async_trait]
pub trait SubjectResolver: Send + Sync {
    async fn resolve(&self, subject: &SubjectRef) -> Result<bool, StoreError>;
}

/// Outcome of an accepted authentication: the subject, with the token that
/// authenticated it attached.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub subject: SubjectRef,
    pub token: Token,
}

enum GuardState {
    Idle,
    Extracted(String),
    Resolved(Box<Token>),
    Accepted(Box<Authenticated>),
    Rejected,
}

/// Per-request authentication state machine, bound to one expected token
/// kind.
///
/// `Idle → Extracted → Resolved → {Accepted | Rejected}`. Binding a new
/// request resets the machine; once a request reaches a terminal state,
/// repeated calls return the memoized outcome without re-running
/// extraction, resolution or validation.
pub struct AuthenticationGuard {
    expected: TokenType,
    store: Arc<dyn TokenStore>,
    config: Arc<AuthConfig>,
    extractor: Arc<dyn CredentialExtractor>,
    validation: Option<Arc<dyn ValidationOverride>>,
    subjects: Option<Arc<dyn SubjectResolver>>,
    events: Arc<EventSink>,
    bound: Option<Uuid>,
    state: GuardState,
}

impl AuthenticationGuard {
    pub fn new(expected: TokenType, store: Arc<dyn TokenStore>, config: Arc<AuthConfig>) -> Self {
        Self {
            expected,
            store,
            config,
            extractor: Arc::new(BearerExtractor),
            validation: None,
            subjects: None,
            events: Arc::new(EventSink::new()),
            bound: None,
            state: GuardState::Idle,
        }
    }

    /// Bind to a kind named in configuration. Unknown names are a
    /// configuration fault raised here, never a silent "unauthenticated".
    pub fn for_type(
        name: &str,
        store: Arc<dyn TokenStore>,
        config: Arc<AuthConfig>,
    ) -> Result<Self, Error> {
        Ok(Self::new(TokenType::parse(name)?, store, config))
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn CredentialExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Closure form of [`with_extractor`](Self::with_extractor).
    pub fn with_extractor_fn(
        self,
        extractor: impl Fn(&AuthRequest, &TokenType) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.with_extractor(Arc::new(FnExtractor(extractor)))
    }

    pub fn with_validation_override(mut self, validation: Arc<dyn ValidationOverride>) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn with_subject_resolver(mut self, subjects: Arc<dyn SubjectResolver>) -> Self {
        self.subjects = Some(subjects);
        self
    }

    pub fn with_events(mut self, events: Arc<EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn expected_type(&self) -> &TokenType {
        &self.expected
    }

    /// Token attached by the last `Accepted` transition, if any.
    pub fn current_token(&self) -> Option<&Token> {
        match &self.state {
            GuardState::Accepted(auth) => Some(&auth.token),
            _ => None,
        }
    }

    /// Authenticate `request`. Rejection (missing credential, unknown or
    /// inactive token, detected reuse) is `Ok(None)`; the reasons are
    /// indistinguishable to the caller. Only store faults error.
    pub async fn authenticate(
        &mut self,
        request: &AuthRequest,
    ) -> Result<Option<Authenticated>, Error> {
        if self.bound != Some(request.id()) {
            self.bound = Some(request.id());
            self.state = GuardState::Idle;
        }
        loop {
            match &self.state {
                GuardState::Accepted(auth) => return Ok(Some(auth.as_ref().clone())),
                GuardState::Rejected => return Ok(None),
                _ => self.step(request).await?,
            }
        }
    }

    /// Check credentials on a fresh instance, without disturbing this
    /// guard's request binding or cached outcome.
    pub async fn validate(&self, request: &AuthRequest) -> Result<bool, Error> {
        let mut probe = self.fresh();
        Ok(probe.authenticate(request).await?.is_some())
    }

    fn fresh(&self) -> Self {
        Self {
            expected: self.expected.clone(),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            extractor: Arc::clone(&self.extractor),
            validation: self.validation.clone(),
            subjects: self.subjects.clone(),
            events: Arc::clone(&self.events),
            bound: None,
            state: GuardState::Idle,
        }
    }

    async fn step(&mut self, request: &AuthRequest) -> Result<(), Error> {
        let state = std::mem::replace(&mut self.state, GuardState::Idle);
        self.state = match state {
            GuardState::Idle => match self.extractor.extract(request, &self.expected) {
                Some(plaintext) => GuardState::Extracted(plaintext),
                None => {
                    tracing::debug!(expected = %self.expected, "no credential on request");
                    GuardState::Rejected
                }
            },
            GuardState::Extracted(plaintext) => {
                let hash = secret::hash_secret(&plaintext);
                match self
                    .store
                    .find_by_type_and_hash(Some(self.expected.clone()), &hash)
                    .await?
                {
                    Some(token) => GuardState::Resolved(Box::new(token)),
                    None => {
                        tracing::debug!(expected = %self.expected, "credential matches no token");
                        GuardState::Rejected
                    }
                }
            }
            GuardState::Resolved(token) => self.decide(*token).await?,
            terminal => terminal,
        };
        Ok(())
    }

    async fn decide(&self, mut token: Token) -> Result<GuardState, Error> {
        if token.revoked_at.is_some() {
            // Reuse event: a revoked credential coming back means the
            // family must be treated as stolen. Expiry alone never lands
            // here.
            self.events.emit(AuthEvent::RevokedTokenReused {
                token: token.clone(),
            });
            let removed = GroupRevocation::new(Arc::clone(&self.store))
                .delete_all_tokens_in_same_family(&token)
                .await?;
            tracing::warn!(
                token = %token.id,
                group = ?token.group_id,
                removed,
                "revoked token presented again; family deleted"
            );
            return Ok(GuardState::Rejected);
        }

        let default_valid = token.is_active();
        let valid = match &self.validation {
            Some(validation) => validation.validate(&token, default_valid),
            None => default_valid,
        };
        if !valid {
            tracing::debug!(token = %token.id, "token failed validation");
            return Ok(GuardState::Rejected);
        }

        if let Some(subjects) = &self.subjects {
            if !subjects.resolve(&token.subject).await? {
                tracing::debug!(subject = %token.subject, "token subject no longer resolvable");
                return Ok(GuardState::Rejected);
            }
        }

        token.last_used_at = Some(Utc::now());
        if self.config.track_last_used {
            self.store.save(&mut token).await?;
        }
        self.events.emit(AuthEvent::TokenAuthenticated {
            token: token.clone(),
        });
        let subject = token.subject.clone();
        Ok(GuardState::Accepted(Box::new(Authenticated {
            subject,
            token,
        })))
    }
}

// ── Tests ───────────────────────────────────────────────────────
