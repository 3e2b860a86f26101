use chrono::Utc;
use serde_json::json;

use crate::token::Token;

/// Notification emitted by the engine. Fire-and-forget: observers (audit
/// logging, metrics, webhooks) subscribe via [`EventSink`]; delivery
/// guarantees are their concern, not this crate's.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// A token passed validation and authenticated its subject.
    TokenAuthenticated { token: Token },
    /// An already-revoked token was presented again, likely credential
    /// theft. The family cascade has been triggered.
    RevokedTokenReused { token: Token },
}

impl AuthEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TokenAuthenticated { .. } => "token_authenticated",
            Self::RevokedTokenReused { .. } => "revoked_token_reused",
        }
    }

    pub fn token(&self) -> &Token {
        match self {
            Self::TokenAuthenticated { token } | Self::RevokedTokenReused { token } => token,
        }
    }

    /// Structured payload for external observers.
    pub fn payload(&self) -> serde_json::Value {
        let token = self.token();
        json!({
            "event_type": self.event_type(),
            "timestamp": Utc::now().to_rfc3339(),
            "token_id": token.id.to_string(),
            "token_type": token.token_type.as_str(),
            "token_name": token.name.clone(),
            "subject": token.subject.to_string(),
            "group_id": token.group_id,
        })
    }
}

type Listener = Box<dyn Fn(&AuthEvent) + Send + Sync>;

/// Synchronous observer list. Subscribe everything at startup, then share
/// the sink behind an `Arc`; the engine never mutates it afterwards.
#[derive(Default)]
pub struct EventSink {
    listeners: Vec<Listener>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl Fn(&AuthEvent) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn emit(&self, event: AuthEvent) {
        tracing::debug!(
            event_type = event.event_type(),
            token = %event.token().id,
            "auth event"
        );
        for listener in &self.listeners {
            listener(&event);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
