use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};

use crate::token::TokenType;

/// Engine configuration: per-kind default expirations, per-kind retention
/// windows for pruning, and the usage-tracking switch.
///
/// Constructed once at startup and passed into builders and guards; there
/// is no process-wide mutable configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Default token lifetime in minutes, per kind. Absent ⇒ never expires.
    expirations: HashMap<TokenType, i64>,
    /// Retention window in minutes, per kind, for the prune sweep.
    /// Absent ⇒ the kind is never pruned.
    retention: HashMap<TokenType, i64>,
    /// When false, successful authentication does not persist
    /// `last_used_at`.
    pub track_last_used: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            expirations: HashMap::new(),
            retention: HashMap::new(),
            track_last_used: true,
        }
    }
}

impl AuthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expiration(mut self, token_type: TokenType, minutes: i64) -> Self {
        self.expirations.insert(token_type, minutes);
        self
    }

    pub fn with_retention(mut self, token_type: TokenType, minutes: i64) -> Self {
        self.retention.insert(token_type, minutes);
        self
    }

    pub fn with_usage_tracking(mut self, enabled: bool) -> Self {
        self.track_last_used = enabled;
        self
    }

    /// Default lifetime for a kind, in minutes. `None` ⇒ never expires.
    pub fn expiration_minutes(&self, token_type: &TokenType) -> Option<i64> {
        self.expirations.get(token_type).copied()
    }

    /// Expiry a builder uses when the caller set none.
    pub fn default_expires_at(
        &self,
        token_type: &TokenType,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.expiration_minutes(token_type)
            .map(|minutes| now + Duration::minutes(minutes))
    }

    pub fn retention_minutes(&self, token_type: &TokenType) -> Option<i64> {
        self.retention.get(token_type).copied()
    }

    /// Per-kind cutoffs for the retention sweep: tokens expired or revoked
    /// before the cutoff are eligible for deletion.
    pub fn retention_cutoffs(&self, now: DateTime<Utc>) -> Vec<(TokenType, DateTime<Utc>)> {
        self.retention
            .iter()
            .map(|(token_type, minutes)| (token_type.clone(), now - Duration::minutes(*minutes)))
            .collect()
    }
}

/// Load configuration from the environment.
///
/// Recognized variables, all optional:
/// - `TOKENSMITH_ACCESS_EXPIRATION_MIN` / `TOKENSMITH_REFRESH_EXPIRATION_MIN`
/// - `TOKENSMITH_ACCESS_RETENTION_MIN` / `TOKENSMITH_REFRESH_RETENTION_MIN`
/// - `TOKENSMITH_TRACK_LAST_USED` (`0`/`false` to disable)
pub fn load() -> anyhow::Result<AuthConfig> {
    dotenvy::dotenv().ok();

    let mut config = AuthConfig::default();
    if let Some(minutes) = env_minutes("TOKENSMITH_ACCESS_EXPIRATION_MIN")? {
        config = config.with_expiration(TokenType::Access, minutes);
    }
    if let Some(minutes) = env_minutes("TOKENSMITH_REFRESH_EXPIRATION_MIN")? {
        config = config.with_expiration(TokenType::Refresh, minutes);
    }
    if let Some(minutes) = env_minutes("TOKENSMITH_ACCESS_RETENTION_MIN")? {
        config = config.with_retention(TokenType::Access, minutes);
    }
    if let Some(minutes) = env_minutes("TOKENSMITH_REFRESH_RETENTION_MIN")? {
        config = config.with_retention(TokenType::Refresh, minutes);
    }
    if let Ok(raw) = std::env::var("TOKENSMITH_TRACK_LAST_USED") {
        config.track_last_used = raw != "0" && !raw.eq_ignore_ascii_case("false");
    }

    Ok(config)
}

fn env_minutes(key: &str) -> anyhow::Result<Option<i64>> {
    match std::env::var(key) {
        Ok(raw) => {
            let minutes = raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("{key} must be an integer number of minutes"))?;
            Ok(Some(minutes))
        }
        Err(_) => Ok(None),
    }
}

// ── Tests ───────────────────────────────────────────────────────
