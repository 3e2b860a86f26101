use thiserror::Error;

/// Caller-facing error taxonomy.
///
/// Failed authentication is never an error; the guard reports it as
/// `Ok(None)`. These variants cover caller bugs and configuration faults,
/// which fail fast, plus store faults, which propagate unchanged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token type: {0:?}")]
    InvalidTokenType(String),

    #[error("access and refresh abilities differ")]
    AbilitiesMismatch,

    #[error("missing ability: {0}")]
    MissingAbility(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Faults crossing the persistence boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique secret-hash collision. Retryable: regenerate the secret.
    #[error("secret hash already exists")]
    Conflict,

    /// Mutation attempted on a read-only store (the transient test double).
    #[error("store is read-only")]
    ReadOnly,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
