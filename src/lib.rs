//! Token lifecycle and authentication engine.
//!
//! Issues, validates, rotates and revokes bearer credentials on behalf of a
//! subject. Access and refresh tokens can be linked into a group so that a
//! detected reuse of a revoked credential invalidates the whole family.
//!
//! Persistence sits behind the [`store::TokenStore`] trait; HTTP wiring,
//! console commands and event delivery stay outside this crate.

pub mod abilities;
pub mod builder;
pub mod config;
pub mod errors;
pub mod events;
pub mod guard;
pub mod jobs;
pub mod pair;
pub mod revocation;
pub mod rotation;
pub mod secret;
pub mod store;
pub mod token;

pub use abilities::AbilitySet;
pub use builder::TokenBuilder;
pub use config::AuthConfig;
pub use errors::{Error, StoreError};
pub use events::{AuthEvent, EventSink};
pub use guard::{
    Authenticated, AuthenticationGuard, AuthRequest, BearerExtractor, CredentialExtractor,
    SubjectResolver, ValidationOverride,
};
pub use pair::TokenPairBuilder;
pub use revocation::GroupRevocation;
pub use rotation::{RotationExpirations, Rotator};
pub use secret::PlaintextSecret;
pub use store::TokenStore;
pub use token::{NewToken, NewTokenPair, SubjectRef, Token, TokenId, TokenType};
