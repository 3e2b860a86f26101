use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Length of a generated plaintext secret.
pub const SECRET_LEN: usize = 64;

/// One-time plaintext secret, handed out exactly once at creation time.
/// The backing string is zeroized on drop and never printed.
#[derive(Clone)]
pub struct PlaintextSecret(Zeroizing<String>);

impl PlaintextSecret {
    pub(crate) fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PlaintextSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlaintextSecret(redacted)")
    }
}

/// Generate a fresh 64-character alphanumeric secret from the OS RNG.
pub fn generate_secret() -> PlaintextSecret {
    let raw: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect();
    PlaintextSecret::new(raw)
}

/// Hex SHA-256 digest of a plaintext secret. The digest, never the
/// plaintext, is what gets stored and indexed.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secret_has_expected_length() {
        let secret = generate_secret();
        assert_eq!(secret.expose().len(), SECRET_LEN);
        assert!(secret.expose().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_secrets_differ() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_secret("abc"), hash_secret("abc"));
        assert_ne!(hash_secret("abc"), hash_secret("abd"));
    }

    #[test]
    fn test_hash_is_fixed_length_hex() {
        let digest = hash_secret("anything");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_debug_never_prints_plaintext() {
        let secret = generate_secret();
        let printed = format!("{:?}", secret);
        assert!(!printed.contains(secret.expose()));
    }
}
