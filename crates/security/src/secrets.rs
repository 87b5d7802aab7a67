//! Signing key for bearer tokens.
//!
//! A bearer is `<token_id>.<signature>` where the signature is
//! HMAC-SHA256 of the token id, base64url without padding. Verification is
//! constant-time via `Mac::verify_slice`.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Length of a generated key, in bytes.
const GENERATED_KEY_LEN: usize = 32;

/// HMAC key that signs and verifies bearer strings.
#[derive(Clone)]
pub struct SigningKey {
    mac: HmacSha256,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey").field("key", &"[REDACTED]").finish()
    }
}

impl SigningKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: &[u8]) -> Result<Self, SecretError> {
        if key.is_empty() {
            return Err(SecretError::InvalidKey("key is empty".into()));
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| SecretError::InvalidKey(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Create a key from a configured secret string.
    pub fn from_secret(secret: &str) -> Result<Self, SecretError> {
        Self::from_bytes(secret.as_bytes())
    }

    /// Create a fresh random key.
    pub fn generate() -> Result<Self, SecretError> {
        Self::from_bytes(&random_key())
    }

    /// Load the hex key stored at `path`, creating it on first use.
    pub fn load_or_create(path: &Path) -> Result<Self, SecretError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| SecretError::Io(format!("{}: {e}", path.display())))?;
            let key = hex::decode(content.trim())
                .map_err(|e| SecretError::InvalidKey(format!("{}: {e}", path.display())))?;
            return Self::from_bytes(&key);
        }

        let key = random_key();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SecretError::Io(format!("{}: {e}", parent.display())))?;
        }
        std::fs::write(path, hex::encode(&key))
            .map_err(|e| SecretError::Io(format!("{}: {e}", path.display())))?;
        restrict_permissions(path)?;
        tracing::info!("Generated token signing key at {}", path.display());
        Self::from_bytes(&key)
    }

    /// Signature over `message`.
    pub fn sign(&self, message: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(message.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of `signature` against `message`.
    pub fn verify(&self, message: &str, signature: &str) -> bool {
        let Ok(provided) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(message.as_bytes());
        mac.verify_slice(&provided).is_ok()
    }

    /// `<token_id>.<signature>`
    pub fn bearer_for(&self, token_id: &str) -> String {
        format!("{token_id}.{}", self.sign(token_id))
    }

    /// Split and verify a bearer string, returning the token id.
    ///
    /// `Err` carries whatever id-like prefix was presented, so denials can
    /// still be fingerprinted.
    pub fn open_bearer<'a>(&self, bearer: &'a str) -> Result<&'a str, &'a str> {
        match bearer.trim().rsplit_once('.') {
            Some((token_id, signature)) if !token_id.is_empty() => {
                if self.verify(token_id, signature) {
                    Ok(token_id)
                } else {
                    Err(token_id)
                }
            }
            _ => Err(bearer.trim()),
        }
    }
}

/// Errors from key handling.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Key file error: {0}")]
    Io(String),
}

fn random_key() -> Vec<u8> {
    use rand::Rng;
    let mut rng = rand::rng();
    let mut key = vec![0u8; GENERATED_KEY_LEN];
    rng.fill(&mut key[..]);
    key
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), SecretError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| SecretError::Io(format!("{}: {e}", path.display())))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), SecretError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let key = SigningKey::from_secret("a-test-secret-of-some-length").unwrap();
        let sig = key.sign("tok-1");
        assert!(key.verify("tok-1", &sig));
        assert!(!key.verify("tok-2", &sig));
        assert!(!key.verify("tok-1", "not base64!!"));
    }

    #[test]
    fn different_keys_disagree() {
        let a = SigningKey::generate().unwrap();
        let b = SigningKey::generate().unwrap();
        assert!(!b.verify("tok", &a.sign("tok")));
    }

    #[test]
    fn bearer_roundtrip() {
        let key = SigningKey::generate().unwrap();
        let bearer = key.bearer_for("abc123");
        assert_eq!(key.open_bearer(&bearer), Ok("abc123"));
    }

    #[test]
    fn tampered_bearer_rejected() {
        let key = SigningKey::generate().unwrap();
        let bearer = key.bearer_for("abc123");
        let forged = bearer.replacen("abc123", "abc124", 1);
        assert_eq!(key.open_bearer(&forged), Err("abc124"));
        assert_eq!(key.open_bearer("no-signature"), Err("no-signature"));
        assert_eq!(key.open_bearer(".sig"), Err(".sig"));
    }

    #[test]
    fn empty_key_rejected() {
        assert!(SigningKey::from_bytes(&[]).is_err());
    }

    #[test]
    fn key_file_is_created_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("token.key");
        let first = SigningKey::load_or_create(&path).unwrap();
        assert!(path.exists());
        let second = SigningKey::load_or_create(&path).unwrap();
        assert!(second.verify("tok", &first.sign("tok")));
    }

    #[test]
    fn debug_hides_key() {
        let key = SigningKey::from_secret("visible-secret-value").unwrap();
        assert!(!format!("{key:?}").contains("visible"));
    }
}
