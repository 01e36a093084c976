// Secret material and key derivation
// Author: kelexine (https://github.com/kelexine)

use crate::error::{Result, VaultError};
use ring::{hmac, pbkdf2};
use sha2::{Digest, Sha256};
use std::num::NonZeroU32;
use zeroize::Zeroizing;

/// Length of a derived AES-256 key.
pub const KEY_LEN: usize = 32;

/// Shortest secret accepted from configuration, in bytes.
pub const MIN_SECRET_LEN: usize = 16;

/// HMAC-SHA256 signer shared by cache entries and audit events.
///
/// Cloning is cheap; `ring` keeps the expanded key behind the handle.
#[derive(Clone)]
pub struct Signer {
    key: hmac::Key,
}

impl Signer {
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(VaultError::Config(format!(
                "HMAC secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        })
    }

    /// Build a signer from a hex-encoded secret.
    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let secret = decode_secret("hmac_secret", secret_hex)?;
        Self::new(&secret)
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        hmac::sign(&self.key, data).as_ref().to_vec()
    }

    /// Constant-time tag check.
    pub fn verify(&self, data: &[u8], tag: &[u8]) -> bool {
        hmac::verify(&self.key, data, tag).is_ok()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer([REDACTED])")
    }
}

/// Derives per-owner encryption keys from the master secret.
///
/// Every call runs PBKDF2 from scratch; nothing derived is cached, so
/// concurrent callers share no mutable state.
pub struct KeyDeriver {
    master: Zeroizing<Vec<u8>>,
    deployment_salt: String,
    iterations: NonZeroU32,
}

impl KeyDeriver {
    pub fn new(master: &[u8], deployment_salt: &str, iterations: u32) -> Result<Self> {
        if master.len() < MIN_SECRET_LEN {
            return Err(VaultError::Config(format!(
                "master secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        let iterations = NonZeroU32::new(iterations)
            .ok_or_else(|| VaultError::Config("kdf_iterations must be non-zero".to_string()))?;

        Ok(Self {
            master: Zeroizing::new(master.to_vec()),
            deployment_salt: deployment_salt.to_string(),
            iterations,
        })
    }

    /// Salt for one owner: `SHA-256(deployment_salt || 0x00 || owner_id)`.
    pub fn owner_salt(&self, owner_id: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.deployment_salt.as_bytes());
        hasher.update([0u8]);
        hasher.update(owner_id.as_bytes());
        hasher.finalize().into()
    }

    pub fn derive(&self, owner_id: &str) -> Zeroizing<[u8; KEY_LEN]> {
        let salt = self.owner_salt(owner_id);
        let mut out = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            &salt,
            &self.master,
            out.as_mut(),
        );
        out
    }
}

/// Decode a hex secret, naming the setting in the error.
pub fn decode_secret(name: &str, value: &str) -> Result<Zeroizing<Vec<u8>>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(VaultError::Config(format!("security.{} must be set", name)));
    }
    hex::decode(trimmed)
        .map(Zeroizing::new)
        .map_err(|e| VaultError::Config(format!("security.{} is not valid hex: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_secret_rejected() {
        assert!(Signer::new(b"short").is_err());
        assert!(KeyDeriver::new(b"short", "salt", 10).is_err());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        assert!(KeyDeriver::new(&[7u8; 32], "salt", 0).is_err());
    }

    #[test]
    fn test_derivation_is_per_owner_and_stable() {
        let deriver = KeyDeriver::new(&[7u8; 32], "salt", 10).unwrap();
        let a1 = deriver.derive("alice");
        let a2 = deriver.derive("alice");
        let b = deriver.derive("bob");
        assert_eq!(*a1, *a2);
        assert_ne!(*a1, *b);
    }

    #[test]
    fn test_decode_secret_errors_name_the_field() {
        let err = decode_secret("master_secret", "").unwrap_err();
        assert!(err.to_string().contains("master_secret"));
        let err = decode_secret("hmac_secret", "zz").unwrap_err();
        assert!(err.to_string().contains("hmac_secret"));
    }
}
