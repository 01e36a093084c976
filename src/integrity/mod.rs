//! Cache integrity and encryption.
//!
//! Every cache payload is bound to its key and owner by an HMAC-SHA256 tag.
//! Persistent entries are additionally encrypted with AES-256-GCM under a key
//! derived per owner with PBKDF2, so one owner's entries cannot be decrypted
//! with another owner's key even if application checks were bypassed.
//!
//! Opening is fail-closed: any mismatch yields [`IntegrityFailure`] and no
//! payload bytes.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod keys;
mod sealed;

pub use keys::{decode_secret, KeyDeriver, Signer, KEY_LEN, MIN_SECRET_LEN};
pub use sealed::{SealedBody, SealedEntry};

pub(crate) use sealed::b64;

use crate::config::SecurityConfig;
use crate::error::{Result, VaultError};
use bytes::Bytes;
use chrono::Utc;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use tracing::debug;

const DOMAIN: &[u8] = b"genvault.seal.v1";

/// Why an entry could not be opened. Callers treat every variant as a miss.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFailure {
    #[error("entry belongs to a different owner")]
    OwnerMismatch,

    #[error("integrity tag mismatch")]
    TagMismatch,

    #[error("decryption failed")]
    Decryption,

    #[error("malformed entry: {0}")]
    Malformed(&'static str),
}

impl From<IntegrityFailure> for VaultError {
    fn from(e: IntegrityFailure) -> Self {
        VaultError::IntegrityFailure(e.to_string())
    }
}

/// Seals and opens cache payloads.
pub struct Sealer {
    signer: Signer,
    deriver: KeyDeriver,
    rng: SystemRandom,
}

impl Sealer {
    pub fn new(signer: Signer, deriver: KeyDeriver) -> Self {
        Self {
            signer,
            deriver,
            rng: SystemRandom::new(),
        }
    }

    /// Build a sealer from hex secrets in configuration.
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let signer = Signer::from_hex(&config.hmac_secret)?;
        let master = decode_secret("master_secret", &config.master_secret)?;
        let deriver = KeyDeriver::new(&master, &config.deployment_salt, config.kdf_iterations)?;
        Ok(Self::new(signer, deriver))
    }

    /// The HMAC signer, shared with the audit log.
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Integrity-only seal for in-memory tiers.
    pub fn seal(&self, key: &str, payload: &Bytes, owner_id: &str) -> SealedEntry {
        SealedEntry {
            key: key.to_string(),
            owner_id: owner_id.to_string(),
            body: SealedBody::Plain {
                payload: payload.clone(),
            },
            tag: self.signer.sign(&canonical(key, payload, owner_id)),
            created_at: Utc::now(),
            ttl_seconds: 0,
        }
    }

    /// Integrity tag plus owner-keyed encryption for the persistent tier.
    pub fn seal_encrypted(&self, key: &str, payload: &Bytes, owner_id: &str) -> Result<SealedEntry> {
        let cipher = self.owner_cipher(owner_id)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| VaultError::Internal("system RNG unavailable".to_string()))?;

        let mut in_out = payload.to_vec();
        cipher
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(associated_data(key, owner_id)),
                &mut in_out,
            )
            .map_err(|_| VaultError::Internal("AEAD seal failed".to_string()))?;

        Ok(SealedEntry {
            key: key.to_string(),
            owner_id: owner_id.to_string(),
            body: SealedBody::Encrypted {
                nonce: nonce_bytes.to_vec(),
                ciphertext: in_out,
            },
            tag: self.signer.sign(&canonical(key, payload, owner_id)),
            created_at: Utc::now(),
            ttl_seconds: 0,
        })
    }

    /// Verify and (if needed) decrypt an entry on behalf of `owner_id`.
    ///
    /// The tag and the decryption key are computed from the caller's owner id,
    /// never from the id stored in the entry.
    pub fn open(&self, entry: &SealedEntry, owner_id: &str) -> std::result::Result<Bytes, IntegrityFailure> {
        if entry.owner_id != owner_id {
            return Err(IntegrityFailure::OwnerMismatch);
        }

        let payload = match &entry.body {
            SealedBody::Plain { payload } => payload.clone(),
            SealedBody::Encrypted { nonce, ciphertext } => {
                let nonce: [u8; NONCE_LEN] = nonce
                    .as_slice()
                    .try_into()
                    .map_err(|_| IntegrityFailure::Malformed("nonce length"))?;
                if ciphertext.len() < AES_256_GCM.tag_len() {
                    return Err(IntegrityFailure::Malformed("ciphertext too short"));
                }
                let cipher = self
                    .owner_cipher(owner_id)
                    .map_err(|_| IntegrityFailure::Decryption)?;
                let mut in_out = ciphertext.clone();
                let plain = cipher
                    .open_in_place(
                        Nonce::assume_unique_for_key(nonce),
                        Aad::from(associated_data(&entry.key, owner_id)),
                        &mut in_out,
                    )
                    .map_err(|_| IntegrityFailure::Decryption)?;
                Bytes::copy_from_slice(plain)
            }
        };

        if !self
            .signer
            .verify(&canonical(&entry.key, &payload, owner_id), &entry.tag)
        {
            debug!("Integrity tag mismatch for key {}", short(&entry.key));
            return Err(IntegrityFailure::TagMismatch);
        }

        Ok(payload)
    }

    fn owner_cipher(&self, owner_id: &str) -> Result<LessSafeKey> {
        let key = self.deriver.derive(owner_id);
        let unbound = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
            .map_err(|_| VaultError::Internal("invalid derived key length".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

/// Length-prefixed encoding of (key, payload, owner_id) so field boundaries
/// cannot be shifted between fields.
pub fn canonical(key: &str, payload: &[u8], owner_id: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(DOMAIN.len() + key.len() + payload.len() + owner_id.len() + 24);
    out.extend_from_slice(DOMAIN);
    for field in [key.as_bytes(), payload, owner_id.as_bytes()] {
        out.extend_from_slice(&(field.len() as u64).to_be_bytes());
        out.extend_from_slice(field);
    }
    out
}

fn associated_data(key: &str, owner_id: &str) -> Vec<u8> {
    canonical(key, &[], owner_id)
}

/// First 16 characters of a key, for log lines.
pub fn short(key: &str) -> &str {
    key.get(..16).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealer() -> Sealer {
        Sealer::new(
            Signer::new(&[1u8; 32]).unwrap(),
            KeyDeriver::new(&[2u8; 32], "test", 10).unwrap(),
        )
    }

    #[test]
    fn test_plain_seal_open() {
        let sealer = sealer();
        let payload = Bytes::from_static(b"generated article");
        let entry = sealer.seal("key", &payload, "alice");
        assert_eq!(sealer.open(&entry, "alice").unwrap(), payload);
    }

    #[test]
    fn test_encrypted_seal_hides_plaintext() {
        let sealer = sealer();
        let payload = Bytes::from_static(b"very secret generated text");
        let entry = sealer.seal_encrypted("key", &payload, "alice").unwrap();
        match &entry.body {
            SealedBody::Encrypted { ciphertext, .. } => {
                assert!(!ciphertext
                    .windows(payload.len())
                    .any(|w| w == payload.as_ref()));
            }
            SealedBody::Plain { .. } => panic!("expected encrypted body"),
        }
        assert_eq!(sealer.open(&entry, "alice").unwrap(), payload);
    }

    #[test]
    fn test_relabelled_owner_fails_decryption() {
        let sealer = sealer();
        let mut entry = sealer
            .seal_encrypted("key", &Bytes::from_static(b"x"), "alice")
            .unwrap();
        entry.owner_id = "mallory".to_string();
        assert_eq!(sealer.open(&entry, "mallory"), Err(IntegrityFailure::Decryption));
    }

    #[test]
    fn test_canonical_is_unambiguous() {
        assert_ne!(canonical("ab", b"c", "o"), canonical("a", b"bc", "o"));
    }

    #[test]
    fn test_malformed_nonce() {
        let sealer = sealer();
        let mut entry = sealer
            .seal_encrypted("key", &Bytes::from_static(b"x"), "alice")
            .unwrap();
        if let SealedBody::Encrypted { nonce, .. } = &mut entry.body {
            nonce.pop();
        }
        assert_eq!(
            sealer.open(&entry, "alice"),
            Err(IntegrityFailure::Malformed("nonce length"))
        );
    }
}
