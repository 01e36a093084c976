//! Sealed entry wire format.
//!
//! Persistent entries serialize as
//! `{ key, owner_id, nonce, ciphertext, tag, created_at, ttl }` with binary
//! fields base64 encoded. In-memory tiers carry the plain `payload` instead of
//! `nonce`/`ciphertext` and rely on the integrity tag alone.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEntry {
    pub key: String,
    pub owner_id: String,
    #[serde(flatten)]
    pub body: SealedBody,
    /// HMAC-SHA256 over the canonical (key, payload, owner_id) encoding.
    #[serde(with = "b64")]
    pub tag: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// Time-to-live in seconds.
    #[serde(rename = "ttl")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SealedBody {
    Encrypted {
        #[serde(with = "b64")]
        nonce: Vec<u8>,
        /// AES-256-GCM output, authentication tag appended.
        #[serde(with = "b64")]
        ciphertext: Vec<u8>,
    },
    Plain {
        #[serde(with = "b64")]
        payload: Bytes,
    },
}

impl SealedEntry {
    pub fn is_encrypted(&self) -> bool {
        matches!(self.body, SealedBody::Encrypted { .. })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_seconds = ttl.as_secs();
        self
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::seconds(self.ttl_seconds.min((i64::MAX / 1000) as u64) as i64);
        self.created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Approximate serialized footprint, used for quota accounting.
    pub fn size_hint(&self) -> usize {
        let body = match &self.body {
            SealedBody::Encrypted { nonce, ciphertext } => nonce.len() + ciphertext.len(),
            SealedBody::Plain { payload } => payload.len(),
        };
        // base64 expansion plus field names and timestamps
        (body + self.tag.len()) * 4 / 3 + self.key.len() + self.owner_id.len() + 128
    }
}

pub(crate) mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(value.as_ref()))
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: From<Vec<u8>>,
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map(T::from).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypted_wire_fields() {
        let entry = SealedEntry {
            key: "k".to_string(),
            owner_id: "alice".to_string(),
            body: SealedBody::Encrypted {
                nonce: vec![1; 12],
                ciphertext: vec![2; 20],
            },
            tag: vec![3; 32],
            created_at: Utc::now(),
            ttl_seconds: 60,
        };

        let json = serde_json::to_value(&entry).unwrap();
        for field in ["key", "owner_id", "nonce", "ciphertext", "tag", "created_at", "ttl"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert!(json.get("payload").is_none());

        let back: SealedEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_plain_entry_has_no_ciphertext() {
        let entry = SealedEntry {
            key: "k".to_string(),
            owner_id: "alice".to_string(),
            body: SealedBody::Plain {
                payload: Bytes::from_static(b"hello"),
            },
            tag: vec![3; 32],
            created_at: Utc::now(),
            ttl_seconds: 60,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("ciphertext").is_none());
        assert!(json.get("nonce").is_none());
        assert_eq!(json["payload"], "aGVsbG8=");
    }

    #[test]
    fn test_expiry() {
        let created = Utc::now() - chrono::Duration::seconds(120);
        let entry = SealedEntry {
            key: "k".to_string(),
            owner_id: "o".to_string(),
            body: SealedBody::Plain { payload: Bytes::new() },
            tag: Vec::new(),
            created_at: created,
            ttl_seconds: 60,
        };
        assert!(entry.is_expired_at(Utc::now()));
        assert!(!entry.clone().with_ttl(Duration::from_secs(600)).is_expired_at(Utc::now()));
    }
}
