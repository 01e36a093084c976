// Sealing and integrity tests
// Author: kelexine (https://github.com/kelexine)

use bytes::Bytes;
use genvault::config::SecurityConfig;
use genvault::integrity::{IntegrityFailure, SealedBody, Sealer};
use proptest::prelude::*;

fn sealer() -> Sealer {
    Sealer::from_config(&SecurityConfig {
        hmac_secret: "00112233445566778899aabbccddeeff".to_string(),
        master_secret: "ffeeddccbbaa99887766554433221100".to_string(),
        deployment_salt: "integration".to_string(),
        kdf_iterations: 1_000,
    })
    .unwrap()
}

const KEY: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

#[test]
fn test_missing_secrets_rejected() {
    assert!(Sealer::from_config(&SecurityConfig::default()).is_err());

    let short = SecurityConfig {
        hmac_secret: "0011".to_string(),
        master_secret: "ffeeddccbbaa99887766554433221100".to_string(),
        ..Default::default()
    };
    assert!(Sealer::from_config(&short).is_err());
}

#[test]
fn test_plain_seal_opens_for_owner_only() {
    let sealer = sealer();
    let payload = Bytes::from_static(b"generated text");
    let sealed = sealer.seal(KEY, &payload, "alice");

    assert_eq!(sealer.open(&sealed, "alice").unwrap(), payload);
    assert_eq!(sealer.open(&sealed, "bob"), Err(IntegrityFailure::OwnerMismatch));
}

#[test]
fn test_relabelled_owner_fails_tag() {
    let sealer = sealer();
    let mut sealed = sealer.seal(KEY, &Bytes::from_static(b"secret"), "alice");
    sealed.owner_id = "bob".to_string();

    assert_eq!(sealer.open(&sealed, "bob"), Err(IntegrityFailure::TagMismatch));
}

#[test]
fn test_encrypted_entry_hides_payload() {
    let sealer = sealer();
    let payload = Bytes::from_static(b"a very recognizable payload");
    let sealed = sealer.seal_encrypted(KEY, &payload, "alice").unwrap();

    assert!(sealed.is_encrypted());
    let json = serde_json::to_string(&sealed).unwrap();
    assert!(!json.contains("recognizable"));
    assert!(json.contains("\"nonce\""));
    assert!(json.contains("\"ciphertext\""));
    assert_eq!(sealer.open(&sealed, "alice").unwrap(), payload);
}

#[test]
fn test_tampered_ciphertext_fails_closed() {
    let sealer = sealer();
    let mut sealed = sealer
        .seal_encrypted(KEY, &Bytes::from_static(b"payload"), "alice")
        .unwrap();
    if let SealedBody::Encrypted { ciphertext, .. } = &mut sealed.body {
        ciphertext[0] ^= 0x01;
    }

    assert_eq!(sealer.open(&sealed, "alice"), Err(IntegrityFailure::Decryption));
}

#[test]
fn test_other_owner_key_cannot_decrypt() {
    let sealer = sealer();
    let mut sealed = sealer
        .seal_encrypted(KEY, &Bytes::from_static(b"payload"), "alice")
        .unwrap();
    sealed.owner_id = "bob".to_string();

    assert_eq!(sealer.open(&sealed, "bob"), Err(IntegrityFailure::Decryption));
}

#[test]
fn test_wire_format_round_trips() {
    let sealer = sealer();
    let sealed = sealer
        .seal_encrypted(KEY, &Bytes::from_static(b"payload"), "alice")
        .unwrap();

    let decoded: genvault::integrity::SealedEntry =
        serde_json::from_str(&serde_json::to_string(&sealed).unwrap()).unwrap();
    assert_eq!(decoded, sealed);
    assert_eq!(sealer.open(&decoded, "alice").unwrap(), Bytes::from_static(b"payload"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_payload_opens_unchanged(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let sealer = sealer();
        let payload = Bytes::from(payload);

        let plain = sealer.seal(KEY, &payload, "owner");
        prop_assert_eq!(sealer.open(&plain, "owner").unwrap(), payload.clone());

        let encrypted = sealer.seal_encrypted(KEY, &payload, "owner").unwrap();
        prop_assert_eq!(sealer.open(&encrypted, "owner").unwrap(), payload);
    }

    #[test]
    fn prop_flipped_tag_bit_rejected(index in 0usize..32, bit in 0u8..8) {
        let sealer = sealer();
        let mut sealed = sealer.seal(KEY, &Bytes::from_static(b"payload"), "owner");
        sealed.tag[index] ^= 1 << bit;
        prop_assert_eq!(sealer.open(&sealed, "owner"), Err(IntegrityFailure::TagMismatch));
    }

    #[test]
    fn prop_any_tampered_byte_of_encrypted_entry_rejected(
        payload in proptest::collection::vec(any::<u8>(), 1..256),
        field in 0usize..3,
        position in any::<proptest::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let sealer = sealer();
        let mut sealed = sealer.seal_encrypted(KEY, &Bytes::from(payload), "owner").unwrap();

        let expected = match (&mut sealed.body, field) {
            (SealedBody::Encrypted { nonce, .. }, 0) => {
                let i = position.index(nonce.len());
                nonce[i] ^= mask;
                IntegrityFailure::Decryption
            }
            (SealedBody::Encrypted { ciphertext, .. }, 1) => {
                let i = position.index(ciphertext.len());
                ciphertext[i] ^= mask;
                IntegrityFailure::Decryption
            }
            _ => {
                let i = position.index(sealed.tag.len());
                sealed.tag[i] ^= mask;
                IntegrityFailure::TagMismatch
            }
        };

        prop_assert_eq!(sealer.open(&sealed, "owner"), Err(expected));
    }
}
