//! Nostr event model, canonical hashing, and signature verification.
//!
//! The event id is the SHA-256 of the canonical NIP-01 serialization
//! `[0, pubkey, created_at, kind, tags, content]`: minified JSON, forward
//! slashes unescaped, non-ASCII characters emitted literally. The `sig`
//! field is a BIP-340 Schnorr signature over the 32 id bytes.

use bitcoin::secp256k1::schnorr::Signature;
use bitcoin::secp256k1::Message;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

use super::keys::{xonly_from_hex, KeyPair, SECP};

/// A signed Nostr event ready for relay transmission.
///
/// Invariant: `id` equals the SHA-256 of the canonical form and `sig` is a
/// valid Schnorr signature by `pubkey` over the id bytes. Events are
/// immutable once constructed; [`Event::verify`] re-checks the invariant
/// for events received from the network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event id (32-byte SHA-256 hash, hex-encoded).
    pub id: String,

    /// Author x-only public key (32 bytes, hex-encoded).
    pub pubkey: String,

    /// Unix timestamp in seconds. May be arbitrarily past or future; no
    /// clock check is performed.
    pub created_at: i64,

    /// Event kind, e.g. `1` for a text note or `1059` for a gift wrap.
    pub kind: u16,

    /// Ordered tags; the outer order is semantic and preserved verbatim.
    pub tags: Vec<Vec<String>>,

    /// Event content body.
    pub content: String,

    /// Schnorr signature over the id bytes (64 bytes, hex-encoded).
    pub sig: String,
}

/// An event that has not been signed yet.
///
/// Transient: consumed by [`UnsignedEvent::sign`] to produce an [`Event`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// Author x-only public key (32 bytes, hex-encoded).
    pub pubkey: String,

    /// Unix timestamp in seconds.
    pub created_at: i64,

    /// Event kind.
    pub kind: u16,

    /// Ordered tags.
    pub tags: Vec<Vec<String>>,

    /// Event content body.
    pub content: String,
}

/// Computes the canonical NIP-01 serialization of the event fields.
///
/// # Errors
///
/// Returns [`Error::SerializationFailed`] if JSON encoding fails.
pub(crate) fn canonical_form(
    pubkey: &str,
    created_at: i64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String> {
    // Per NIP-01, serialize as: [0, pubkey, created_at, kind, tags, content]
    serde_json::to_string(&(0, pubkey, created_at, kind, tags, content)).map_err(Error::from)
}

/// Computes the event id over the canonical form.
pub(crate) fn canonical_id(
    pubkey: &str,
    created_at: i64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String> {
    let serialized = canonical_form(pubkey, created_at, kind, tags, content)?;
    Ok(hex::encode(Sha256::digest(serialized.as_bytes())))
}

impl UnsignedEvent {
    /// Creates an unsigned event with the given fields.
    #[must_use]
    pub const fn new(
        pubkey: String,
        created_at: i64,
        kind: u16,
        tags: Vec<Vec<String>>,
        content: String,
    ) -> Self {
        Self {
            pubkey,
            created_at,
            kind,
            tags,
            content,
        }
    }

    /// Creates an unsigned event timestamped with the current time.
    #[must_use]
    pub fn now(pubkey: String, kind: u16, tags: Vec<Vec<String>>, content: String) -> Self {
        Self::new(pubkey, Utc::now().timestamp(), kind, tags, content)
    }

    /// Computes the event id this event will have once signed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if JSON encoding fails.
    pub fn id(&self) -> Result<String> {
        canonical_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Signs this event, producing a complete [`Event`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::SigningFailed`] if the event's `pubkey` does not
    /// belong to `keypair`, or if signing fails.
    pub fn sign(self, keypair: &KeyPair) -> Result<Event> {
        if self.pubkey != keypair.pubkey_hex() {
            return Err(Error::SigningFailed(
                "event pubkey does not match signing key".to_string(),
            ));
        }

        let id = self.id()?;
        let id_bytes: [u8; 32] = hex::decode(&id)?
            .try_into()
            .map_err(|_| Error::InvalidEventId)?;
        let sig = keypair.sign(&id_bytes)?;

        Ok(Event {
            id,
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        })
    }
}

impl Event {
    /// Verifies the event id and signature.
    ///
    /// Recomputes the id from the received fields, then checks the Schnorr
    /// signature against the x-only pubkey. Returns `Ok(false)` for a
    /// well-formed signature that does not verify.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEventId`] if the id does not match the
    /// canonical form, [`Error::InvalidHex`] / [`Error::InvalidPublicKey`] /
    /// [`Error::InvalidSignature`] for malformed fields.
    pub fn verify(&self) -> Result<bool> {
        let expected_id = canonical_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;

        // Constant-time id comparison
        if !bool::from(expected_id.as_bytes().ct_eq(self.id.as_bytes())) {
            return Err(Error::InvalidEventId);
        }

        let pubkey = xonly_from_hex(&self.pubkey)?;

        let sig_bytes: [u8; 64] = hex::decode(&self.sig)?
            .try_into()
            .map_err(|_| Error::InvalidSignature)?;
        let signature = Signature::from_slice(&sig_bytes).map_err(|_| Error::InvalidSignature)?;

        let id_bytes: [u8; 32] = hex::decode(&self.id)?
            .try_into()
            .map_err(|_| Error::InvalidEventId)?;
        let message = Message::from_digest(id_bytes);

        Ok(SECP.verify_schnorr(&signature, &message, &pubkey).is_ok())
    }

    /// Serializes this event to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }

    /// Deserializes an event from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if the JSON is invalid or a
    /// field is missing.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::from)
    }

    /// Returns the second element of the first tag named `name`.
    #[must_use]
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1).map(String::as_str))
    }

    /// Returns the second element of every tag named `name`, in order.
    #[must_use]
    pub fn tag_values(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_unsigned(keypair: &KeyPair) -> UnsignedEvent {
        UnsignedEvent::new(
            keypair.pubkey_hex(),
            1_234_567_890,
            1,
            vec![vec!["p".to_string(), "test".to_string()]],
            "test content".to_string(),
        )
    }

    #[test]
    fn canonical_form_matches_reference() {
        let pubkey = "17162c921dc4d2518f9a101db33695df1afb56ab82f5ff3e5da6eec3ca5cd917";
        let tags = vec![vec!["p".to_string(), "test".to_string()]];
        let form = canonical_form(pubkey, 1_234_567_890, 1, &tags, "test content").unwrap();
        assert_eq!(
            form,
            format!(r#"[0,"{pubkey}",1234567890,1,[["p","test"]],"test content"]"#)
        );
    }

    #[test]
    fn canonical_form_does_not_escape_slashes() {
        let form = canonical_form("pk", 0, 1, &[], "https://relay.example.com/path").unwrap();
        assert!(form.contains("https://relay.example.com/path"));
        assert!(!form.contains("\\/"));
    }

    #[test]
    fn canonical_form_emits_unicode_literally() {
        let form = canonical_form("pk", 0, 1, &[], "héllo 世界").unwrap();
        assert!(form.contains("héllo 世界"));
    }

    #[test]
    fn canonical_form_preserves_tag_order() {
        let tags = vec![
            vec!["e".to_string(), "first".to_string()],
            vec!["p".to_string(), "second".to_string()],
            vec!["e".to_string(), "third".to_string()],
        ];
        let form = canonical_form("pk", 0, 1, &tags, "").unwrap();
        let e1 = form.find("first").unwrap();
        let p = form.find("second").unwrap();
        let e2 = form.find("third").unwrap();
        assert!(e1 < p && p < e2);
    }

    #[test]
    fn signed_event_has_expected_shape() {
        let keypair = KeyPair::generate();
        let event = sample_unsigned(&keypair).sign(&keypair).unwrap();

        assert_eq!(event.id.len(), 64);
        assert_eq!(event.pubkey.len(), 64);
        assert_eq!(event.sig.len(), 128);
        assert_eq!(event.kind, 1);
        assert_eq!(event.created_at, 1_234_567_890);
    }

    #[test]
    fn signed_event_verifies() {
        let keypair = KeyPair::generate();
        let event = sample_unsigned(&keypair).sign(&keypair).unwrap();
        assert!(event.verify().unwrap());
    }

    #[test]
    fn unsigned_id_matches_signed_id() {
        let keypair = KeyPair::generate();
        let unsigned = sample_unsigned(&keypair);
        let expected = unsigned.id().unwrap();
        let event = unsigned.sign(&keypair).unwrap();
        assert_eq!(event.id, expected);
    }

    #[test]
    fn sign_rejects_foreign_pubkey() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let mut unsigned = sample_unsigned(&keypair);
        unsigned.pubkey = other.pubkey_hex();

        let result = unsigned.sign(&keypair);
        assert!(matches!(result, Err(Error::SigningFailed(_))));
    }

    #[test]
    fn tampered_content_fails_with_invalid_event_id() {
        let keypair = KeyPair::generate();
        let mut event = sample_unsigned(&keypair).sign(&keypair).unwrap();
        event.content = "tampered".to_string();

        assert!(matches!(event.verify(), Err(Error::InvalidEventId)));
    }

    #[test]
    fn tampered_id_fails_with_invalid_event_id() {
        let keypair = KeyPair::generate();
        let mut event = sample_unsigned(&keypair).sign(&keypair).unwrap();
        let mut id_bytes = hex::decode(&event.id).unwrap();
        id_bytes[0] ^= 0xFF;
        event.id = hex::encode(id_bytes);

        assert!(matches!(event.verify(), Err(Error::InvalidEventId)));
    }

    #[test]
    fn wrong_signature_verifies_false() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let mut event = sample_unsigned(&keypair).sign(&keypair).unwrap();

        // A well-formed signature from a different key over the same digest
        let id_bytes: [u8; 32] = hex::decode(&event.id).unwrap().try_into().unwrap();
        event.sig = other.sign(&id_bytes).unwrap();

        assert!(!event.verify().unwrap());
    }

    #[test]
    fn malformed_sig_hex_is_rejected() {
        let keypair = KeyPair::generate();
        let mut event = sample_unsigned(&keypair).sign(&keypair).unwrap();
        event.sig = "zz".repeat(64);

        assert!(matches!(event.verify(), Err(Error::InvalidHex(_))));
    }

    #[test]
    fn short_sig_is_rejected() {
        let keypair = KeyPair::generate();
        let mut event = sample_unsigned(&keypair).sign(&keypair).unwrap();
        event.sig = "abcd".to_string();

        assert!(matches!(event.verify(), Err(Error::InvalidSignature)));
    }

    #[test]
    fn off_curve_pubkey_is_rejected() {
        let keypair = KeyPair::generate();
        let event = sample_unsigned(&keypair).sign(&keypair).unwrap();

        let mut forged = event.clone();
        forged.pubkey = "00".repeat(32);
        // The id no longer matches either, but the recomputed id is checked
        // against the stored one first
        forged.id = canonical_id(
            &forged.pubkey,
            forged.created_at,
            forged.kind,
            &forged.tags,
            &forged.content,
        )
        .unwrap();

        assert!(matches!(forged.verify(), Err(Error::InvalidPublicKey)));
    }

    #[test]
    fn json_round_trip() {
        let keypair = KeyPair::generate();
        let event = sample_unsigned(&keypair).sign(&keypair).unwrap();

        let json = event.to_json().unwrap();
        let recovered = Event::from_json(&json).unwrap();
        assert_eq!(event, recovered);
    }

    #[test]
    fn from_json_rejects_missing_fields() {
        let result = Event::from_json(r#"{"id":"ab","pubkey":"cd"}"#);
        assert!(matches!(result, Err(Error::SerializationFailed(_))));
    }

    #[test]
    fn empty_tag_strings_are_preserved() {
        let keypair = KeyPair::generate();
        let unsigned = UnsignedEvent::new(
            keypair.pubkey_hex(),
            0,
            1,
            vec![vec!["e".to_string(), "id".to_string(), String::new()]],
            String::new(),
        );
        let event = unsigned.sign(&keypair).unwrap();
        assert!(event.verify().unwrap());
        assert_eq!(event.tags[0][2], "");
    }

    #[test]
    fn negative_created_at_is_allowed() {
        let keypair = KeyPair::generate();
        let unsigned = UnsignedEvent::new(keypair.pubkey_hex(), -1, 1, vec![], "old".to_string());
        let event = unsigned.sign(&keypair).unwrap();
        assert!(event.verify().unwrap());
    }

    #[test]
    fn now_uses_current_time() {
        let keypair = KeyPair::generate();
        let before = Utc::now().timestamp();
        let unsigned = UnsignedEvent::now(keypair.pubkey_hex(), 1, vec![], "hi".to_string());
        let after = Utc::now().timestamp();
        assert!(unsigned.created_at >= before && unsigned.created_at <= after);
    }

    #[test]
    fn first_tag_value_finds_first_match() {
        let keypair = KeyPair::generate();
        let unsigned = UnsignedEvent::new(
            keypair.pubkey_hex(),
            0,
            14,
            vec![
                vec!["p".to_string(), "alice".to_string()],
                vec!["p".to_string(), "bob".to_string()],
            ],
            String::new(),
        );
        let event = unsigned.sign(&keypair).unwrap();
        assert_eq!(event.first_tag_value("p"), Some("alice"));
        assert_eq!(event.tag_values("p"), vec!["alice", "bob"]);
        assert_eq!(event.first_tag_value("e"), None);
    }
}
