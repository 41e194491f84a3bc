//! NIP-44 v2 sealed messages.
//!
//! Keypair-based authenticated encryption between two Nostr identities:
//! ECDH over secp256k1 produces a shared conversation key (HKDF-SHA256
//! extract, salt `"nip44-v2"`); each message expands the conversation key
//! with a random 32-byte nonce into a ChaCha20 key/nonce and an HMAC key;
//! plaintext is length-prefixed and padded before encryption; the MAC
//! covers `nonce || ciphertext`.
//!
//! Payload layout: `base64(version(1) || nonce(32) || ciphertext(>=32) || mac(32))`.
//!
//! Reference: <https://github.com/nostr-protocol/nips/blob/master/44.md>

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::secp256k1::{ecdh, PublicKey, SecretKey};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

use super::keys::KeyPair;

/// Payload version implemented by this module.
pub const VERSION: u8 = 2;

/// Maximum plaintext length in bytes.
pub const MAX_PLAINTEXT_LEN: usize = 65535;

const NONCE_LEN: usize = 32;
const MAC_LEN: usize = 32;
/// version(1) + nonce(32) + ciphertext(>= 32) + mac(32). Sealing always
/// produces at least 34 ciphertext bytes (length prefix + minimum padding);
/// payloads between this floor and that are caught by the padding check.
const MIN_PAYLOAD_LEN: usize = 1 + NONCE_LEN + 32 + MAC_LEN;

const MESSAGE_KEYS_LEN: usize = 76;
const HKDF_SALT: &[u8] = b"nip44-v2";

type HmacSha256 = Hmac<Sha256>;

/// Symmetric key shared by two conversation partners.
///
/// Derived from ECDH between one party's secret key and the other's
/// public key; both directions yield the same key. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct ConversationKey([u8; 32]);

impl ConversationKey {
    /// Derives the conversation key between `keypair` and the party
    /// identified by `other_pubkey` (64-character x-only hex).
    ///
    /// The x-only key is lifted to a full point by trying the even-y
    /// encoding first and falling back to odd-y. Only the x-coordinate of
    /// the ECDH point feeds the HKDF extract step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHex`] / [`Error::InvalidPublicKey`] for a
    /// malformed public key and [`Error::InvalidPrivateKey`] for an
    /// unusable secret scalar.
    pub fn derive(keypair: &KeyPair, other_pubkey: &str) -> Result<Self> {
        let mut secret_bytes = keypair.secret_bytes();
        let secret_key = SecretKey::from_slice(&secret_bytes).map_err(|_| {
            secret_bytes.zeroize();
            Error::InvalidPrivateKey
        })?;
        secret_bytes.zeroize();

        let xonly: [u8; 32] = hex::decode(other_pubkey)?
            .try_into()
            .map_err(|_| Error::InvalidPublicKey)?;
        let public_key = lift_x_only(&xonly)?;

        let mut point = ecdh::shared_secret_point(&public_key, &secret_key);
        let (prk, _) = Hkdf::<Sha256>::extract(Some(HKDF_SALT), &point[..32]);
        point.zeroize();

        Ok(Self(prk.into()))
    }

    /// Wraps raw key bytes, for callers that manage derivation themselves.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        write!(f, "ConversationKey(<sensitive>)")
    }
}

/// Per-message keys expanded from the conversation key and nonce.
#[derive(ZeroizeOnDrop)]
struct MessageKeys {
    chacha_key: [u8; 32],
    chacha_nonce: [u8; 12],
    hmac_key: [u8; 32],
}

fn message_keys(conversation_key: &ConversationKey, nonce: &[u8; NONCE_LEN]) -> MessageKeys {
    let hkdf = Hkdf::<Sha256>::from_prk(conversation_key.as_bytes())
        .expect("conversation key is exactly one hash length");
    let mut okm = Zeroizing::new([0u8; MESSAGE_KEYS_LEN]);
    hkdf.expand(nonce, &mut *okm)
        .expect("76 bytes is a valid HKDF-SHA256 output length");

    let mut keys = MessageKeys {
        chacha_key: [0u8; 32],
        chacha_nonce: [0u8; 12],
        hmac_key: [0u8; 32],
    };
    keys.chacha_key.copy_from_slice(&okm[0..32]);
    keys.chacha_nonce.copy_from_slice(&okm[32..44]);
    keys.hmac_key.copy_from_slice(&okm[44..76]);
    keys
}

/// Lifts an x-only public key to a full compressed point, trying even-y
/// first and odd-y second.
fn lift_x_only(xonly: &[u8; 32]) -> Result<PublicKey> {
    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(xonly);
    if let Ok(pk) = PublicKey::from_slice(&compressed) {
        return Ok(pk);
    }
    compressed[0] = 0x03;
    PublicKey::from_slice(&compressed).map_err(|_| Error::InvalidPublicKey)
}

/// Padded length for a plaintext of `unpadded_len` bytes, excluding the
/// 2-byte length prefix.
///
/// Plaintexts up to 32 bytes pad to 32; beyond that the chunk size is
/// half the next power of two above the length (floored at 32) and the
/// length rounds up to a whole number of chunks.
fn calc_padded_len(unpadded_len: usize) -> usize {
    if unpadded_len <= 32 {
        return 32;
    }
    let next_power = unpadded_len.next_power_of_two();
    let chunk = (next_power / 2).max(32);
    chunk * unpadded_len.div_ceil(chunk)
}

fn pad(plaintext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let len = plaintext.len();
    if len == 0 {
        return Err(Error::EncryptionFailed("plaintext is empty".to_string()));
    }
    if len > MAX_PLAINTEXT_LEN {
        return Err(Error::EncryptionFailed(format!(
            "plaintext exceeds {MAX_PLAINTEXT_LEN} bytes"
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    let prefix = (len as u16).to_be_bytes();
    let padded_len = calc_padded_len(len);
    let mut padded = Zeroizing::new(vec![0u8; 2 + padded_len]);
    padded[0..2].copy_from_slice(&prefix);
    padded[2..2 + len].copy_from_slice(plaintext);
    Ok(padded)
}

/// Seals a plaintext for `recipient_pubkey`, authenticated as `sender`.
///
/// Returns the base64 payload suitable for an event `content` field.
///
/// # Errors
///
/// Returns [`Error::EncryptionFailed`] for an empty or oversized
/// plaintext, and key errors for a malformed recipient key.
pub fn seal(plaintext: &str, recipient_pubkey: &str, sender: &KeyPair) -> Result<String> {
    let key = ConversationKey::derive(sender, recipient_pubkey)?;
    seal_with_key(&key, plaintext)
}

/// Seals a plaintext under an already-derived conversation key.
///
/// # Errors
///
/// Returns [`Error::EncryptionFailed`] for an empty or oversized
/// plaintext.
pub fn seal_with_key(key: &ConversationKey, plaintext: &str) -> Result<String> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    seal_with_nonce(key, &nonce, plaintext)
}

fn seal_with_nonce(
    key: &ConversationKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &str,
) -> Result<String> {
    let keys = message_keys(key, nonce);

    let mut buffer = pad(plaintext.as_bytes())?;
    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(buffer.as_mut());

    let mut mac = HmacSha256::new_from_slice(&keys.hmac_key)
        .map_err(|e| Error::EncryptionFailed(e.to_string()))?;
    mac.update(nonce);
    mac.update(&buffer);
    let tag = mac.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + NONCE_LEN + buffer.len() + MAC_LEN);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&buffer);
    payload.extend_from_slice(&tag);

    Ok(BASE64.encode(payload))
}

/// Opens a sealed payload from `sender_pubkey`, decrypting as `recipient`.
///
/// # Errors
///
/// Returns [`Error::InvalidPayloadFormat`] for bad base64 or a truncated
/// payload, [`Error::UnsupportedEncryptionVersion`] for a version other
/// than 2, [`Error::HmacVerificationFailed`] when authentication fails
/// (any tampered byte lands here, never in a padding error), and
/// [`Error::InvalidPadding`] for an inconsistent length prefix.
pub fn open(payload: &str, sender_pubkey: &str, recipient: &KeyPair) -> Result<String> {
    let key = ConversationKey::derive(recipient, sender_pubkey)?;
    open_with_key(&key, payload)
}

/// Opens a sealed payload under an already-derived conversation key.
///
/// # Errors
///
/// Same as [`open`].
pub fn open_with_key(key: &ConversationKey, payload: &str) -> Result<String> {
    let decoded = BASE64
        .decode(payload)
        .map_err(|e| Error::InvalidPayloadFormat(e.to_string()))?;

    let version = *decoded
        .first()
        .ok_or_else(|| Error::InvalidPayloadFormat("payload is empty".to_string()))?;
    if version != VERSION {
        return Err(Error::UnsupportedEncryptionVersion(version));
    }
    if decoded.len() < MIN_PAYLOAD_LEN {
        return Err(Error::InvalidPayloadFormat(format!(
            "payload is {} bytes, minimum is {MIN_PAYLOAD_LEN}",
            decoded.len()
        )));
    }

    let nonce: [u8; NONCE_LEN] = decoded[1..1 + NONCE_LEN]
        .try_into()
        .map_err(|_| Error::InvalidPayloadFormat("nonce out of range".to_string()))?;
    let ciphertext = &decoded[1 + NONCE_LEN..decoded.len() - MAC_LEN];
    let received_mac = &decoded[decoded.len() - MAC_LEN..];

    let keys = message_keys(key, &nonce);

    // Authenticate before touching the ciphertext; verify_slice compares in
    // constant time
    let mut mac = HmacSha256::new_from_slice(&keys.hmac_key)
        .map_err(|e| Error::DecryptionFailed(e.to_string()))?;
    mac.update(&nonce);
    mac.update(ciphertext);
    mac.verify_slice(received_mac)
        .map_err(|_| Error::HmacVerificationFailed)?;

    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(buffer.as_mut());

    let unpadded_len = usize::from(u16::from_be_bytes([buffer[0], buffer[1]]));
    if unpadded_len == 0 || 2 + unpadded_len > buffer.len() {
        return Err(Error::InvalidPadding);
    }
    if buffer.len() != 2 + calc_padded_len(unpadded_len) {
        return Err(Error::InvalidPadding);
    }

    String::from_utf8(buffer[2..2 + unpadded_len].to_vec())
        .map_err(|e| Error::DecryptionFailed(e.to_string()))
}
