//! Identity keypairs for Nostr operations.
//!
//! A [`KeyPair`] owns a 32-byte secp256k1 secret scalar and its derived
//! x-only public key. Secret material is zeroized automatically when the
//! keypair is dropped.

use std::sync::LazyLock;

use bitcoin::secp256k1::rand::rngs::OsRng;
use bitcoin::secp256k1::{All, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

use super::nip19;

/// Global secp256k1 context for cryptographic operations.
///
/// Creating a `Secp256k1` context is expensive as it precomputes tables
/// for signing and verification. This shared context is initialized once
/// and reused across all operations. The context is `Send + Sync`.
pub static SECP: LazyLock<Secp256k1<All>> = LazyLock::new(Secp256k1::new);

/// A secp256k1 keypair identifying a Nostr user.
///
/// The secret key bytes are stored separately from the cached public key
/// and are zeroized on drop via `ZeroizeOnDrop`. The keypair is
/// reconstructed from bytes whenever a signing operation is needed, and
/// the temporary copy is wiped afterwards.
///
/// # Example
///
/// ```
/// use petrel_core::nostr::KeyPair;
///
/// let keypair = KeyPair::generate();
/// assert_eq!(keypair.pubkey_hex().len(), 64);
/// assert!(keypair.npub().unwrap().starts_with("npub1"));
/// ```
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    /// The secret key bytes (zeroized on drop).
    secret_bytes: [u8; 32],

    /// Cached x-only public key bytes (not sensitive, skip zeroization).
    #[zeroize(skip)]
    pubkey_bytes: [u8; 32],
}

impl KeyPair {
    /// Generates a new random keypair.
    ///
    /// Uses the operating system's secure random number generator.
    #[must_use]
    pub fn generate() -> Self {
        let keypair = Keypair::new(&SECP, &mut OsRng);
        let secret_bytes = keypair.secret_key().secret_bytes();
        let (public_key, _parity) = keypair.x_only_public_key();

        Self {
            secret_bytes,
            pubkey_bytes: public_key.serialize(),
        }
    }

    /// Creates a keypair from raw secret key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPrivateKey`] if the bytes are zero or not
    /// less than the curve order.
    pub fn from_secret_bytes(secret_bytes: [u8; 32]) -> Result<Self> {
        let secret_key =
            SecretKey::from_slice(&secret_bytes).map_err(|_| Error::InvalidPrivateKey)?;
        let keypair = Keypair::from_secret_key(&SECP, &secret_key);
        let (public_key, _parity) = keypair.x_only_public_key();

        Ok(Self {
            secret_bytes,
            pubkey_bytes: public_key.serialize(),
        })
    }

    /// Creates a keypair from a 64-character hex-encoded secret key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHex`] if the string is not hex,
    /// [`Error::InvalidPrivateKey`] if it is not 32 bytes or not a valid
    /// scalar.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let mut decoded = hex::decode(secret_hex)?;
        let bytes: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            decoded.zeroize();
            Error::InvalidPrivateKey
        })?;
        decoded.zeroize();
        Self::from_secret_bytes(bytes)
    }

    /// Imports a keypair from an nsec (NIP-19 bech32-encoded secret key).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPrefix`] if the prefix is not `nsec`,
    /// [`Error::InvalidBech32`] on malformed input, or
    /// [`Error::InvalidPrivateKey`] if the payload is not a valid scalar.
    pub fn from_nsec(nsec: &str) -> Result<Self> {
        let mut bytes = nip19::decode_nsec(nsec)?;
        let result = Self::from_secret_bytes(bytes);
        bytes.zeroize();
        result
    }

    /// Returns the x-only public key as a 64-character hex string.
    ///
    /// This is the format used in the `pubkey` field of Nostr events.
    #[must_use]
    pub fn pubkey_hex(&self) -> String {
        hex::encode(self.pubkey_bytes)
    }

    /// Returns the x-only public key as raw bytes.
    #[must_use]
    pub const fn pubkey_bytes(&self) -> [u8; 32] {
        self.pubkey_bytes
    }

    /// Returns the public key as an `npub1…` string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBech32`] if encoding fails.
    pub fn npub(&self) -> Result<String> {
        nip19::encode_npub(&self.pubkey_bytes)
    }

    /// Exports the secret key as an `nsec1…` string.
    ///
    /// Only call this for user-initiated backup; the returned string is
    /// sensitive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBech32`] if encoding fails.
    pub fn export_nsec(&self) -> Result<String> {
        nip19::encode_nsec(&self.secret_bytes)
    }

    /// Signs a 32-byte message digest using Schnorr (BIP-340).
    ///
    /// This is used to sign the event id, producing the `sig` field.
    /// Returns the 64-byte signature as a hex string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SigningFailed`] if the stored secret bytes cannot
    /// be reconstructed into a key.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<String> {
        let mut secret_copy = self.secret_bytes;

        let result = (|| {
            let secret_key = SecretKey::from_slice(&secret_copy)
                .map_err(|e| Error::SigningFailed(e.to_string()))?;
            let keypair = Keypair::from_secret_key(&SECP, &secret_key);
            let message = Message::from_digest(*digest);
            let signature = SECP.sign_schnorr(&message, &keypair);
            Ok(hex::encode(signature.serialize()))
        })();

        secret_copy.zeroize();
        result
    }

    /// Returns a copy of the secret scalar for ECDH.
    ///
    /// Callers must zeroize the returned bytes when done.
    pub(crate) const fn secret_bytes(&self) -> [u8; 32] {
        self.secret_bytes
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret key
        f.debug_struct("KeyPair")
            .field("pubkey", &self.pubkey_hex())
            .finish()
    }
}

/// Parses an x-only public key from a 64-character hex string.
///
/// # Errors
///
/// Returns [`Error::InvalidHex`] if the string is not hex and
/// [`Error::InvalidPublicKey`] if the bytes are not a valid x-only point.
pub(crate) fn xonly_from_hex(pubkey_hex: &str) -> Result<XOnlyPublicKey> {
    let bytes: [u8; 32] = hex::decode(pubkey_hex)?
        .try_into()
        .map_err(|_| Error::InvalidPublicKey)?;
    XOnlyPublicKey::from_slice(&bytes).map_err(|_| Error::InvalidPublicKey)
}

/// Decodes an `npub1…` string into a 64-character hex public key.
///
/// # Errors
///
/// Returns [`Error::UnknownPrefix`] for a non-`npub` prefix,
/// [`Error::InvalidBech32`] on malformed input, or
/// [`Error::InvalidPublicKey`] if the payload is not a valid x-only point.
pub fn public_key_from_npub(npub: &str) -> Result<String> {
    let bytes = nip19::decode_npub(npub)?;
    XOnlyPublicKey::from_slice(&bytes).map_err(|_| Error::InvalidPublicKey)?;
    Ok(hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_valid_keypair() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.pubkey_hex().len(), 64);
    }

    #[test]
    fn different_keypairs_have_different_pubkeys() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.pubkey_hex(), b.pubkey_hex());
    }

    #[test]
    fn from_secret_bytes_with_all_zeros_fails() {
        let result = KeyPair::from_secret_bytes([0u8; 32]);
        assert!(matches!(result, Err(Error::InvalidPrivateKey)));
    }

    #[test]
    fn from_secret_bytes_with_all_ff_fails() {
        // Greater than the secp256k1 curve order
        let result = KeyPair::from_secret_bytes([0xFFu8; 32]);
        assert!(matches!(result, Err(Error::InvalidPrivateKey)));
    }

    #[test]
    fn from_secret_bytes_curve_order_boundary() {
        // n - 1 is the largest valid scalar
        let order_minus_1: [u8; 32] =
            hex::decode("fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364140")
                .unwrap()
                .try_into()
                .unwrap();
        assert!(KeyPair::from_secret_bytes(order_minus_1).is_ok());

        // n itself is invalid
        let order: [u8; 32] =
            hex::decode("fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141")
                .unwrap()
                .try_into()
                .unwrap();
        assert!(KeyPair::from_secret_bytes(order).is_err());
    }

    #[test]
    fn from_secret_hex_round_trip() {
        let original = KeyPair::generate();
        let secret_hex = hex::encode(original.secret_bytes());
        let restored = KeyPair::from_secret_hex(&secret_hex).unwrap();
        assert_eq!(original.pubkey_hex(), restored.pubkey_hex());
    }

    #[test]
    fn from_secret_hex_rejects_non_hex() {
        let result = KeyPair::from_secret_hex("zz".repeat(32).as_str());
        assert!(matches!(result, Err(Error::InvalidHex(_))));
    }

    #[test]
    fn from_secret_hex_rejects_short_input() {
        let result = KeyPair::from_secret_hex("abcd");
        assert!(matches!(result, Err(Error::InvalidPrivateKey)));
    }

    #[test]
    fn nsec_round_trip() {
        let original = KeyPair::generate();
        let nsec = original.export_nsec().unwrap();
        assert!(nsec.starts_with("nsec1"));

        let restored = KeyPair::from_nsec(&nsec).unwrap();
        assert_eq!(original.pubkey_hex(), restored.pubkey_hex());
    }

    #[test]
    fn from_nsec_rejects_npub() {
        let keypair = KeyPair::generate();
        let npub = keypair.npub().unwrap();
        assert!(matches!(
            KeyPair::from_nsec(&npub),
            Err(Error::UnknownPrefix(_))
        ));
    }

    #[test]
    fn npub_round_trip_through_decoder() {
        let keypair = KeyPair::generate();
        let npub = keypair.npub().unwrap();
        assert_eq!(public_key_from_npub(&npub).unwrap(), keypair.pubkey_hex());
    }

    #[test]
    fn sign_produces_64_byte_signature() {
        let keypair = KeyPair::generate();
        let sig = keypair.sign(&[0x42u8; 32]).unwrap();
        assert_eq!(sig.len(), 128);
        assert!(hex::decode(&sig).is_ok());
    }

    #[test]
    fn debug_does_not_leak_secret_key() {
        let keypair = KeyPair::generate();
        let debug_output = format!("{keypair:?}");
        assert!(debug_output.contains("pubkey"));
        assert!(!debug_output.contains(&hex::encode(keypair.secret_bytes())));
    }

    #[test]
    fn xonly_from_hex_rejects_off_curve_point() {
        // All zeros is not a valid x-coordinate
        let result = xonly_from_hex(&"00".repeat(32));
        assert!(matches!(result, Err(Error::InvalidPublicKey)));
    }

    #[test]
    fn xonly_from_hex_rejects_short_hex() {
        assert!(matches!(
            xonly_from_hex("abcd"),
            Err(Error::InvalidPublicKey)
        ));
    }

    #[test]
    fn keypair_implements_zeroize_on_drop() {
        fn assert_zeroize_on_drop<T: ZeroizeOnDrop>() {}
        assert_zeroize_on_drop::<KeyPair>();
    }
}
