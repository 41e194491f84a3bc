//! Error types for Petrel core operations.
//!
//! All fallible operations in this crate surface a single flat [`Error`]
//! enum. Cryptographic primitives return errors to their callers; the relay
//! connection converts transport failures into a `Failed` state plus a
//! returned error; the relay pool aggregates per-relay errors into pool-level
//! outcomes.

use thiserror::Error;

/// Errors that can occur during key handling, encryption, and relay
/// communication.
#[derive(Debug, Error)]
pub enum Error {
    /// The private key scalar is zero, not less than the curve order, or
    /// otherwise unusable.
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// The public key is not a valid secp256k1 x-only point.
    #[error("Invalid public key")]
    InvalidPublicKey,

    /// The signature bytes are malformed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The event id does not match the hash of the canonical form.
    #[error("Event id does not match event contents")]
    InvalidEventId,

    /// Event signing failed.
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// A required signature check did not pass.
    #[error("Signature verification failed")]
    VerificationFailed,

    /// Hex encoding or decoding failed.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// The string is not valid bech32 (bad character, short payload, or
    /// checksum mismatch).
    #[error("Invalid bech32 string: {0}")]
    InvalidBech32(String),

    /// The bech32 human-readable prefix is not the one the caller expected.
    #[error("Unknown bech32 prefix: {0}")]
    UnknownPrefix(String),

    /// The mnemonic phrase is malformed.
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// A word in the mnemonic phrase is not in the English word list.
    #[error("Invalid mnemonic word: {0}")]
    InvalidMnemonicWord(String),

    /// The mnemonic checksum bits do not match the entropy.
    #[error("Invalid mnemonic checksum")]
    InvalidMnemonicChecksum,

    /// Sealed-message encryption failed.
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Sealed-message decryption failed.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// The sealed payload carries a version other than 2.
    #[error("Unsupported encryption version: {0}")]
    UnsupportedEncryptionVersion(u8),

    /// The sealed payload is not `base64(version || nonce || ciphertext || mac)`.
    #[error("Invalid payload format: {0}")]
    InvalidPayloadFormat(String),

    /// The payload MAC does not authenticate the ciphertext.
    #[error("HMAC verification failed")]
    HmacVerificationFailed,

    /// The decrypted plaintext has an inconsistent length prefix or padding.
    #[error("Invalid padding")]
    InvalidPadding,

    /// Opening the connection to a relay failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The operation requires a live connection and none is available.
    #[error("Not connected to relay")]
    NotConnected,

    /// The operation did not complete within its timeout.
    #[error("Operation timed out")]
    Timeout,

    /// The relay rejected the request.
    #[error("Relay error: {0}")]
    RelayError(String),

    /// Input violates a protocol constraint.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// An inbound frame on a known message type could not be parsed.
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// No active subscription with the given id.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),
}

/// Result type for Petrel core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Self::InvalidHex(e.to_string())
    }
}
