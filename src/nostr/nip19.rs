//! NIP-19 bech32-encoded entities.
//!
//! Keys travel between users as bech32 strings with a human-readable
//! prefix: `npub1…` for public keys and `nsec1…` for secret keys. Both
//! carry a 32-byte payload. Decoding is case-insensitive and validates the
//! BIP-173 checksum.

use bech32::primitives::decode::CheckedHrpstring;
use bech32::{Bech32, Hrp};

use crate::error::{Error, Result};

/// Prefix for bech32-encoded public keys.
pub const PREFIX_PUBLIC_KEY: &str = "npub";

/// Prefix for bech32-encoded secret keys.
pub const PREFIX_SECRET_KEY: &str = "nsec";

/// Encodes arbitrary bytes as bech32 with the given prefix.
///
/// # Errors
///
/// Returns [`Error::InvalidBech32`] if the prefix is empty or contains
/// characters outside the bech32 HRP alphabet.
pub fn encode(hrp: &str, data: &[u8]) -> Result<String> {
    let hrp = Hrp::parse(hrp).map_err(|e| Error::InvalidBech32(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| Error::InvalidBech32(e.to_string()))
}

/// Decodes a bech32 string into its prefix and payload bytes.
///
/// The input may be upper- or lowercase. The returned prefix is lowercased.
///
/// # Errors
///
/// Returns [`Error::InvalidBech32`] on unknown characters, a missing or
/// empty prefix, a payload shorter than the checksum, or a checksum
/// mismatch.
pub fn decode(s: &str) -> Result<(String, Vec<u8>)> {
    let checked =
        CheckedHrpstring::new::<Bech32>(s).map_err(|e| Error::InvalidBech32(e.to_string()))?;
    let hrp = checked.hrp().to_string().to_lowercase();
    let data = checked.byte_iter().collect();
    Ok((hrp, data))
}

/// Encodes a 32-byte x-only public key as an `npub1…` string.
///
/// # Errors
///
/// Returns [`Error::InvalidBech32`] if encoding fails.
pub fn encode_npub(pubkey: &[u8; 32]) -> Result<String> {
    encode(PREFIX_PUBLIC_KEY, pubkey)
}

/// Encodes a 32-byte secret key as an `nsec1…` string.
///
/// # Errors
///
/// Returns [`Error::InvalidBech32`] if encoding fails.
pub fn encode_nsec(secret: &[u8; 32]) -> Result<String> {
    encode(PREFIX_SECRET_KEY, secret)
}

/// Decodes an `npub1…` string into the 32-byte x-only public key.
///
/// # Errors
///
/// Returns [`Error::UnknownPrefix`] if the prefix is not `npub`, and
/// [`Error::InvalidBech32`] on malformed input or a payload that is not
/// exactly 32 bytes.
pub fn decode_npub(npub: &str) -> Result<[u8; 32]> {
    decode_fixed(npub, PREFIX_PUBLIC_KEY)
}

/// Decodes an `nsec1…` string into the 32-byte secret key.
///
/// # Errors
///
/// Returns [`Error::UnknownPrefix`] if the prefix is not `nsec`, and
/// [`Error::InvalidBech32`] on malformed input or a payload that is not
/// exactly 32 bytes.
pub fn decode_nsec(nsec: &str) -> Result<[u8; 32]> {
    decode_fixed(nsec, PREFIX_SECRET_KEY)
}

fn decode_fixed(s: &str, expected_hrp: &str) -> Result<[u8; 32]> {
    let (hrp, data) = decode(s)?;
    if hrp != expected_hrp {
        return Err(Error::UnknownPrefix(hrp));
    }
    data.try_into()
        .map_err(|_| Error::InvalidBech32(format!("{expected_hrp} payload must be 32 bytes")))
}
