//! NIP-06 deterministic key derivation from BIP-39 mnemonics.
//!
//! A Nostr identity can be backed by a mnemonic phrase. The phrase maps to
//! a 64-byte seed (PBKDF2-HMAC-SHA512, 2048 iterations, salt
//! `"mnemonic" + passphrase`), the seed to a BIP-32 master key, and the
//! master key to the Nostr key along `m/44'/1237'/account'/0/0`.
//!
//! Reference: <https://github.com/nostr-protocol/nips/blob/master/06.md>

use std::str::FromStr;

use bip39::{Language, Mnemonic};
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::Network;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

use super::keys::{KeyPair, SECP};

/// SLIP-44 coin type registered for Nostr.
pub const NOSTR_COIN_TYPE: u32 = 1237;

/// Generates a new random mnemonic phrase.
///
/// # Arguments
///
/// * `word_count` - 12, 15, 18, 21, or 24 words
///
/// # Errors
///
/// Returns [`Error::InvalidMnemonic`] for an unsupported word count.
pub fn generate_mnemonic(word_count: usize) -> Result<String> {
    let entropy_bytes = match word_count {
        12 => 16,
        15 => 20,
        18 => 24,
        21 => 28,
        24 => 32,
        other => {
            return Err(Error::InvalidMnemonic(format!(
                "unsupported word count: {other}"
            )))
        }
    };

    let mut entropy = Zeroizing::new(vec![0u8; entropy_bytes]);
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    mnemonic_from_entropy(&entropy)
}

/// Encodes entropy bytes as an English mnemonic phrase.
///
/// # Arguments
///
/// * `entropy` - 16, 20, 24, 28, or 32 bytes
///
/// # Errors
///
/// Returns [`Error::InvalidMnemonic`] for an unsupported entropy length.
pub fn mnemonic_from_entropy(entropy: &[u8]) -> Result<String> {
    let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy)
        .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
    Ok(mnemonic.to_string())
}

/// Recovers the entropy bytes from an English mnemonic phrase.
///
/// The checksum bits (entropy bits / 32 leading bits of
/// `SHA-256(entropy)`) are validated.
///
/// # Errors
///
/// Returns [`Error::InvalidMnemonicWord`] for a word outside the word
/// list, [`Error::InvalidMnemonicChecksum`] for a checksum mismatch, and
/// [`Error::InvalidMnemonic`] for a bad word count.
pub fn entropy_from_mnemonic(phrase: &str) -> Result<Zeroizing<Vec<u8>>> {
    let mnemonic = parse_mnemonic(phrase)?;
    Ok(Zeroizing::new(mnemonic.to_entropy()))
}

/// Derives the 64-byte BIP-39 seed from a mnemonic phrase.
///
/// # Errors
///
/// Returns a mnemonic error if the phrase is invalid.
pub fn seed_from_mnemonic(phrase: &str, passphrase: &str) -> Result<Zeroizing<[u8; 64]>> {
    let mnemonic = parse_mnemonic(phrase)?;
    Ok(Zeroizing::new(mnemonic.to_seed(passphrase)))
}

/// Derives the Nostr keypair for an account from a mnemonic phrase.
///
/// Follows the NIP-06 path `m/44'/1237'/account'/0/0`.
///
/// # Example
///
/// ```
/// use petrel_core::nostr::derivation::derive_keypair;
///
/// let phrase = "leader monkey parrot ring guide accident before fence cannon height naive bean";
/// let keypair = derive_keypair(phrase, "", 0).unwrap();
/// assert_eq!(
///     keypair.pubkey_hex(),
///     "17162c921dc4d2518f9a101db33695df1afb56ab82f5ff3e5da6eec3ca5cd917"
/// );
/// ```
///
/// # Errors
///
/// Returns a mnemonic error for an invalid phrase, or
/// [`Error::InvalidPrivateKey`] if child derivation produces an unusable
/// scalar (probability is negligible; the condition is treated as
/// unrecoverable rather than retried at the next index).
pub fn derive_keypair(phrase: &str, passphrase: &str, account: u32) -> Result<KeyPair> {
    let seed = seed_from_mnemonic(phrase, passphrase)?;

    let master =
        Xpriv::new_master(Network::Bitcoin, seed.as_ref()).map_err(|_| Error::InvalidPrivateKey)?;

    let path = DerivationPath::from_str(&format!("m/44'/{NOSTR_COIN_TYPE}'/{account}'/0/0"))
        .map_err(|_| Error::InvalidPrivateKey)?;
    let child = master
        .derive_priv(&SECP, &path)
        .map_err(|_| Error::InvalidPrivateKey)?;

    KeyPair::from_secret_bytes(child.private_key.secret_bytes())
}

fn parse_mnemonic(phrase: &str) -> Result<Mnemonic> {
    Mnemonic::parse_in(Language::English, phrase).map_err(|e| match e {
        bip39::Error::UnknownWord(index) => {
            let word = phrase
                .split_whitespace()
                .nth(index)
                .unwrap_or_default()
                .to_string();
            Error::InvalidMnemonicWord(word)
        }
        bip39::Error::InvalidChecksum => Error::InvalidMnemonicChecksum,
        other => Error::InvalidMnemonic(other.to_string()),
    })
}
