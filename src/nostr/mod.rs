//! Nostr event cryptography.
//!
//! This module covers everything needed to produce and consume Nostr events
//! without touching the network:
//!
//! - [`KeyPair`]: secp256k1 x-only identity keys with nsec/npub encoding
//! - [`derivation`]: BIP-39 mnemonics and NIP-06 key derivation
//! - [`Event`] / [`UnsignedEvent`]: NIP-01 canonical hashing, Schnorr
//!   signing and verification
//! - [`nip44`]: NIP-44 v2 authenticated encryption
//! - [`giftwrap`]: NIP-59 rumor/seal/wrap layering for private DMs
//! - [`Filter`]: subscription filters with dynamic `#<tag>` selectors
//!
//! # Gift wrap layering
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │ Gift wrap (kind 1059) - PUBLIC                      │
//! │ • Signed by a one-shot ephemeral key                │
//! │ • Timestamp randomized ±48 hours                    │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │ Seal (kind 13) - NIP-44 ENCRYPTED             │  │
//! │  │ • Signed by the sender's real key             │  │
//! │  │  ┌─────────────────────────────────────────┐  │  │
//! │  │  │ Rumor (kind 14) - UNSIGNED              │  │  │
//! │  │  │ • The actual private message            │  │  │
//! │  │  └─────────────────────────────────────────┘  │  │
//! │  └───────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! All types here are pure and safe to use from multiple tasks.

mod event;
mod filter;
mod keys;

pub mod derivation;
pub mod giftwrap;
pub mod nip19;
pub mod nip44;

pub use event::{Event, UnsignedEvent};
pub use filter::Filter;
pub use keys::{public_key_from_npub, KeyPair, SECP};
