//! Petrel Core Library
//!
//! Core functionality for Petrel, a private messenger built on the Nostr
//! protocol. This crate provides event cryptography (keys, signing, NIP-19
//! encoding, NIP-06 derivation), NIP-44 v2 sealed messages, NIP-59 gift
//! wrapping for private DMs, and the relay transport layer (per-relay
//! WebSocket connections and a multi-relay pool).

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_code)]

pub mod error;
pub mod nostr;
pub mod relay;

pub use error::{Error, Result};
