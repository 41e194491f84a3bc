//! NIP-59 gift wrap for private message delivery.
//!
//! A private message travels inside three layers:
//!
//! 1. **Rumor**: the event fields without a signature. Cannot be published
//!    on its own even if leaked.
//! 2. **Seal** (kind 13): the rumor JSON sealed with NIP-44 for the
//!    recipient, signed by the sender's real key. This is what
//!    authenticates the sender.
//! 3. **Gift wrap** (kind 1059): the seal JSON sealed again for the
//!    recipient, signed by a one-shot ephemeral key. Only the recipient
//!    `p` tag is visible to relays.
//!
//! Timestamps on the seal and wrap are randomized within ±48 hours to
//! prevent timing correlation. The ephemeral key is generated per wrap,
//! never exposed, and zeroized when dropped.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::event::{Event, UnsignedEvent};
use super::keys::KeyPair;
use super::nip44;

/// Kind for seal events (NIP-59).
pub const KIND_SEAL: u16 = 13;

/// Kind for private direct message rumors (NIP-17).
pub const KIND_PRIVATE_MESSAGE: u16 = 14;

/// Kind for gift wrap events (NIP-59).
pub const KIND_GIFT_WRAP: u16 = 1059;

/// Half-width of the timestamp randomization window, in seconds.
const TIMESTAMP_WINDOW: i64 = 2 * 24 * 60 * 60;

/// An event stripped of its signature, as carried inside a seal.
///
/// The `id` is kept so the recipient can reference the inner event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rumor {
    /// Event id of the inner event.
    pub id: String,
    /// Author x-only public key (hex).
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: i64,
    /// Event kind (14 for private messages).
    pub kind: u16,
    /// Ordered tags.
    pub tags: Vec<Vec<String>>,
    /// Message content.
    pub content: String,
}

impl From<&Event> for Rumor {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            pubkey: event.pubkey.clone(),
            created_at: event.created_at,
            kind: event.kind,
            tags: event.tags.clone(),
            content: event.content.clone(),
        }
    }
}

/// Result of unwrapping a gift wrap.
#[derive(Debug, Clone)]
pub struct Unwrapped {
    /// The sender's real public key, authenticated by the seal signature.
    pub sender_pubkey: String,

    /// The inner rumor.
    pub rumor: Rumor,
}

fn randomized_timestamp() -> i64 {
    let offset = rand::thread_rng().gen_range(-TIMESTAMP_WINDOW..=TIMESTAMP_WINDOW);
    Utc::now().timestamp() + offset
}

/// Gift-wraps a signed event for a recipient.
///
/// The event's signature is stripped to form the rumor; the rumor is
/// sealed for the recipient and signed by `sender`; the seal is sealed
/// again and signed by a fresh ephemeral key.
///
/// # Errors
///
/// Returns key or encryption errors if the recipient key is malformed or
/// sealing fails.
pub fn wrap(event: &Event, sender: &KeyPair, recipient_pubkey: &str) -> Result<Event> {
    let rumor = Rumor::from(event);
    let rumor_json = serde_json::to_string(&rumor)?;

    let seal_payload = nip44::seal(&rumor_json, recipient_pubkey, sender)?;
    let seal = UnsignedEvent::new(
        sender.pubkey_hex(),
        randomized_timestamp(),
        KIND_SEAL,
        vec![],
        seal_payload,
    )
    .sign(sender)?;
    let seal_json = seal.to_json()?;

    // One-shot key; dropped (and zeroized) as soon as the wrap is signed
    let ephemeral = KeyPair::generate();
    let wrap_payload = nip44::seal(&seal_json, recipient_pubkey, &ephemeral)?;

    UnsignedEvent::new(
        ephemeral.pubkey_hex(),
        randomized_timestamp(),
        KIND_GIFT_WRAP,
        vec![vec!["p".to_string(), recipient_pubkey.to_string()]],
        wrap_payload,
    )
    .sign(&ephemeral)
}

/// Unwraps a gift wrap addressed to `recipient`.
///
/// Opens the outer layer with the wrap's (ephemeral) pubkey, verifies the
/// seal signature to authenticate the true sender, then opens the inner
/// layer with the seal's pubkey.
///
/// # Errors
///
/// Returns [`Error::InvalidData`] for wrong kinds,
/// [`Error::VerificationFailed`] if the seal signature does not verify,
/// and decryption errors if either layer fails to open.
pub fn unwrap(wrap: &Event, recipient: &KeyPair) -> Result<Unwrapped> {
    if wrap.kind != KIND_GIFT_WRAP {
        return Err(Error::InvalidData(format!(
            "expected kind {KIND_GIFT_WRAP} gift wrap, got {}",
            wrap.kind
        )));
    }

    let seal_json = nip44::open(&wrap.content, &wrap.pubkey, recipient)?;
    let seal = Event::from_json(&seal_json)?;

    if seal.kind != KIND_SEAL {
        return Err(Error::InvalidData(format!(
            "expected kind {KIND_SEAL} seal, got {}",
            seal.kind
        )));
    }

    // The seal signature is what proves the sender's identity; a wrap
    // whose seal does not verify must never be surfaced
    match seal.verify() {
        Ok(true) => {}
        Ok(false) | Err(_) => return Err(Error::VerificationFailed),
    }

    let rumor_json = nip44::open(&seal.content, &seal.pubkey, recipient)?;
    let rumor: Rumor = serde_json::from_str(&rumor_json)?;

    Ok(Unwrapped {
        sender_pubkey: seal.pubkey,
        rumor,
    })
}

/// Builds an unsigned kind-14 private message rumor.
///
/// One `p` tag is added per recipient, plus optional `subject` and reply
/// (`e`) tags.
#[must_use]
pub fn private_message_rumor(
    sender: &KeyPair,
    recipients: &[String],
    content: &str,
    subject: Option<&str>,
    reply_to: Option<&str>,
) -> UnsignedEvent {
    let mut tags: Vec<Vec<String>> = recipients
        .iter()
        .map(|recipient| vec!["p".to_string(), recipient.clone()])
        .collect();
    if let Some(subject) = subject {
        tags.push(vec!["subject".to_string(), subject.to_string()]);
    }
    if let Some(reply_to) = reply_to {
        tags.push(vec![
            "e".to_string(),
            reply_to.to_string(),
            String::new(),
            "reply".to_string(),
        ]);
    }

    UnsignedEvent::now(
        sender.pubkey_hex(),
        KIND_PRIVATE_MESSAGE,
        tags,
        content.to_string(),
    )
}

/// Gift-wraps a rumor once per recipient plus once for the sender.
///
/// The sender's own copy lets them recover the conversation on a new
/// device. Returns `(recipient_pubkey, wrap)` pairs.
///
/// # Errors
///
/// Returns key or encryption errors if any recipient key is malformed or
/// sealing fails.
pub fn wrap_for_group(
    rumor: UnsignedEvent,
    sender: &KeyPair,
    recipients: &[String],
) -> Result<Vec<(String, Event)>> {
    let signed = rumor.sign(sender)?;

    let mut wraps = Vec::with_capacity(recipients.len() + 1);
    for recipient in recipients {
        wraps.push((recipient.clone(), wrap(&signed, sender, recipient)?));
    }

    let own_pubkey = sender.pubkey_hex();
    if !recipients.contains(&own_pubkey) {
        let own_wrap = wrap(&signed, sender, &own_pubkey)?;
        wraps.push((own_pubkey, own_wrap));
    }

    Ok(wraps)
}
