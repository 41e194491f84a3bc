//! Relay transport.
//!
//! Nostr events travel over WebSocket connections to independently
//! operated relays. This module provides:
//!
//! - [`RelayConnection`]: a per-relay connection with a state machine,
//!   ping/pong liveness checks, publish acknowledgement tracking, and
//!   exponential-backoff reconnection
//! - [`RelayPool`]: fan-out publishing and subscriptions across many
//!   relays, with cross-relay event deduplication and automatic
//!   resubscription after a reconnect
//! - [`ClientMessage`] / [`RelayMessage`]: the NIP-01 JSON array frame
//!   dialect
//!
//! # Architecture
//!
//! ```text
//! RelayPool ──────────────┐
//!     │ fan-out           │ dedup cache, subscription records
//!     ▼                   ▼
//! RelayConnection    RelayConnection ...   (one per relay URL)
//!     │ reader/writer tasks, OK waiters, reconnect backoff
//!     ▼
//! WebSocket (ws:// or wss://)
//! ```
//!
//! Each connection serializes its state mutations behind its own locks;
//! the pool only interacts with connections through their async methods
//! and broadcast streams.

mod config;
mod connection;
mod message;
mod pool;

pub use config::{PoolConfig, RelayConfig};
pub use connection::{MessageStream, RelayConnection, RelayConnectionState, StateStream};
pub use message::{ClientMessage, RelayMessage};
pub use pool::{
    DeduplicationCache, RelayPool, SubscriptionHandler, SubscriptionUpdate,
};
