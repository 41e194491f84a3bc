//! Multi-relay pool.
//!
//! The pool owns one [`RelayConnection`] per URL and gives callers a
//! single surface for fan-out publishing and subscriptions. Events seen
//! on several relays are delivered to a subscription handler exactly once
//! while their deduplication entry is live. When a relay drops and comes
//! back, the pool re-sends every active `REQ` on that connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::nostr::{Event, Filter};

use super::config::{PoolConfig, RelayConfig};
use super::connection::{RelayConnection, RelayConnectionState};
use super::message::RelayMessage;

/// Pause between wiring the message drains and sending `REQ`, so the
/// drains never miss the first stored events.
const SUBSCRIBE_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Default gate between lazy deduplication cleanups.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// A notification delivered to a subscription handler.
#[derive(Debug, Clone)]
pub enum SubscriptionUpdate {
    /// A deduplicated event matching the subscription.
    Event {
        /// Relay the event arrived from first.
        relay_url: String,
        /// The event.
        event: Event,
    },

    /// A relay finished sending stored events for the subscription.
    EndOfStoredEvents {
        /// Relay that reached the end of its backlog.
        relay_url: String,
    },
}

/// Callback invoked for subscription updates.
///
/// Handlers may be invoked concurrently, once per distinct event.
pub type SubscriptionHandler = Arc<dyn Fn(SubscriptionUpdate) + Send + Sync>;

struct SubscriptionRecord {
    filters: Vec<Filter>,
    handler: SubscriptionHandler,
}

/// Bounded `event id -> first seen` map with TTL-based expiry.
///
/// Cleanup is lazy: scans run at most once per cleanup interval, first
/// dropping expired entries, then evicting oldest entries if the cache
/// still exceeds its size bound. Between cleanups the cache may briefly
/// overshoot `max_size`.
pub struct DeduplicationCache {
    entries: HashMap<String, Instant>,
    last_cleanup: Instant,
    cleanup_interval: Duration,
    max_size: usize,
    ttl: Duration,
}

impl DeduplicationCache {
    /// Creates a cache with the default 60 s cleanup gate.
    #[must_use]
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self::with_cleanup_interval(max_size, ttl, CLEANUP_INTERVAL)
    }

    /// Creates a cache with an explicit cleanup gate interval.
    #[must_use]
    pub fn with_cleanup_interval(max_size: usize, ttl: Duration, cleanup_interval: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            last_cleanup: Instant::now(),
            cleanup_interval,
            max_size,
            ttl,
        }
    }

    /// Records `event_id` if unseen; returns whether it was fresh.
    pub fn insert_if_fresh(&mut self, event_id: &str) -> bool {
        self.maybe_cleanup();
        if self.entries.contains_key(event_id) {
            return false;
        }
        self.entries.insert(event_id.to_string(), Instant::now());
        true
    }

    /// Returns whether `event_id` is currently tracked.
    #[must_use]
    pub fn contains(&self, event_id: &str) -> bool {
        self.entries.contains_key(event_id)
    }

    /// Returns the number of tracked ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn maybe_cleanup(&mut self) {
        if self.last_cleanup.elapsed() <= self.cleanup_interval {
            return;
        }
        self.last_cleanup = Instant::now();

        let ttl = self.ttl;
        self.entries.retain(|_, seen| seen.elapsed() <= ttl);

        if self.entries.len() > self.max_size {
            let mut by_age: Vec<(String, Instant)> = self
                .entries
                .iter()
                .map(|(id, seen)| (id.clone(), *seen))
                .collect();
            by_age.sort_by_key(|(_, seen)| *seen);

            let excess = self.entries.len() - self.max_size;
            for (id, _) in by_age.into_iter().take(excess) {
                self.entries.remove(&id);
            }
        }
    }
}

/// A pool of relay connections sharing subscriptions and deduplication.
///
/// Cheap to clone; all clones share the same relays and state.
#[derive(Clone)]
pub struct RelayPool {
    config: PoolConfig,
    relays: Arc<RwLock<HashMap<String, RelayConnection>>>,
    subscriptions: Arc<RwLock<HashMap<String, Arc<SubscriptionRecord>>>>,
    event_cache: Arc<Mutex<DeduplicationCache>>,
}

impl RelayPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let cache = DeduplicationCache::new(
            config.max_deduplication_cache_size,
            config.deduplication_cache_ttl,
        );
        Self {
            config,
            relays: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            event_cache: Arc::new(Mutex::new(cache)),
        }
    }

    /// Adds a relay, or returns the existing connection for its URL.
    ///
    /// The pool starts watching the connection's state so that a relay
    /// which was connected, dropped, and reconnected gets every active
    /// subscription re-sent.
    pub async fn add(&self, url: impl Into<String>, config: Option<RelayConfig>) -> RelayConnection {
        let url = url.into();
        {
            let relays = self.relays.read().await;
            if let Some(existing) = relays.get(&url) {
                return existing.clone();
            }
        }

        let connection = RelayConnection::new(
            url.clone(),
            config.unwrap_or_else(|| self.config.default_relay_config.clone()),
        );

        let mut relays = self.relays.write().await;
        // A concurrent add may have won the race
        if let Some(existing) = relays.get(&url) {
            return existing.clone();
        }
        relays.insert(url.clone(), connection.clone());
        drop(relays);

        info!(%url, "added relay to pool");
        let pool = self.clone();
        let watched = connection.clone();
        tokio::spawn(async move { pool.watch_connection(url, watched).await });

        connection
    }

    /// Returns the connection for `url`, if the pool has one.
    pub async fn relay(&self, url: &str) -> Option<RelayConnection> {
        self.relays.read().await.get(url).cloned()
    }

    /// Returns the number of relays in the pool.
    pub async fn relay_count(&self) -> usize {
        self.relays.read().await.len()
    }

    /// Connects every relay in parallel and returns the success count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] only when the pool is
    /// non-empty and no relay could be connected.
    pub async fn connect_all(&self) -> Result<usize> {
        let connections: Vec<RelayConnection> =
            self.relays.read().await.values().cloned().collect();
        if connections.is_empty() {
            return Ok(0);
        }

        let results = join_all(connections.iter().map(RelayConnection::connect)).await;
        let connected = results.iter().filter(|result| result.is_ok()).count();
        info!(connected, total = connections.len(), "pool connect finished");

        if connected == 0 {
            return Err(Error::ConnectionFailed(
                "All relays failed to connect".to_string(),
            ));
        }
        Ok(connected)
    }

    /// Disconnects every relay in parallel.
    pub async fn disconnect_all(&self) {
        let connections: Vec<RelayConnection> =
            self.relays.read().await.values().cloned().collect();
        join_all(connections.iter().map(RelayConnection::disconnect)).await;
    }

    /// Publishes an event to every relay in parallel.
    ///
    /// Returns the number of relays that accepted the event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] for an empty pool, otherwise the
    /// last per-relay error when no relay accepted the event.
    pub async fn publish(&self, event: &Event) -> Result<usize> {
        let connections: Vec<RelayConnection> =
            self.relays.read().await.values().cloned().collect();
        if connections.is_empty() {
            return Err(Error::NotConnected);
        }

        let results = join_all(connections.iter().map(|conn| conn.publish(event))).await;
        let accepted = results.iter().filter(|result| result.is_ok()).count();
        debug!(event_id = %event.id, accepted, total = connections.len(), "pool publish finished");

        if accepted == 0 {
            let last_error = results
                .into_iter()
                .filter_map(std::result::Result::err)
                .next_back()
                .unwrap_or(Error::NotConnected);
            return Err(last_error);
        }
        Ok(accepted)
    }

    /// Subscribes on every relay and delivers deduplicated events to
    /// `handler`.
    ///
    /// The subscription is recorded before any wire traffic so inbound
    /// events cannot be dropped, then a message drain is spawned per
    /// relay, and after a short settling delay the `REQ` frames go out in
    /// parallel. Returns the number of relays that accepted the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelayError`] when zero relays accepted the
    /// request, an empty pool included. The record stays active so a
    /// later reconnect still resubscribes.
    pub async fn subscribe(
        &self,
        subscription_id: &str,
        filters: Vec<Filter>,
        handler: SubscriptionHandler,
    ) -> Result<usize> {
        let record = Arc::new(SubscriptionRecord {
            filters: filters.clone(),
            handler,
        });
        self.subscriptions
            .write()
            .await
            .insert(subscription_id.to_string(), record.clone());

        let connections: Vec<(String, RelayConnection)> = self
            .relays
            .read()
            .await
            .iter()
            .map(|(url, conn)| (url.clone(), conn.clone()))
            .collect();

        for (url, connection) in &connections {
            let pool = self.clone();
            let drain_url = url.clone();
            let drain_connection = connection.clone();
            let drain_record = record.clone();
            let drain_id = subscription_id.to_string();
            tokio::spawn(async move {
                pool.drain_messages(drain_url, drain_connection, drain_id, drain_record)
                    .await;
            });
        }

        tokio::time::sleep(SUBSCRIBE_SETTLE_DELAY).await;

        let results = join_all(
            connections
                .iter()
                .map(|(_, conn)| conn.subscribe(subscription_id, &filters)),
        )
        .await;
        let accepted = results.iter().filter(|result| result.is_ok()).count();
        debug!(subscription_id, accepted, total = connections.len(), "pool subscribe finished");

        if accepted == 0 {
            return Err(Error::RelayError(
                "no relay accepted the subscription".to_string(),
            ));
        }
        Ok(accepted)
    }

    /// Removes a subscription and best-effort closes it on every relay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubscriptionNotFound`] if the id is not active.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        if self
            .subscriptions
            .write()
            .await
            .remove(subscription_id)
            .is_none()
        {
            return Err(Error::SubscriptionNotFound(subscription_id.to_string()));
        }

        let connections: Vec<RelayConnection> =
            self.relays.read().await.values().cloned().collect();
        // CLOSE failures are irrelevant once the record is gone
        let _ = join_all(
            connections
                .iter()
                .map(|conn| conn.unsubscribe(subscription_id)),
        )
        .await;
        Ok(())
    }

    /// Drains one connection's messages for one subscription.
    async fn drain_messages(
        &self,
        relay_url: String,
        connection: RelayConnection,
        subscription_id: String,
        record: Arc<SubscriptionRecord>,
    ) {
        let mut stream = connection.messages();
        while let Some(message) = stream.recv().await {
            if !self
                .subscriptions
                .read()
                .await
                .contains_key(&subscription_id)
            {
                break;
            }

            match message {
                RelayMessage::Event {
                    subscription_id: incoming_id,
                    event,
                } if incoming_id == subscription_id => {
                    let fresh = self.event_cache.lock().await.insert_if_fresh(&event.id);
                    if fresh {
                        (record.handler)(SubscriptionUpdate::Event {
                            relay_url: relay_url.clone(),
                            event,
                        });
                    }
                }
                RelayMessage::EndOfStoredEvents {
                    subscription_id: incoming_id,
                } if incoming_id == subscription_id => {
                    (record.handler)(SubscriptionUpdate::EndOfStoredEvents {
                        relay_url: relay_url.clone(),
                    });
                }
                _ => {}
            }
        }
    }

    /// Re-sends active subscriptions after a relay comes back.
    async fn watch_connection(&self, url: String, connection: RelayConnection) {
        let mut states = connection.state_changes().await;
        let mut was_connected = false;
        let mut lost = false;

        while let Some(state) = states.recv().await {
            if state == RelayConnectionState::Connected {
                if was_connected && lost {
                    self.resubscribe(&url, &connection).await;
                }
                was_connected = true;
                lost = false;
            } else if was_connected {
                lost = true;
            }
        }
    }

    async fn resubscribe(&self, url: &str, connection: &RelayConnection) {
        let active: Vec<(String, Vec<Filter>)> = self
            .subscriptions
            .read()
            .await
            .iter()
            .map(|(id, record)| (id.clone(), record.filters.clone()))
            .collect();

        for (subscription_id, filters) in active {
            match connection.subscribe(&subscription_id, &filters).await {
                Ok(()) => debug!(%url, subscription_id, "resubscribed after reconnect"),
                Err(e) => warn!(%url, subscription_id, error = %e, "resubscribe failed"),
            }
        }
    }
}

impl std::fmt::Debug for RelayPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPool").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_admits_fresh_ids_once() {
        let mut cache = DeduplicationCache::new(100, Duration::from_secs(300));
        assert!(cache.insert_if_fresh("aa"));
        assert!(!cache.insert_if_fresh("aa"));
        assert!(cache.insert_if_fresh("bb"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn cache_expires_entries_after_ttl() {
        let mut cache = DeduplicationCache::with_cleanup_interval(
            100,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        assert!(cache.insert_if_fresh("aa"));
        std::thread::sleep(Duration::from_millis(30));

        // The next insert runs the gated cleanup, dropping the expired id
        assert!(cache.insert_if_fresh("bb"));
        assert!(!cache.contains("aa"));
        assert!(cache.insert_if_fresh("aa"));
    }

    #[test]
    fn cache_cleanup_is_gated() {
        let mut cache = DeduplicationCache::with_cleanup_interval(
            100,
            Duration::from_millis(10),
            Duration::from_secs(3600),
        );
        assert!(cache.insert_if_fresh("aa"));
        std::thread::sleep(Duration::from_millis(30));

        // TTL elapsed but the gate has not; the entry is still deduped
        assert!(!cache.insert_if_fresh("aa"));
    }

    #[test]
    fn cache_evicts_oldest_beyond_max_size() {
        let mut cache = DeduplicationCache::with_cleanup_interval(
            2,
            Duration::from_secs(3600),
            Duration::from_millis(5),
        );
        assert!(cache.insert_if_fresh("oldest"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.insert_if_fresh("middle"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.insert_if_fresh("newest"));

        // Over the bound; next gated cleanup drops the oldest entry
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.insert_if_fresh("trigger"));
        assert!(!cache.contains("oldest"));
        assert!(cache.contains("newest"));
    }

    #[test]
    fn cache_len_and_is_empty() {
        let mut cache = DeduplicationCache::new(10, Duration::from_secs(300));
        assert!(cache.is_empty());
        cache.insert_if_fresh("aa");
        assert!(!cache.is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let pool = RelayPool::new(PoolConfig::default());
        let first = pool.add("ws://127.0.0.1:1", None).await;
        let second = pool.add("ws://127.0.0.1:1", None).await;
        assert_eq!(first.url(), second.url());
        assert_eq!(pool.relay_count().await, 1);
    }

    #[tokio::test]
    async fn connect_all_on_empty_pool_is_zero() {
        let pool = RelayPool::new(PoolConfig::default());
        assert_eq!(pool.connect_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn connect_all_with_no_reachable_relay_errors() {
        let mut config = PoolConfig::default();
        config.default_relay_config.auto_reconnect = false;
        config.default_relay_config.connection_timeout = Duration::from_millis(300);

        let pool = RelayPool::new(config);
        pool.add("ws://127.0.0.1:1", None).await;

        let result = pool.connect_all().await;
        assert!(
            matches!(result, Err(Error::ConnectionFailed(ref m)) if m == "All relays failed to connect")
        );
    }

    #[tokio::test]
    async fn publish_on_empty_pool_errors() {
        use crate::nostr::{KeyPair, UnsignedEvent};

        let pool = RelayPool::new(PoolConfig::default());
        let keypair = KeyPair::generate();
        let event = UnsignedEvent::now(keypair.pubkey_hex(), 1, vec![], "hi".to_string())
            .sign(&keypair)
            .unwrap();

        let result = pool.publish(&event).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn subscribe_on_empty_pool_errors() {
        use crate::nostr::Filter;

        let pool = RelayPool::new(PoolConfig::default());
        let handler: SubscriptionHandler = Arc::new(|_| {});

        let result = pool
            .subscribe("lonely", vec![Filter::new().kinds(vec![1])], handler)
            .await;
        assert!(matches!(result, Err(Error::RelayError(_))));
    }

    #[tokio::test]
    async fn unsubscribe_unknown_id_errors() {
        let pool = RelayPool::new(PoolConfig::default());
        let result = pool.unsubscribe("nope").await;
        assert!(matches!(result, Err(Error::SubscriptionNotFound(id)) if id == "nope"));
    }
}
