//! In-memory store used by tests and as a single-process dev fallback.
//!
//! TTLs are enforced lazily against the injected [`Clock`]; expired entries are
//! dropped on access, mirroring how the real store expires keys passively.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use super::{KeyValueStore, StoreResult, glob_match};
use crate::clock::Clock;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    /// Unix seconds after which the entry no longer exists. `None` = no expiry.
    expires_at: Option<i64>,
}

struct Channels {
    senders: HashMap<String, broadcast::Sender<String>>,
}

pub struct InMemoryStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
    channels: Mutex<Channels>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            channels: Mutex::new(Channels {
                senders: HashMap::new(),
            }),
        }
    }

    fn live<'a>(&self, entry: Option<&'a Entry>, now: i64) -> Option<&'a Entry> {
        entry.filter(|entry| entry.expires_at.map_or(true, |expires_at| expires_at > now))
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now_unix();
        let mut entries = self.entries.lock().await;
        match self.live(entries.get(key), now) {
            Some(entry) => Ok(Some(entry.value.clone())),
            None => {
                entries.remove(key);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> StoreResult<()> {
        let now = self.clock.now_unix();
        let expires_at = ttl_seconds.map(|ttl| now + i64::try_from(ttl).unwrap_or(i64::MAX / 2));
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let now = self.clock.now_unix();
        let mut entries = self.entries.lock().await;
        let (current, expires_at) = match self.live(entries.get(key), now) {
            Some(entry) => (entry.value.parse::<i64>().unwrap_or(0), entry.expires_at),
            None => (0, None),
        };
        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> StoreResult<()> {
        let now = self.clock.now_unix();
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(now + i64::try_from(ttl_seconds).unwrap_or(i64::MAX / 2));
        }
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let now = self.clock.now_unix();
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| {
                glob_match(pattern, key)
                    && entry.expires_at.map_or(true, |expires_at| expires_at > now)
            })
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        let channels = self.channels.lock().await;
        if let Some(sender) = channels.senders.get(channel) {
            // No subscribers is not an error.
            let _ = sender.send(message.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<UnboundedReceiver<String>> {
        let mut channels = self.channels.lock().await;
        let sender = channels
            .senders
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone();
        let mut broadcast_rx = sender.subscribe();
        let (tx, rx) = unbounded_channel();
        tokio::spawn(async move {
            while let Ok(message) = broadcast_rx.recv().await {
                if tx.send(message).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (InMemoryStore, Arc<ManualClock>) {
        let clock = ManualClock::new(1_000);
        (InMemoryStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn get_set_round_trip() -> anyhow::Result<()> {
        let (store, _clock) = store_with_clock();
        store.set("key", "value", None).await?;
        assert_eq!(store.get("key").await?, Some("value".to_string()));
        store.del("key").await?;
        assert_eq!(store.get("key").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn ttl_expires_entries() -> anyhow::Result<()> {
        let (store, clock) = store_with_clock();
        store.set("key", "value", Some(60)).await?;
        assert_eq!(store.get("key").await?, Some("value".to_string()));
        clock.advance(61);
        assert_eq!(store.get("key").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn incr_counts_and_restarts_after_expiry() -> anyhow::Result<()> {
        let (store, clock) = store_with_clock();
        assert_eq!(store.incr("counter").await?, 1);
        assert_eq!(store.incr("counter").await?, 2);
        store.expire("counter", 30).await?;
        clock.advance(31);
        assert_eq!(store.incr("counter").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn keys_filters_by_pattern_and_liveness() -> anyhow::Result<()> {
        let (store, clock) = store_with_clock();
        store.set("session:a", "1", None).await?;
        store.set("session:b", "1", Some(10)).await?;
        store.set("user:c", "1", None).await?;
        clock.advance(11);
        let mut keys = store.keys("session:*").await?;
        keys.sort();
        assert_eq!(keys, vec!["session:a".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() -> anyhow::Result<()> {
        let (store, _clock) = store_with_clock();
        let mut rx = store.subscribe("alerts").await?;
        store.publish("alerts", "blocked").await?;
        let message = rx.recv().await;
        assert_eq!(message, Some("blocked".to_string()));
        Ok(())
    }
}
