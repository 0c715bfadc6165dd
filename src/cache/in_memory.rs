//! Process-local cache
//!
//! Stands in for Redis in tests and single-replica deployments. Sticky
//! mappings kept here are not shared between gateway instances.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppResult;

struct Slot {
    json: String,
    deadline: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        self.deadline.map_or(true, |d| now < d)
    }
}

/// Same surface as `RedisCache`, backed by a locked map
///
/// `ttl` and `len` exist for inspection in tests.
pub struct InMemoryCache {
    slots: RwLock<HashMap<String, Slot>>,
    max_entries: usize,
}

impl InMemoryCache {
    /// `max_entries` bounds the map
    ///
    /// A write into a full map sweeps expired slots first. If every slot is
    /// still live, the one closest to expiry is evicted; slots without a TTL
    /// go last.
    pub fn new(max_entries: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let now = Instant::now();
        let slots = self.slots.read();

        match slots.get(key).filter(|s| s.live(now)) {
            Some(slot) => Ok(Some(serde_json::from_str(&slot.json)?)),
            None => Ok(None),
        }
    }

    /// Store a value; a zero TTL never expires
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> AppResult<()> {
        let json = serde_json::to_string(value)?;
        let now = Instant::now();
        let deadline = (ttl_seconds > 0)
            .then(|| now.checked_add(Duration::from_secs(ttl_seconds)))
            .flatten();

        let mut slots = self.slots.write();
        if slots.len() >= self.max_entries && !slots.contains_key(key) {
            slots.retain(|_, s| s.live(now));
        }
        if slots.len() >= self.max_entries && !slots.contains_key(key) {
            let victim = slots
                .iter()
                .min_by_key(|(_, s)| s.deadline.map_or((1, now), |d| (0, d)))
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                slots.remove(&victim);
            }
        }
        slots.insert(key.to_string(), Slot { json, deadline });
        Ok(())
    }

    /// Push a live key's expiry out to `seconds` from now
    pub async fn expire(&self, key: &str, seconds: u64) -> AppResult<()> {
        let now = Instant::now();
        if let Some(slot) = self.slots.write().get_mut(key).filter(|s| s.live(now)) {
            slot.deadline = now.checked_add(Duration::from_secs(seconds));
        }
        Ok(())
    }

    /// Whole seconds until the key expires, rounded up
    pub async fn ttl(&self, key: &str) -> AppResult<Option<u64>> {
        let now = Instant::now();
        let slots = self.slots.read();

        Ok(slots
            .get(key)
            .filter(|s| s.live(now))
            .and_then(|s| s.deadline)
            .map(|d| {
                let left = d.saturating_duration_since(now);
                left.as_secs() + u64::from(left.subsec_nanos() > 0)
            }))
    }

    pub async fn delete(&self, key: &str) -> AppResult<()> {
        self.slots.write().remove(key);
        Ok(())
    }

    /// Live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.read().values().filter(|s| s.live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
