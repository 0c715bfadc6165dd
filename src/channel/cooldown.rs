//! Per-(channel, model) cooldown tracking
//!
//! A channel that fails transiently for a model is excluded from selection
//! for that model until its cooldown expires. Other models on the same
//! channel stay eligible.
//!
//! Entries live in a sharded concurrent map so unrelated keys never contend.
//! Expired entries are ignored on read and reclaimed by a periodic sweep.
//! State is per instance; nothing is shared across processes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::model::ChannelId;

/// Cooldown key: one window per channel and model
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CooldownKey {
    channel_id: ChannelId,
    model: String,
}

impl CooldownKey {
    fn new(channel_id: ChannelId, model: &str) -> Self {
        Self {
            channel_id,
            model: model.to_string(),
        }
    }
}

/// Tracks cooldown windows keyed by (channel, model)
///
/// Expiry timestamps are unix seconds. The `*_at` variants take an explicit
/// `now` so callers and tests can drive time deterministically.
pub struct CooldownTracker {
    entries: DashMap<CooldownKey, i64>,
    default_seconds: i64,
}

impl CooldownTracker {
    /// Create a tracker whose default window is `default_seconds`
    pub fn new(default_seconds: i64) -> Self {
        Self {
            entries: DashMap::new(),
            default_seconds,
        }
    }

    /// Default cooldown window in seconds
    pub fn default_seconds(&self) -> i64 {
        self.default_seconds
    }

    /// Apply the default cooldown window
    pub fn set_cooldown(&self, channel_id: ChannelId, model: &str) -> bool {
        self.set_cooldown_with_duration(channel_id, model, self.default_seconds)
    }

    /// Apply a cooldown window of `seconds` starting now
    pub fn set_cooldown_with_duration(&self, channel_id: ChannelId, model: &str, seconds: i64) -> bool {
        self.set_cooldown_at(channel_id, model, seconds, Utc::now().timestamp())
    }

    /// Apply a cooldown window of `seconds` starting at `now`
    ///
    /// An active window is never shortened or extended. A vacant or expired
    /// slot takes the new expiry. The update runs under the key's shard lock,
    /// so of two racing writers on an expired slot the first one wins and the
    /// second sees an active window.
    ///
    /// Returns false for invalid input (no channel, empty model, zero window).
    pub fn set_cooldown_at(&self, channel_id: ChannelId, model: &str, seconds: i64, now: i64) -> bool {
        if channel_id == 0 || model.is_empty() || seconds <= 0 {
            return false;
        }

        let expiry = now.saturating_add(seconds);
        match self.entries.entry(CooldownKey::new(channel_id, model)) {
            Entry::Vacant(slot) => {
                slot.insert(expiry);
            }
            Entry::Occupied(mut slot) => {
                if now >= *slot.get() {
                    slot.insert(expiry);
                }
            }
        }

        true
    }

    /// Whether (channel, model) is cooling down right now
    pub fn is_in_cooldown(&self, channel_id: ChannelId, model: &str) -> bool {
        self.is_in_cooldown_at(channel_id, model, Utc::now().timestamp())
    }

    /// Whether (channel, model) is cooling down at `now`
    pub fn is_in_cooldown_at(&self, channel_id: ChannelId, model: &str, now: i64) -> bool {
        if channel_id == 0 || model.is_empty() {
            return false;
        }

        self.entries
            .get(&CooldownKey::new(channel_id, model))
            .map(|expiry| now < *expiry)
            .unwrap_or(false)
    }

    /// Seconds left in the window, if any
    pub fn remaining_at(&self, channel_id: ChannelId, model: &str, now: i64) -> Option<i64> {
        self.entries
            .get(&CooldownKey::new(channel_id, model))
            .map(|expiry| expiry.saturating_sub(now))
            .filter(|left| *left > 0)
    }

    /// Remove entries whose expiry has passed; returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now().timestamp())
    }

    /// Remove entries already expired at `now`
    ///
    /// `retain` holds each shard's write lock while it filters, so an entry
    /// being extended concurrently is either seen with its new expiry or
    /// written after the sweep passed its shard. Live entries are never
    /// dropped.
    pub fn sweep_expired_at(&self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expiry| now < *expiry);
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries (live or not yet swept)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn the background sweep task
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = tracker.sweep_expired();
                if removed > 0 {
                    info!(removed, remaining = tracker.len(), "Swept expired channel cooldowns");
                } else {
                    debug!(remaining = tracker.len(), "Cooldown sweep found nothing to remove");
                }
            }
        })
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(60)
    }
}
