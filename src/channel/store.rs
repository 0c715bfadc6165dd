//! Channel configuration sources
//!
//! Channels are created and edited elsewhere; the gateway only reads them.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::AppResult;

use super::model::{Channel, ChannelId};

/// Read-only access to the channel configuration store
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// All channels currently marked enabled
    async fn list_enabled_channels(&self) -> AppResult<Vec<Channel>>;

    /// One channel by id, enabled or not
    async fn get_channel_by_id(&self, id: ChannelId) -> AppResult<Option<Channel>>;
}

/// Fixed in-memory channel list
///
/// Useful for tests and for running without a control plane.
#[derive(Default)]
pub struct StaticChannelStore {
    channels: RwLock<Vec<Channel>>,
}

impl StaticChannelStore {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels: RwLock::new(channels),
        }
    }

    /// Replace the whole channel list
    pub fn replace(&self, channels: Vec<Channel>) {
        *self.channels.write() = channels;
    }

    /// Insert or update one channel
    pub fn upsert(&self, channel: Channel) {
        let mut channels = self.channels.write();
        match channels.iter_mut().find(|c| c.id == channel.id) {
            Some(existing) => *existing = channel,
            None => channels.push(channel),
        }
    }
}

#[async_trait]
impl ChannelStore for StaticChannelStore {
    async fn list_enabled_channels(&self) -> AppResult<Vec<Channel>> {
        Ok(self
            .channels
            .read()
            .iter()
            .filter(|c| c.is_enabled())
            .cloned()
            .collect())
    }

    async fn get_channel_by_id(&self, id: ChannelId) -> AppResult<Option<Channel>> {
        Ok(self.channels.read().iter().find(|c| c.id == id).cloned())
    }
}
