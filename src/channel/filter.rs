//! Channel eligibility filters
//!
//! A filter excludes a channel from selection and counting. Filters are
//! built per request and applied on top of the enabled/cooldown checks.

use std::collections::HashSet;

use super::model::{Channel, ChannelId, ChannelType};

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFilter {
    /// Channels already tried by this request
    ExcludeIds(HashSet<ChannelId>),
    /// Only these provider types are acceptable
    AllowTypes(Vec<ChannelType>),
    /// Skip channels marked chat-only
    SkipOnlyChat,
    /// Skip channels that cannot stream the given model
    StreamCapable(String),
}

impl ChannelFilter {
    /// Build an exclusion filter from a skip-list
    pub fn exclude(ids: impl IntoIterator<Item = ChannelId>) -> Self {
        ChannelFilter::ExcludeIds(ids.into_iter().collect())
    }

    /// True when the channel must be skipped
    pub fn excludes(&self, channel: &Channel) -> bool {
        match self {
            ChannelFilter::ExcludeIds(ids) => ids.contains(&channel.id),
            ChannelFilter::AllowTypes(types) => !types.contains(&channel.channel_type),
            ChannelFilter::SkipOnlyChat => channel.only_chat,
            ChannelFilter::StreamCapable(model) => !channel.allows_stream(model),
        }
    }
}

/// True when no filter excludes the channel
pub fn passes_all(filters: &[ChannelFilter], channel: &Channel) -> bool {
    !filters.iter().any(|f| f.excludes(channel))
}
