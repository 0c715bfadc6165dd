//! Channel routing
//!
//! Holds the routing table of enabled channels, the per-(channel, model)
//! cooldown state, and the weighted selection that picks one channel per
//! attempt.

pub mod cooldown;
pub mod filter;
pub mod model;
pub mod registry;
pub mod selector;
pub mod store;

use thiserror::Error;

use crate::error::AppError;

pub use self::cooldown::CooldownTracker;
pub use self::filter::ChannelFilter;
pub use self::model::{Channel, ChannelId, ChannelType};
pub use self::registry::{ChannelRegistry, RoutingSnapshot};
pub use self::selector::WeightedSelector;
pub use self::store::{ChannelStore, StaticChannelStore};

/// Routing lookup failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("Model {model} is not available in group {group}")]
    ModelNotFound { group: String, model: String },

    #[error("No available channel for model {model} in group {group}")]
    NoChannel { group: String, model: String },
}

impl From<RoutingError> for AppError {
    fn from(err: RoutingError) -> Self {
        AppError::ServiceUnavailable(err.to_string())
    }
}
