//! Per-tier channel selection
//!
//! Sticky affinity first, then weighted random among eligible candidates.

use std::sync::Arc;

use rand::{rng, Rng};
use tracing::{debug, info};

use crate::session::{SessionContext, SessionKeyRegistry, StickySessionManager};

use super::{
    cooldown::CooldownTracker,
    filter::ChannelFilter,
    model::{Channel, ChannelId, ChannelType},
    registry::RoutingSnapshot,
};

/// Index picked by walking `weights` with a roll in `[0, sum)`
///
/// Each weight is subtracted from the roll until it goes negative. Out of
/// range rolls land on the last candidate.
pub fn pick_weighted(weights: &[u32], roll: u64) -> usize {
    let mut remaining = roll as i128;
    for (index, weight) in weights.iter().enumerate() {
        remaining -= i128::from(*weight);
        if remaining < 0 {
            return index;
        }
    }
    weights.len().saturating_sub(1)
}

/// Chooses one channel out of a priority tier
pub struct WeightedSelector {
    cooldowns: Arc<CooldownTracker>,
    sticky: Arc<StickySessionManager>,
    sessions: SessionKeyRegistry,
}

impl WeightedSelector {
    pub fn new(
        cooldowns: Arc<CooldownTracker>,
        sticky: Arc<StickySessionManager>,
        sessions: SessionKeyRegistry,
    ) -> Self {
        Self {
            cooldowns,
            sticky,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionKeyRegistry {
        &self.sessions
    }

    /// Select a channel from `tier`, or `None` if nothing is eligible
    pub async fn select(
        &self,
        snapshot: &RoutingSnapshot,
        tier: &[ChannelId],
        model: &str,
        filters: &[ChannelFilter],
        session: Option<&SessionContext>,
    ) -> Option<Arc<Channel>> {
        if let Some(ctx) = session {
            if let Some(channel) = self.sticky_match(snapshot, tier, model, filters, ctx).await {
                return Some(channel);
            }
        }

        let candidates: Vec<Arc<Channel>> = tier
            .iter()
            .filter(|id| snapshot.is_eligible(**id, model, filters, &self.cooldowns))
            .filter_map(|id| snapshot.channel(*id))
            .collect();

        let chosen = match candidates.len() {
            0 => return None,
            1 => candidates[0].clone(),
            _ => {
                let weights: Vec<u32> = candidates
                    .iter()
                    .map(|c| c.configured_weight().max(1))
                    .collect();
                let total: u64 = weights.iter().map(|w| u64::from(*w)).sum();
                let roll = rng().random_range(0..total);
                candidates[pick_weighted(&weights, roll)].clone()
            }
        };

        if let Some(ctx) = session {
            self.remember(&chosen, ctx).await;
        }

        Some(chosen)
    }

    /// Session-affine channel types present in the tier, in tier order
    fn affine_types(&self, snapshot: &RoutingSnapshot, tier: &[ChannelId]) -> Vec<ChannelType> {
        let mut types = Vec::new();
        for channel in tier.iter().filter_map(|id| snapshot.channel(*id)) {
            let channel_type = channel.channel_type;
            if self.sessions.is_affine(channel_type) && !types.contains(&channel_type) {
                types.push(channel_type);
            }
        }
        types
    }

    async fn sticky_match(
        &self,
        snapshot: &RoutingSnapshot,
        tier: &[ChannelId],
        model: &str,
        filters: &[ChannelFilter],
        ctx: &SessionContext,
    ) -> Option<Arc<Channel>> {
        if !self.sticky.is_enabled() {
            return None;
        }

        for channel_type in self.affine_types(snapshot, tier) {
            let Some(hash) = self.sessions.derive(channel_type, ctx) else {
                continue;
            };
            let Some(mapped) = self.sticky.get(&hash, channel_type).await else {
                continue;
            };

            let usable = tier.contains(&mapped)
                && snapshot.is_eligible(mapped, model, filters, &self.cooldowns);

            match snapshot.channel(mapped).filter(|_| usable) {
                Some(channel) => {
                    self.sticky.extend_ttl(&hash, channel_type).await;
                    info!(
                        channel_id = mapped,
                        channel_type = %channel_type,
                        model,
                        "Using sticky session channel"
                    );
                    return Some(channel);
                }
                None => {
                    debug!(
                        channel_id = mapped,
                        channel_type = %channel_type,
                        model,
                        "Sticky session channel no longer usable"
                    );
                    self.sticky.delete(&hash, channel_type).await;
                }
            }
        }

        None
    }

    /// Write or refresh the mapping for a session-affine selection
    async fn remember(&self, channel: &Channel, ctx: &SessionContext) {
        if !self.sticky.is_enabled() {
            return;
        }
        if let Some(hash) = self.sessions.derive(channel.channel_type, ctx) {
            self.sticky.set(&hash, channel.channel_type, channel.id).await;
        }
    }
}
