//! Routing table of enabled channels
//!
//! The table maps `group -> model -> [tier, ...]`, tiers ordered by
//! descending priority, each tier a list of channel ids. It is rebuilt
//! wholesale from the channel store and swapped in behind one lock, so
//! readers see either the old table or the new one and never a mix.
//!
//! Request-path readers clone the current `Arc<RoutingSnapshot>` and drop the
//! lock before doing anything async.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::{config::RegistryOptions, error::AppResult, session::SessionContext};

use super::{
    cooldown::CooldownTracker,
    filter::{passes_all, ChannelFilter},
    model::{Channel, ChannelId},
    selector::WeightedSelector,
    store::ChannelStore,
    RoutingError,
};

/// One channel in the routing table
pub struct ChannelSlot {
    pub channel: Arc<Channel>,
    disabled: AtomicBool,
}

impl ChannelSlot {
    fn new(channel: Channel) -> Self {
        Self {
            channel: Arc::new(channel),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
    }
}

/// Immutable routing table built by one load
#[derive(Default)]
pub struct RoutingSnapshot {
    channels: HashMap<ChannelId, ChannelSlot>,
    rules: HashMap<String, HashMap<String, Vec<Vec<ChannelId>>>>,
    /// Wildcard patterns per group (`prefix*`), longest first
    wildcards: HashMap<String, Vec<String>>,
    model_groups: BTreeMap<String, BTreeSet<String>>,
}

impl RoutingSnapshot {
    /// Build a table from channel records
    ///
    /// Disabled records are skipped. A weight of 0 (or none) becomes
    /// `default_weight`.
    pub fn build(mut channels: Vec<Channel>, default_weight: u32) -> Self {
        channels.sort_by_key(|c| c.id);

        let mut snapshot = Self::default();
        let mut buckets: HashMap<String, HashMap<String, BTreeMap<i64, Vec<ChannelId>>>> =
            HashMap::new();

        for mut channel in channels.into_iter().filter(|c| c.is_enabled()) {
            if channel.configured_weight() == 0 {
                channel.weight = Some(default_weight.max(1));
            }

            let groups = channel.group_list();
            let models = channel.model_list();

            for group in &groups {
                for model in &models {
                    let tiers = buckets
                        .entry(group.clone())
                        .or_default()
                        .entry(model.clone())
                        .or_default()
                        .entry(channel.priority)
                        .or_default();
                    if !tiers.contains(&channel.id) {
                        tiers.push(channel.id);
                    }

                    snapshot
                        .model_groups
                        .entry(model.clone())
                        .or_default()
                        .insert(group.clone());

                    if model.ends_with('*') {
                        let patterns = snapshot.wildcards.entry(group.clone()).or_default();
                        if !patterns.contains(model) {
                            patterns.push(model.clone());
                        }
                    }
                }
            }

            snapshot.channels.insert(channel.id, ChannelSlot::new(channel));
        }

        for (group, models) in buckets {
            let rules = snapshot.rules.entry(group).or_default();
            for (model, by_priority) in models {
                // BTreeMap iterates ascending; highest priority goes first
                rules.insert(model, by_priority.into_values().rev().collect());
            }
        }

        for patterns in snapshot.wildcards.values_mut() {
            patterns.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        }

        snapshot
    }

    /// Tiers for an already matched model name
    pub fn tiers(&self, group: &str, model: &str) -> &[Vec<ChannelId>] {
        self.rules
            .get(group)
            .and_then(|models| models.get(model))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn slot(&self, id: ChannelId) -> Option<&ChannelSlot> {
        self.channels.get(&id)
    }

    pub fn channel(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.channels.get(&id).map(|slot| slot.channel.clone())
    }

    /// Whether the channel is selectable for `model` right now
    pub fn is_eligible(
        &self,
        id: ChannelId,
        model: &str,
        filters: &[ChannelFilter],
        cooldowns: &CooldownTracker,
    ) -> bool {
        match self.channels.get(&id) {
            Some(slot) => {
                !slot.is_disabled()
                    && !cooldowns.is_in_cooldown(id, model)
                    && passes_all(filters, &slot.channel)
            }
            None => false,
        }
    }

    /// Resolve a requested model to the name used in the table
    ///
    /// Exact match, then case-insensitive exact match (when enabled), then
    /// the longest wildcard prefix.
    pub fn matched_model_name(&self, group: &str, model: &str, case_insensitive: bool) -> Option<String> {
        let models = self.rules.get(group)?;

        if models.contains_key(model) {
            return Some(model.to_string());
        }

        if case_insensitive {
            if let Some(name) = models.keys().find(|name| name.eq_ignore_ascii_case(model)) {
                return Some(name.clone());
            }
        }

        let lowered = model.to_ascii_lowercase();
        self.wildcards.get(group)?.iter().find_map(|pattern| {
            let prefix = pattern.trim_end_matches('*');
            let hit = model.starts_with(prefix)
                || (case_insensitive && lowered.starts_with(&prefix.to_ascii_lowercase()));
            hit.then(|| pattern.clone())
        })
    }

    /// Models served in a group, sorted
    pub fn group_models(&self, group: &str) -> Vec<String> {
        let mut models: Vec<String> = self
            .rules
            .get(group)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        models.sort();
        models
    }

    /// Model -> groups serving it
    pub fn model_groups(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.model_groups
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Shared routing table plus the selection machinery around it
pub struct ChannelRegistry {
    snapshot: RwLock<Arc<RoutingSnapshot>>,
    store: Arc<dyn ChannelStore>,
    cooldowns: Arc<CooldownTracker>,
    selector: WeightedSelector,
    options: RegistryOptions,
}

impl ChannelRegistry {
    /// Create an empty registry; call `load` to populate it
    pub fn new(
        store: Arc<dyn ChannelStore>,
        cooldowns: Arc<CooldownTracker>,
        selector: WeightedSelector,
        options: RegistryOptions,
    ) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(RoutingSnapshot::default())),
            store,
            cooldowns,
            selector,
            options,
        }
    }

    /// Rebuild the table from the store and swap it in
    ///
    /// On store failure the current table stays in place.
    #[instrument(skip(self))]
    pub async fn load(&self) -> AppResult<usize> {
        let channels = self.store.list_enabled_channels().await?;
        let fetched = channels.len();

        let fresh = Arc::new(RoutingSnapshot::build(channels, self.options.default_weight));
        let loaded = fresh.channel_count();
        *self.snapshot.write() = fresh;

        info!(fetched, loaded, "Channel routing table loaded");
        Ok(loaded)
    }

    /// Current table
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn store(&self) -> &Arc<dyn ChannelStore> {
        &self.store
    }

    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        &self.cooldowns
    }

    pub fn channel(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.snapshot().channel(id)
    }

    /// Resolve a requested model within a group
    pub fn matched_model_name(&self, group: &str, model: &str) -> Result<String, RoutingError> {
        self.snapshot()
            .matched_model_name(group, model, self.options.case_insensitive)
            .ok_or_else(|| RoutingError::ModelNotFound {
                group: group.to_string(),
                model: model.to_string(),
            })
    }

    /// Match the model, then select a channel
    pub async fn next(
        &self,
        group: &str,
        model: &str,
        filters: &[ChannelFilter],
        session: Option<&SessionContext>,
    ) -> Result<Arc<Channel>, RoutingError> {
        let matched = self.matched_model_name(group, model)?;
        self.next_by_validated_model(group, &matched, filters, session)
            .await
    }

    /// Select a channel for an already matched model
    ///
    /// Tiers are tried in priority order; a lower tier is only consulted when
    /// every higher tier has no eligible channel.
    pub async fn next_by_validated_model(
        &self,
        group: &str,
        model: &str,
        filters: &[ChannelFilter],
        session: Option<&SessionContext>,
    ) -> Result<Arc<Channel>, RoutingError> {
        let snapshot = self.snapshot();

        for (index, tier) in snapshot.tiers(group, model).iter().enumerate() {
            if let Some(channel) = self
                .selector
                .select(&snapshot, tier, model, filters, session)
                .await
            {
                debug!(group, model, tier = index, channel_id = channel.id, "Selected channel");
                return Ok(channel);
            }
        }

        Err(RoutingError::NoChannel {
            group: group.to_string(),
            model: model.to_string(),
        })
    }

    /// Count eligible channels across all tiers without selecting
    pub fn count_available_channels(&self, group: &str, model: &str, filters: &[ChannelFilter]) -> usize {
        let snapshot = self.snapshot();
        snapshot
            .tiers(group, model)
            .iter()
            .flatten()
            .filter(|id| snapshot.is_eligible(**id, model, filters, &self.cooldowns))
            .count()
    }

    /// Re-enable a channel in the current table
    pub fn enable(&self, id: ChannelId) -> bool {
        self.set_disabled(id, false)
    }

    /// Disable a channel in the current table
    pub fn disable(&self, id: ChannelId) -> bool {
        self.set_disabled(id, true)
    }

    fn set_disabled(&self, id: ChannelId, disabled: bool) -> bool {
        let guard = self.snapshot.write();
        match guard.slot(id) {
            Some(slot) => {
                slot.set_disabled(disabled);
                true
            }
            None => false,
        }
    }

    /// Models served in a group
    pub fn group_models(&self, group: &str) -> Vec<String> {
        self.snapshot().group_models(group)
    }

    /// Reload periodically in the background
    pub fn spawn_reloader(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = registry.load().await {
                    error!(error = %e, "Periodic channel reload failed, keeping previous table");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        channel::{store::StaticChannelStore, ChannelType},
        session::{SessionKeyRegistry, StickySessionManager},
    };

    fn channel(id: ChannelId, models: &str, weight: u32, priority: i64) -> Channel {
        Channel {
            id,
            name: format!("ch-{}", id),
            channel_type: ChannelType::Openai,
            group: "default".to_string(),
            models: models.to_string(),
            weight: Some(weight),
            priority,
            status: 1,
            base_url: None,
            key: String::new(),
            model_mapping: Default::default(),
            only_chat: false,
            stream_disabled_models: vec![],
        }
    }

    async fn registry(channels: Vec<Channel>, options: RegistryOptions) -> ChannelRegistry {
        let cooldowns = Arc::new(CooldownTracker::new(60));
        let selector = WeightedSelector::new(
            cooldowns.clone(),
            Arc::new(StickySessionManager::disabled()),
            SessionKeyRegistry::with_defaults(),
        );
        let registry = ChannelRegistry::new(
            Arc::new(StaticChannelStore::new(channels)),
            cooldowns,
            selector,
            options,
        );
        registry.load().await.unwrap();
        registry
    }

    #[test]
    fn test_zero_weight_normalized() {
        let snapshot = RoutingSnapshot::build(vec![channel(1, "gpt-4o", 0, 0)], 5);
        assert_eq!(snapshot.channel(1).unwrap().weight, Some(5));

        let mut unset = channel(2, "gpt-4o", 0, 0);
        unset.weight = None;
        let snapshot = RoutingSnapshot::build(vec![unset], 1);
        assert_eq!(snapshot.channel(2).unwrap().configured_weight(), 1);
    }

    #[test]
    fn test_tiers_sorted_by_descending_priority() {
        let snapshot = RoutingSnapshot::build(
            vec![
                channel(1, "gpt-4o", 1, 0),
                channel(2, "gpt-4o", 1, 10),
                channel(3, "gpt-4o", 1, 10),
                channel(4, "gpt-4o", 1, -5),
            ],
            1,
        );

        assert_eq!(
            snapshot.tiers("default", "gpt-4o"),
            &[vec![2, 3], vec![1], vec![4]]
        );
        assert!(snapshot.tiers("default", "missing").is_empty());
        assert!(snapshot.tiers("vip", "gpt-4o").is_empty());
    }

    #[test]
    fn test_disabled_records_skipped() {
        let mut off = channel(2, "gpt-4o", 1, 0);
        off.status = 2;
        let snapshot = RoutingSnapshot::build(vec![channel(1, "gpt-4o", 1, 0), off], 1);

        assert_eq!(snapshot.channel_count(), 1);
        assert_eq!(snapshot.tiers("default", "gpt-4o"), &[vec![1]]);
    }

    #[test]
    fn test_multi_group_membership() {
        let mut ch = channel(1, "gpt-4o, claude-3", 1, 0);
        ch.group = "default,vip".to_string();
        let snapshot = RoutingSnapshot::build(vec![ch], 1);

        assert_eq!(snapshot.group_models("vip"), vec!["claude-3", "gpt-4o"]);
        let groups: Vec<_> = snapshot.model_groups()["gpt-4o"].iter().cloned().collect();
        assert_eq!(groups, vec!["default", "vip"]);
    }

    #[test]
    fn test_model_matching_order() {
        let snapshot = RoutingSnapshot::build(
            vec![
                channel(1, "GPT-4o", 1, 0),
                channel(2, "claude-*", 1, 0),
                channel(3, "claude-3-*", 1, 0),
            ],
            1,
        );

        assert_eq!(snapshot.matched_model_name("default", "GPT-4o", false).as_deref(), Some("GPT-4o"));
        assert_eq!(snapshot.matched_model_name("default", "gpt-4o", false), None);
        assert_eq!(snapshot.matched_model_name("default", "gpt-4o", true).as_deref(), Some("GPT-4o"));

        // Longest prefix wins
        assert_eq!(
            snapshot.matched_model_name("default", "claude-3-opus", false).as_deref(),
            Some("claude-3-*")
        );
        assert_eq!(
            snapshot.matched_model_name("default", "claude-2", false).as_deref(),
            Some("claude-*")
        );
        assert_eq!(snapshot.matched_model_name("default", "Claude-2", false), None);
        assert_eq!(
            snapshot.matched_model_name("default", "Claude-2", true).as_deref(),
            Some("claude-*")
        );
        assert_eq!(snapshot.matched_model_name("vip", "GPT-4o", true), None);
    }

    #[tokio::test]
    async fn test_lower_tier_never_used_while_higher_tier_eligible() {
        let registry = registry(
            vec![
                channel(1, "gpt-4o", 100, 0),
                channel(2, "gpt-4o", 1, 10),
                channel(3, "gpt-4o", 1, 10),
            ],
            RegistryOptions::default(),
        )
        .await;

        for _ in 0..200 {
            let picked = registry.next("default", "gpt-4o", &[], None).await.unwrap();
            assert!(picked.id == 2 || picked.id == 3);
        }

        // Exhaust the top tier through filters and cooldown
        registry.cooldowns().set_cooldown_with_duration(2, "gpt-4o", 60);
        let filters = [ChannelFilter::exclude([3])];
        let picked = registry.next("default", "gpt-4o", &filters, None).await.unwrap();
        assert_eq!(picked.id, 1);
    }

    #[tokio::test]
    async fn test_cooldown_scoped_to_model() {
        let registry = registry(
            vec![channel(1, "gpt-4o,gpt-4o-mini", 1, 0)],
            RegistryOptions::default(),
        )
        .await;

        registry.cooldowns().set_cooldown_with_duration(1, "gpt-4o", 120);

        assert!(registry.next("default", "gpt-4o", &[], None).await.is_err());
        assert_eq!(registry.next("default", "gpt-4o-mini", &[], None).await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_all_disabled_reports_exhaustion() {
        let registry = registry(
            vec![channel(1, "gpt-4o", 1, 0), channel(2, "gpt-4o", 1, 5)],
            RegistryOptions::default(),
        )
        .await;

        assert!(registry.disable(1));
        assert!(registry.disable(2));

        assert_eq!(
            registry.next("default", "gpt-4o", &[], None).await.unwrap_err(),
            RoutingError::NoChannel {
                group: "default".to_string(),
                model: "gpt-4o".to_string()
            }
        );
        assert_eq!(registry.count_available_channels("default", "gpt-4o", &[]), 0);

        assert!(registry.enable(2));
        assert_eq!(registry.count_available_channels("default", "gpt-4o", &[]), 1);
        assert!(!registry.enable(99));
    }

    #[tokio::test]
    async fn test_count_respects_filters_and_cooldown() {
        let registry = registry(
            vec![
                channel(1, "gpt-4o", 1, 0),
                channel(2, "gpt-4o", 1, 0),
                channel(3, "gpt-4o", 1, 9),
            ],
            RegistryOptions::default(),
        )
        .await;

        assert_eq!(registry.count_available_channels("default", "gpt-4o", &[]), 3);
        registry.cooldowns().set_cooldown_with_duration(3, "gpt-4o", 30);
        assert_eq!(registry.count_available_channels("default", "gpt-4o", &[]), 2);
        assert_eq!(
            registry.count_available_channels("default", "gpt-4o", &[ChannelFilter::exclude([1])]),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_model_is_not_found() {
        let registry = registry(vec![channel(1, "gpt-4o", 1, 0)], RegistryOptions::default()).await;

        assert!(matches!(
            registry.next("default", "o3", &[], None).await,
            Err(RoutingError::ModelNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_reload_swaps_whole_table() {
        let store = Arc::new(StaticChannelStore::new(vec![channel(1, "gpt-4o", 1, 0)]));
        let cooldowns = Arc::new(CooldownTracker::new(60));
        let registry = ChannelRegistry::new(
            store.clone(),
            cooldowns.clone(),
            WeightedSelector::new(
                cooldowns,
                Arc::new(StickySessionManager::disabled()),
                SessionKeyRegistry::empty(),
            ),
            RegistryOptions::default(),
        );
        registry.load().await.unwrap();

        let before = registry.snapshot();
        store.replace(vec![channel(2, "claude-3", 1, 0), channel(3, "claude-3", 1, 0)]);
        assert_eq!(registry.load().await.unwrap(), 2);

        // Old readers keep the old table intact
        assert_eq!(before.tiers("default", "gpt-4o"), &[vec![1]]);
        let after = registry.snapshot();
        assert!(after.tiers("default", "gpt-4o").is_empty());
        let ids: HashSet<_> = after.tiers("default", "claude-3")[0].iter().copied().collect();
        assert_eq!(ids, HashSet::from([2, 3]));
    }
}
