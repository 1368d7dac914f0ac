//! Tenant ownership resolution.
//!
//! The resolver answers "which node owns tenant T" from a locally cached
//! topology snapshot. Lookups never touch the coordination store; the
//! snapshot is re-synced from the [`MembershipDirectory`] when an epoch change
//! is pushed, on a refresh interval, or when a lookup lands on a departing
//! owner.

use crate::cluster::MembershipDirectory;
use crate::config::ClusterOptions;
use crate::error::{Error, Result};
use crate::partitioning::assigner::SlotAssigner;
use crate::partitioning::slot_space::SlotRange;
use crate::partitioning::topology::ClusterTopology;
use crate::types::{Assignment, Epoch, NodeId, Slot};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Resolves tenant keys to owning nodes on behalf of a local node.
pub struct OwnershipResolver {
    /// This node's ID.
    local_node_id: NodeId,

    /// Key to slot mapping.
    assigner: SlotAssigner,

    /// Source of topology snapshots and member statuses.
    directory: Arc<MembershipDirectory>,

    /// Topology the lookups are answered from.
    view: RwLock<Arc<ClusterTopology>>,

    /// Recent assignments, valid for the epoch of `view` only.
    cache: RwLock<HashMap<String, Assignment>>,

    /// Maximum cache size.
    cache_capacity: usize,
}

impl OwnershipResolver {
    /// Create a resolver for `local_node_id` over `directory`.
    pub fn new(
        local_node_id: impl Into<NodeId>,
        assigner: SlotAssigner,
        directory: Arc<MembershipDirectory>,
    ) -> Result<Self> {
        if assigner.slot_space() != directory.slot_space() {
            return Err(Error::Config(format!(
                "assigner slot space of {} does not match cluster slot space of {}",
                assigner.slot_space().slot_count(),
                directory.slot_space().slot_count()
            )));
        }

        Ok(Self {
            local_node_id: local_node_id.into(),
            assigner,
            view: RwLock::new(directory.current_topology()),
            cache: RwLock::new(HashMap::new()),
            cache_capacity: directory.config().assignment_cache_capacity,
            directory,
        })
    }

    /// Create a resolver using the directory's configured slot space and seed.
    pub fn for_directory(
        local_node_id: impl Into<NodeId>,
        directory: Arc<MembershipDirectory>,
    ) -> Result<Self> {
        let assigner = SlotAssigner::with_seed(directory.slot_space(), directory.config().hash_seed);
        Self::new(local_node_id, assigner, directory)
    }

    /// Seed the local view from startup options.
    ///
    /// Until a published topology is observed, this node answers as the owner
    /// of the configured slot bounds and knows no owner for the rest.
    pub fn with_seed(self, options: &ClusterOptions) -> Result<Self> {
        if options.cluster_id != self.directory.cluster_id() {
            return Err(Error::Config(format!(
                "options are for cluster {}, directory serves {}",
                options.cluster_id,
                self.directory.cluster_id()
            )));
        }

        let range = options.seed_range(self.assigner.slot_space().slot_count())?;
        if !self.topology().is_published() {
            let seeded = ClusterTopology::seeded(
                options.cluster_id.clone(),
                self.assigner.slot_space(),
                self.local_node_id.clone(),
                range,
            );
            debug!(node_id = %self.local_node_id, %range, "Seeded local ownership");
            *self.view.write() = Arc::new(seeded);
        }
        Ok(self)
    }

    /// Get the local node ID.
    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    /// The slot assigner.
    pub fn assigner(&self) -> &SlotAssigner {
        &self.assigner
    }

    /// Topology snapshot lookups are currently answered from.
    pub fn topology(&self) -> Arc<ClusterTopology> {
        self.view.read().clone()
    }

    /// Epoch of the current snapshot.
    pub fn epoch(&self) -> Epoch {
        self.view.read().epoch()
    }

    /// Range owned by the local node in the current snapshot.
    pub fn local_range(&self) -> Option<SlotRange> {
        self.view
            .read()
            .node(&self.local_node_id)
            .filter(|n| n.is_active())
            .map(|n| n.range())
    }

    /// Adopt the directory's latest snapshot if it is newer.
    ///
    /// Returns `true` if the snapshot changed.
    pub fn sync(&self) -> bool {
        let latest = self.directory.current_topology();
        {
            let mut view = self.view.write();
            if !latest.is_published() || latest.epoch() <= view.epoch() {
                return false;
            }
            debug!(
                node_id = %self.local_node_id,
                previous_epoch = view.epoch(),
                epoch = latest.epoch(),
                "Resolver adopted topology"
            );
            *view = latest;
        }
        self.cache.write().clear();
        true
    }

    /// Clear cached assignments.
    pub fn invalidate_cache(&self) {
        self.cache.write().clear();
    }

    /// Number of cached assignments.
    pub fn cached_assignments(&self) -> usize {
        self.cache.read().len()
    }

    // ==================== Resolution ====================

    /// Resolve a tenant key to its owner.
    ///
    /// Never performs I/O. A lookup landing on a Draining or Left owner
    /// re-syncs with the directory's latest snapshot and retries once before
    /// failing with [`Error::OwnerUnavailable`], or [`Error::NoActiveNodes`]
    /// when every owner is departing.
    ///
    /// Departures are read from the local directory's member table, not from
    /// the topology. A node that has not observed a leave keeps answering
    /// with the departing owner at the same epoch until the rebalance that
    /// reassigns its range is published.
    pub fn resolve(&self, tenant_key: &str) -> Result<Assignment> {
        let slot = self.assigner.assign(tenant_key)?;
        if let Some(hit) = self.cached(tenant_key) {
            return Ok(hit);
        }

        let result = match self.lookup(slot) {
            Err(Error::OwnerUnavailable { node_id, .. }) => {
                warn!(node_id = %node_id, slot, "Resolved to departing owner, re-syncing");
                self.sync();
                self.finish(self.lookup(slot), true)
            }
            other => self.finish(other, false),
        };

        if let Ok(assignment) = &result {
            self.remember(tenant_key, assignment);
        }
        result
    }

    /// Like [`resolve`](Self::resolve), but the retry re-reads the coordination store.
    pub async fn resolve_with_refresh(&self, tenant_key: &str) -> Result<Assignment> {
        let slot = self.assigner.assign(tenant_key)?;
        if let Some(hit) = self.cached(tenant_key) {
            return Ok(hit);
        }

        let result = match self.lookup(slot) {
            Err(Error::OwnerUnavailable { node_id, .. }) => {
                warn!(node_id = %node_id, slot, "Resolved to departing owner, refreshing");
                self.directory.refresh().await?;
                self.sync();
                self.finish(self.lookup(slot), true)
            }
            other => self.finish(other, false),
        };

        if let Ok(assignment) = &result {
            self.remember(tenant_key, assignment);
        }
        result
    }

    /// Resolve a slot directly.
    pub fn resolve_slot(&self, slot: Slot) -> Result<Assignment> {
        let space = self.assigner.slot_space();
        if !space.contains(slot) {
            return Err(Error::InvalidSlot {
                slot,
                slot_count: space.slot_count(),
            });
        }

        match self.lookup(slot) {
            Err(Error::OwnerUnavailable { .. }) => {
                self.sync();
                self.finish(self.lookup(slot), true)
            }
            other => self.finish(other, false),
        }
    }

    /// Check if this node owns a tenant.
    pub fn is_local(&self, tenant_key: &str) -> Result<bool> {
        Ok(self.resolve(tenant_key)?.is_owned_by(&self.local_node_id))
    }

    /// Keep the tenant keys this node owns.
    pub fn filter_local<'a, I>(&self, tenant_keys: I) -> Result<Vec<&'a str>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut local = Vec::new();
        for key in tenant_keys {
            if self.is_local(key)? {
                local.push(key);
            }
        }
        Ok(local)
    }

    fn lookup(&self, slot: Slot) -> Result<Assignment> {
        let view = self.topology();
        if view.active_count() == 0 {
            return Err(Error::NoActiveNodes);
        }

        // Only a seeded view can leave slots without an owner
        let owner = view.owner_of(slot).ok_or(Error::NoActiveNodes)?;

        if let Some(status) = self.directory.member_status(&owner.node_id) {
            if status.is_departing() {
                return Err(Error::OwnerUnavailable {
                    node_id: owner.node_id.clone(),
                    status,
                    slot,
                    epoch: view.epoch(),
                });
            }
        }

        Ok(Assignment::new(slot, owner.node_id.clone(), view.epoch()))
    }

    fn finish(&self, result: Result<Assignment>, retried: bool) -> Result<Assignment> {
        let result = match result {
            Err(Error::OwnerUnavailable { .. }) if retried && self.all_owners_departing() => {
                Err(Error::NoActiveNodes)
            }
            other => other,
        };

        let metrics = self.directory.metrics();
        match &result {
            Ok(_) => metrics.record_resolution(retried),
            Err(e) => metrics.record_error(e),
        }
        result
    }

    fn all_owners_departing(&self) -> bool {
        self.topology().active_nodes().iter().all(|n| {
            self.directory
                .member_status(&n.node_id)
                .map(|s| s.is_departing())
                .unwrap_or(false)
        })
    }

    fn cached(&self, tenant_key: &str) -> Option<Assignment> {
        if self.cache_capacity == 0 {
            return None;
        }
        let epoch = self.epoch();
        let hit = self
            .cache
            .read()
            .get(tenant_key)
            .filter(|a| a.epoch == epoch)
            .cloned()?;

        // Owner started leaving since the lookup; take the slow path
        let departing = self
            .directory
            .member_status(&hit.node_id)
            .map(|s| s.is_departing())
            .unwrap_or(false);
        if departing {
            return None;
        }
        self.directory.metrics().record_resolution(false);
        Some(hit)
    }

    fn remember(&self, tenant_key: &str, assignment: &Assignment) {
        if self.cache_capacity == 0 || assignment.epoch != self.epoch() {
            return;
        }
        let mut cache = self.cache.write();
        if cache.len() >= self.cache_capacity {
            cache.clear();
        }
        cache.insert(tenant_key.to_string(), assignment.clone());
    }

    // ==================== Background Refresh ====================

    /// Keep the snapshot current in the background.
    ///
    /// Re-syncs on every pushed epoch change and re-reads the coordination
    /// store on every `interval` tick. The task ends once the resolver is
    /// dropped.
    pub fn spawn_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let mut updates = self.directory.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        match weak.upgrade() {
                            Some(resolver) => {
                                resolver.sync();
                            }
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let Some(resolver) = weak.upgrade() else { break };
                        if let Err(e) = resolver.directory.refresh().await {
                            warn!(node_id = %resolver.local_node_id, error = %e, "Topology refresh failed");
                        }
                        resolver.sync();
                    }
                }
            }

            debug!("Resolver refresh task stopped");
        })
    }
}

impl std::fmt::Debug for OwnershipResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipResolver")
            .field("local_node_id", &self.local_node_id)
            .field("epoch", &self.epoch())
            .finish()
    }
}
