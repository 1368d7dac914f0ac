//! Cluster membership directory.
//!
//! The directory is the only writer of the canonical topology. It keeps a
//! local snapshot of the latest topology it has observed, publishes new
//! topologies through the coordination store with an epoch compare-and-set,
//! and records membership events without touching slot ranges itself.

use crate::cluster::events::{MemberEvent, MemberEventListener};
use crate::cluster::store::CoordinationStore;
use crate::config::PartitionConfig;
use crate::error::{Error, MembershipError, Result, StoreError, TopologyError};
use crate::metrics::PartitionMetrics;
use crate::partitioning::{ClusterTopology, SlotSpace};
use crate::types::{Epoch, NodeId, NodeStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Thin client over the coordination store holding the canonical topology.
pub struct MembershipDirectory {
    /// Cluster this directory belongs to.
    cluster_id: String,

    /// Fixed slot space of the cluster.
    slot_space: SlotSpace,

    /// Configuration.
    config: PartitionConfig,

    /// Backing coordination store.
    store: Arc<dyn CoordinationStore>,

    /// Latest topology observed or published.
    current: RwLock<Arc<ClusterTopology>>,

    /// Locally known member statuses.
    members: RwLock<HashMap<NodeId, NodeStatus>>,

    /// Event listeners.
    listeners: RwLock<Vec<Arc<dyn MemberEventListener>>>,

    /// Channel for membership events.
    event_tx: mpsc::UnboundedSender<MemberEvent>,

    /// Push notification of epoch changes.
    topology_tx: watch::Sender<Arc<ClusterTopology>>,

    metrics: Arc<PartitionMetrics>,
}

impl MembershipDirectory {
    /// Create a directory over `store`.
    ///
    /// Returns the directory and the receiving end of its membership events.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        config: PartitionConfig,
        cluster_id: impl Into<String>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<MemberEvent>)> {
        config.validate()?;
        let cluster_id = cluster_id.into();
        if cluster_id.is_empty() {
            return Err(Error::Config("cluster id must not be empty".to_string()));
        }

        let slot_space = SlotSpace::new(config.slot_count)?;
        let initial = Arc::new(ClusterTopology::empty(cluster_id.clone(), slot_space));
        let (topology_tx, _) = watch::channel(initial.clone());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let directory = Arc::new(Self {
            cluster_id,
            slot_space,
            config,
            store,
            current: RwLock::new(initial),
            members: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            event_tx,
            topology_tx,
            metrics: Arc::new(PartitionMetrics::new()),
        });

        Ok((directory, event_rx))
    }

    /// Cluster identifier.
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// The cluster's slot space.
    pub fn slot_space(&self) -> SlotSpace {
        self.slot_space
    }

    /// Configuration.
    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Metrics recorded by this directory and its resolvers.
    pub fn metrics(&self) -> &Arc<PartitionMetrics> {
        &self.metrics
    }

    /// Add an event listener.
    pub fn add_listener(&self, listener: Arc<dyn MemberEventListener>) {
        self.listeners.write().push(listener);
    }

    /// Subscribe to topology changes.
    ///
    /// The receiver always holds the latest adopted topology.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterTopology>> {
        self.topology_tx.subscribe()
    }

    /// The latest published topology known locally.
    ///
    /// Epoch `0` (no nodes) until a topology has been observed.
    pub fn current_topology(&self) -> Arc<ClusterTopology> {
        self.current.read().clone()
    }

    /// Epoch of the latest topology known locally.
    pub fn epoch(&self) -> Epoch {
        self.current.read().epoch()
    }

    // ==================== Store Access ====================

    /// Create the cluster if the store is empty, otherwise join the stored one.
    ///
    /// The bootstrap topology gives `node_id` the full slot space at epoch 1.
    /// When the cluster already exists, the stored topology is adopted and the
    /// node still has to announce itself with [`node_joined`](Self::node_joined).
    pub async fn bootstrap(&self, node_id: &str) -> Result<Arc<ClusterTopology>> {
        if node_id.is_empty() {
            return Err(MembershipError::InvalidNodeId.into());
        }

        if let Some(stored) = self.with_timeout(self.store.read()).await? {
            self.check_compatible(&stored)?;
            debug!(epoch = stored.epoch(), "Cluster already bootstrapped");
            self.adopt(stored);
            return Ok(self.current_topology());
        }

        let initial = ClusterTopology::bootstrap(self.cluster_id.clone(), self.slot_space, node_id);
        if self.with_timeout(self.store.compare_and_set(0, &initial)).await? {
            info!(node_id, cluster_id = %self.cluster_id, "Bootstrapped cluster");
            self.adopt(initial);
        } else {
            // Another node bootstrapped first
            self.refresh().await?;
        }

        Ok(self.current_topology())
    }

    /// Re-read the store and adopt its topology if it is newer.
    pub async fn refresh(&self) -> Result<Arc<ClusterTopology>> {
        if let Some(stored) = self.with_timeout(self.store.read()).await? {
            self.check_compatible(&stored)?;
            self.adopt(stored);
        }
        Ok(self.current_topology())
    }

    /// Atomically replace the canonical topology.
    ///
    /// `proposed` must carry epoch `current + 1`, where `current` is the epoch
    /// it was computed from. It is validated before anything reaches the
    /// store; an invalid topology is rejected and the previous epoch stays in
    /// effect. Losing the compare-and-set yields [`Error::StaleEpoch`].
    /// A publish that times out may still land; the next refresh shows it.
    pub async fn publish(&self, proposed: ClusterTopology) -> Result<Arc<ClusterTopology>> {
        let start = Instant::now();
        let result = self.try_publish(proposed).await;

        match &result {
            Ok(topology) => {
                self.metrics
                    .record_publish_success(start.elapsed(), topology.epoch(), topology.active_count());
            }
            Err(e) => self.metrics.record_publish_failure(e),
        }

        result
    }

    async fn try_publish(&self, proposed: ClusterTopology) -> Result<Arc<ClusterTopology>> {
        if proposed.cluster_id() != self.cluster_id {
            return Err(Error::Config(format!(
                "topology belongs to cluster {}, not {}",
                proposed.cluster_id(),
                self.cluster_id
            )));
        }
        if proposed.epoch() == 0 {
            return Err(TopologyError::ReservedEpoch.into());
        }
        if let Err(e) = proposed.validate_for(self.slot_space) {
            error!(epoch = proposed.epoch(), error = %e, "Rejected invalid topology");
            return Err(e.into());
        }

        let base = proposed.epoch() - 1;
        let local = self.epoch();
        if base < local {
            return Err(Error::StaleEpoch { base, current: local });
        }

        let proposed = proposed.normalize();
        if self.with_timeout(self.store.compare_and_set(base, &proposed)).await? {
            info!(
                epoch = proposed.epoch(),
                active_nodes = proposed.active_count(),
                "Published topology"
            );
            self.adopt(proposed);
            return Ok(self.current_topology());
        }

        // Lost the race; pick up the winner so the caller can replan
        let current = self.refresh().await?.epoch();
        warn!(base, current, "Publish lost the epoch race");
        Err(Error::StaleEpoch { base, current })
    }

    async fn with_timeout<T>(
        &self,
        operation: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.store_timeout, operation).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => {
                warn!(timeout = ?self.config.store_timeout, "Coordination store timed out");
                Err(Error::Timeout)
            }
        }
    }

    fn check_compatible(&self, stored: &ClusterTopology) -> Result<()> {
        if stored.cluster_id() != self.cluster_id {
            return Err(Error::Config(format!(
                "store holds cluster {}, expected {}",
                stored.cluster_id(),
                self.cluster_id
            )));
        }
        if stored.slot_space() != self.slot_space {
            return Err(TopologyError::SlotCountMismatch {
                expected: self.slot_space.slot_count(),
                actual: stored.slot_space().slot_count(),
            }
            .into());
        }
        Ok(())
    }

    /// Install `topology` if it is newer than the local snapshot.
    fn adopt(&self, topology: ClusterTopology) -> bool {
        let previous_epoch = {
            let mut current = self.current.write();
            if topology.epoch() <= current.epoch() {
                return false;
            }
            let previous = current.epoch();
            *current = Arc::new(topology);
            previous
        };

        let topology = self.current_topology();
        self.reconcile_members(&topology);
        self.metrics
            .record_topology(topology.epoch(), topology.active_count());
        self.topology_tx.send_replace(topology.clone());

        debug!(previous_epoch, epoch = topology.epoch(), %topology, "Adopted topology");
        self.notify(MemberEvent::TopologyChanged {
            previous_epoch,
            epoch: topology.epoch(),
        });
        true
    }

    fn reconcile_members(&self, topology: &ClusterTopology) {
        let mut members = self.members.write();

        for node in topology.nodes() {
            let status = members.entry(node.node_id.clone()).or_insert(node.status);
            // A pending departure stays pending until the range is gone
            if node.is_active() && !status.is_departing() {
                *status = NodeStatus::Active;
            }
        }

        for (node_id, status) in members.iter_mut() {
            let owned_range = matches!(*status, NodeStatus::Active | NodeStatus::Draining);
            if owned_range && !topology.is_active(node_id) {
                *status = NodeStatus::Left;
            }
        }

        // Departed nodes with nothing left to hand over are forgotten
        members.retain(|node_id, status| {
            *status != NodeStatus::Left || topology.node(node_id).is_some()
        });
    }

    // ==================== Membership Events ====================

    /// Record that a node wants to join. Triggers a rebalance request.
    pub fn node_joined(&self, node_id: &str) -> Result<()> {
        if node_id.is_empty() {
            return Err(MembershipError::InvalidNodeId.into());
        }

        let owns_range = self.current.read().is_active(node_id);
        {
            let mut members = self.members.write();
            let status = members.get(node_id).copied();
            match (owns_range, status) {
                (true, None) | (true, Some(NodeStatus::Active)) => {
                    return Err(MembershipError::NodeAlreadyActive(node_id.to_string()).into());
                }
                // Came back before its range was reassigned
                (true, Some(_)) => {
                    members.insert(node_id.to_string(), NodeStatus::Active);
                }
                (false, _) => {
                    members.insert(node_id.to_string(), NodeStatus::Joining);
                }
            }
        }

        info!(node_id, "Node joined");
        self.notify(MemberEvent::NodeJoined {
            node_id: node_id.to_string(),
        });
        Ok(())
    }

    /// Record that a node is leaving gracefully. Triggers a rebalance request.
    pub fn node_left(&self, node_id: &str) -> Result<()> {
        self.mark_departing(node_id, NodeStatus::Draining)?;
        info!(node_id, "Node draining");
        self.notify(MemberEvent::NodeLeft {
            node_id: node_id.to_string(),
        });
        Ok(())
    }

    /// Record that an external failure detector declared a node dead.
    pub fn node_failed(&self, node_id: &str) -> Result<()> {
        self.mark_departing(node_id, NodeStatus::Left)?;
        warn!(node_id, "Node failed");
        self.notify(MemberEvent::NodeFailed {
            node_id: node_id.to_string(),
        });
        Ok(())
    }

    fn mark_departing(&self, node_id: &str, status: NodeStatus) -> Result<()> {
        let known_in_topology = self.current.read().node(node_id).is_some();
        let mut members = self.members.write();

        if !known_in_topology && !members.contains_key(node_id) {
            return Err(MembershipError::NodeNotFound(node_id.to_string()).into());
        }

        let entry = members.entry(node_id.to_string()).or_insert(status);
        if *entry != NodeStatus::Left {
            *entry = status;
        }
        Ok(())
    }

    /// Status of a node, as far as this directory knows.
    ///
    /// `None` for nodes never announced here and for departed nodes whose
    /// range has already been reassigned.
    pub fn member_status(&self, node_id: &str) -> Option<NodeStatus> {
        if let Some(status) = self.members.read().get(node_id) {
            return Some(*status);
        }
        self.current.read().node(node_id).map(|n| n.status)
    }

    /// Nodes still owning a range in the current topology that are on their way out.
    pub fn departing_owners(&self) -> Vec<NodeId> {
        let topology = self.current_topology();
        let members = self.members.read();
        topology
            .active_nodes()
            .iter()
            .filter(|n| members.get(&n.node_id).map(|s| s.is_departing()).unwrap_or(false))
            .map(|n| n.node_id.clone())
            .collect()
    }

    /// Number of nodes in the local member table.
    pub fn known_members(&self) -> usize {
        self.members.read().len()
    }

    /// Nodes announced but not yet owning a range.
    pub fn joining_members(&self) -> Vec<NodeId> {
        let mut joining: Vec<NodeId> = self
            .members
            .read()
            .iter()
            .filter(|(_, status)| **status == NodeStatus::Joining)
            .map(|(id, _)| id.clone())
            .collect();
        joining.sort();
        joining
    }

    fn notify(&self, event: MemberEvent) {
        let _ = self.event_tx.send(event.clone());

        for listener in self.listeners.read().iter() {
            listener.on_event(event.clone());
        }
    }
}

impl std::fmt::Debug for MembershipDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipDirectory")
            .field("cluster_id", &self.cluster_id)
            .field("slot_space", &self.slot_space)
            .field("epoch", &self.epoch())
            .finish()
    }
}
