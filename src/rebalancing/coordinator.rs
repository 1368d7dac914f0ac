//! Rebalancing coordinator.
//!
//! The coordinator turns membership events into published topologies:
//! refresh, plan against the freshest epoch, publish with compare-and-set,
//! and on a lost race start over from the new epoch. Several nodes may run a
//! coordinator for the same event; exactly one publish per epoch wins and the
//! others find nothing left to do on their next attempt.

use crate::cluster::{MemberEvent, MembershipDirectory};
use crate::config::RebalanceConfig;
use crate::error::{Error, Result};
use crate::rebalancing::planner::{MembershipChange, RebalancePlan, Rebalancer};
use crate::types::{Epoch, NodeId, NodeStatus};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What triggered a rebalance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceKind {
    /// A node joined and needs a range.
    NodeJoin(NodeId),
    /// A node left or failed and its range must be handed over.
    NodeLeave(NodeId),
    /// Operator-requested even re-division.
    Manual,
}

impl fmt::Display for RebalanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceKind::NodeJoin(id) => write!(f, "join({})", id),
            RebalanceKind::NodeLeave(id) => write!(f, "leave({})", id),
            RebalanceKind::Manual => f.write_str("manual"),
        }
    }
}

/// A completed rebalance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceRecord {
    /// Unique rebalance ID.
    pub id: Uuid,

    /// What triggered it.
    pub kind: RebalanceKind,

    /// Epoch the winning plan was computed from.
    pub from_epoch: Epoch,

    /// Epoch that was published.
    pub to_epoch: Epoch,

    /// Slots that changed owner.
    pub churn: u64,

    /// Publish attempts, including lost races.
    pub attempts: u32,

    /// Time from the first attempt to the successful publish.
    pub duration: Duration,
}

/// Drives rebalances for one node.
pub struct RebalanceCoordinator {
    /// Directory publishing the topologies.
    directory: Arc<MembershipDirectory>,

    /// Range planner.
    rebalancer: Rebalancer,

    /// Configuration.
    config: RebalanceConfig,

    /// Rebalances currently retrying or publishing.
    in_flight: AtomicUsize,

    /// History of completed rebalances.
    history: RwLock<VecDeque<RebalanceRecord>>,
}

impl RebalanceCoordinator {
    /// Create a coordinator using the directory's rebalance configuration.
    pub fn new(directory: Arc<MembershipDirectory>) -> Self {
        let config = directory.config().rebalance.clone();
        Self::with_config(directory, config)
    }

    /// Create a coordinator with an explicit configuration.
    pub fn with_config(directory: Arc<MembershipDirectory>, config: RebalanceConfig) -> Self {
        Self {
            rebalancer: Rebalancer::new(config.policy),
            directory,
            config,
            in_flight: AtomicUsize::new(0),
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    /// Check if a rebalance is in progress.
    pub fn is_rebalancing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Completed rebalances, oldest first.
    pub fn history(&self) -> Vec<RebalanceRecord> {
        self.history.read().iter().cloned().collect()
    }

    /// The most recent completed rebalance.
    pub fn last_rebalance(&self) -> Option<RebalanceRecord> {
        self.history.read().back().cloned()
    }

    /// Rebalance for a joining node.
    pub async fn node_join(&self, node_id: impl Into<NodeId>) -> Result<Option<RebalanceRecord>> {
        self.rebalance(RebalanceKind::NodeJoin(node_id.into())).await
    }

    /// Rebalance for a leaving node.
    pub async fn node_leave(&self, node_id: impl Into<NodeId>) -> Result<Option<RebalanceRecord>> {
        self.rebalance(RebalanceKind::NodeLeave(node_id.into())).await
    }

    /// Re-divide the space evenly among the Active nodes.
    pub async fn manual(&self) -> Result<Option<RebalanceRecord>> {
        self.rebalance(RebalanceKind::Manual).await
    }

    /// Plan and publish until the change is reflected in the canonical topology.
    ///
    /// Returns `None` when the current topology already reflects the change.
    /// Lost epoch races, timeouts and busy stores are retried with exponential
    /// backoff; exhausting the attempts on lost races yields
    /// [`Error::RebalanceConflict`]. Structural errors surface immediately.
    pub async fn rebalance(&self, kind: RebalanceKind) -> Result<Option<RebalanceRecord>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.rebalance_with_retry(kind).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let metrics = self.directory.metrics();
        match &result {
            Ok(Some(record)) => metrics.record_rebalance(record.churn, record.duration),
            Ok(None) => {}
            Err(e) => metrics.record_rebalance_failure(e),
        }
        result
    }

    async fn rebalance_with_retry(&self, kind: RebalanceKind) -> Result<Option<RebalanceRecord>> {
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let error = match self.attempt(&kind).await {
                Ok(None) => {
                    debug!(%kind, attempt, "Nothing to rebalance");
                    return Ok(None);
                }
                Ok(Some((from_epoch, plan))) => {
                    let record = RebalanceRecord {
                        id: Uuid::new_v4(),
                        kind,
                        from_epoch,
                        to_epoch: plan.topology.epoch(),
                        churn: plan.churn,
                        attempts: attempt,
                        duration: start.elapsed(),
                    };
                    info!(
                        id = %record.id,
                        kind = %record.kind,
                        epoch = record.to_epoch,
                        churn = record.churn,
                        attempts = attempt,
                        "Rebalance complete"
                    );
                    self.remember(record.clone());
                    return Ok(Some(record));
                }
                Err(e) if !e.is_transient() => {
                    error!(%kind, error = %e, "Rebalance failed");
                    return Err(e);
                }
                Err(e) => e,
            };

            if attempt >= self.config.max_attempts {
                warn!(%kind, attempts = attempt, error = %error, "Rebalance gave up");
                return Err(match error {
                    Error::StaleEpoch { .. } => Error::RebalanceConflict { attempts: attempt },
                    other => other,
                });
            }

            let backoff = self.backoff(attempt);
            warn!(%kind, attempt, error = %error, ?backoff, "Rebalance attempt failed, retrying");
            tokio::time::sleep(backoff).await;
        }
    }

    /// One refresh, plan and publish round.
    async fn attempt(&self, kind: &RebalanceKind) -> Result<Option<(Epoch, RebalancePlan)>> {
        let prior = self.directory.refresh().await?;

        let plan = match kind {
            RebalanceKind::Manual => self.rebalancer.plan_even(&prior)?,
            _ => {
                let changes = self.changes_for(kind);
                if changes.is_empty() {
                    return Ok(None);
                }
                self.rebalancer.plan(&prior, &changes)?
            }
        };

        let Some(plan) = plan else {
            return Ok(None);
        };

        debug!(
            %kind,
            from_epoch = prior.epoch(),
            churn = plan.churn,
            moves = plan.moves.len(),
            "Publishing rebalance plan"
        );
        self.directory.publish(plan.topology.clone()).await?;
        Ok(Some((prior.epoch(), plan)))
    }

    /// Membership changes still pending for `kind`.
    fn changes_for(&self, kind: &RebalanceKind) -> Vec<MembershipChange> {
        match kind {
            RebalanceKind::NodeJoin(node_id) => {
                let status = self.directory.member_status(node_id);
                if !matches!(status, Some(NodeStatus::Joining) | Some(NodeStatus::Active)) {
                    // Left again, or already forgotten, before its join was processed
                    return Vec::new();
                }

                let mut changes = vec![MembershipChange::Join(node_id.clone())];
                changes.extend(
                    self.directory
                        .departing_owners()
                        .into_iter()
                        .filter(|id| id != node_id)
                        .map(MembershipChange::Leave),
                );
                changes
            }
            RebalanceKind::NodeLeave(node_id) => {
                let status = self.directory.member_status(node_id);
                if !status.map(|s| s.is_departing()).unwrap_or(false) {
                    // Rejoined before its range was reassigned
                    return Vec::new();
                }
                vec![MembershipChange::Leave(node_id.clone())]
            }
            RebalanceKind::Manual => Vec::new(),
        }
    }

    /// Backoff after the given failed attempt, with up to 50% random jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_for(attempt);
        let jitter_ms = (base.as_millis() as u64) / 2;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    fn remember(&self, record: RebalanceRecord) {
        let mut history = self.history.write();
        history.push_back(record);
        while history.len() > self.config.max_history {
            history.pop_front();
        }
    }

    // ==================== Event Loop ====================

    /// Rebalance for every membership event until the channel closes.
    ///
    /// A rebalance that gives up on a transient failure is not dropped: the
    /// pending joins and departures recorded in the directory are driven
    /// again on the next topology change, or after `max_backoff` if nothing
    /// else happens first.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<MemberEvent>) {
        let mut retry_at: Option<tokio::time::Instant> = None;

        loop {
            let retry = async move {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            let needs_retry = tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        MemberEvent::NodeJoined { node_id } => {
                            self.drive(RebalanceKind::NodeJoin(node_id)).await
                        }
                        MemberEvent::NodeLeft { node_id } | MemberEvent::NodeFailed { node_id } => {
                            self.drive(RebalanceKind::NodeLeave(node_id)).await
                        }
                        MemberEvent::TopologyChanged { .. } => self.drive_pending().await,
                    }
                }
                _ = retry => {
                    retry_at = None;
                    debug!("Retrying pending membership changes");
                    self.drive_pending().await
                }
            };

            if needs_retry && retry_at.is_none() {
                retry_at = Some(tokio::time::Instant::now() + self.config.max_backoff);
            }
        }

        debug!("Membership event channel closed, coordinator stopped");
    }

    /// Run one rebalance. Returns true when it failed in a way worth retrying later.
    async fn drive(&self, kind: RebalanceKind) -> bool {
        match self.rebalance(kind).await {
            Ok(_) => false,
            Err(e) => e.is_transient() || matches!(e, Error::RebalanceConflict { .. }),
        }
    }

    /// Drive every join and departure the directory still has pending.
    async fn drive_pending(&self) -> bool {
        let mut needs_retry = false;
        for node_id in self.directory.joining_members() {
            needs_retry |= self.drive(RebalanceKind::NodeJoin(node_id)).await;
        }
        for node_id in self.directory.departing_owners() {
            needs_retry |= self.drive(RebalanceKind::NodeLeave(node_id)).await;
        }
        needs_retry
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self: &Arc<Self>, events: mpsc::UnboundedReceiver<MemberEvent>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(events))
    }
}

impl fmt::Debug for RebalanceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebalanceCoordinator")
            .field("policy", &self.config.policy)
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}
