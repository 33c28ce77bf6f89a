//! Node registry: the cluster's shared mutable state.
//!
//! Every other subsystem reads or mutates node state through this table.
//! All operations are non-suspending; the lock is held only for short
//! critical sections, so readers and writers never park each other for long.
//! Exclusivity is handed out as a [`NodeLease`] that releases itself on drop,
//! which keeps acquire/release balanced on every exit path, including client
//! disconnects mid-stream.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use inferops_common::NodeMetrics;

use crate::config::NodeConfig;

pub type NodeId = u32;

/// Why `try_acquire` refused to hand out a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("node is offline")]
    Offline,
    #[error("node is busy")]
    Busy,
    #[error("node is not configured")]
    UnknownNode,
}

/// Liveness and alert bookkeeping thresholds the registry applies on update.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Consecutive failed polls before a node flips offline.
    pub failure_threshold: u32,
    /// Time without a successful poll before a node flips offline.
    pub offline_after: Duration,
    /// GPU utilization at or above this feeds the sustained-load counter.
    pub high_util_threshold: f64,
}

#[derive(Debug)]
struct NodeState {
    online: bool,
    busy: bool,
    consecutive_failures: u32,
    last_success_at: Option<Instant>,
    offline_since: Option<Instant>,
    /// Highest poll sequence applied; later polls with a smaller sequence
    /// are late responses and get discarded.
    applied_seq: u64,
    next_seq: u64,
    /// Consecutive polls with GPU utilization above the warning threshold.
    high_util_polls: u32,
    metrics: Option<NodeMetrics>,
    /// Sticky: survives the node going offline.
    cpu_model: Option<String>,
}

impl NodeState {
    fn new(now: Instant) -> Self {
        Self {
            online: false,
            busy: false,
            consecutive_failures: 0,
            last_success_at: None,
            offline_since: Some(now),
            applied_seq: 0,
            next_seq: 0,
            high_util_polls: 0,
            metrics: None,
            cpu_model: None,
        }
    }
}

/// Read-only view of one node, cloned out of the registry.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    pub vram_gb: Option<f64>,
    pub tflops: Option<f64>,
    pub online: bool,
    pub busy: bool,
    pub consecutive_failures: u32,
    pub last_success_at: Option<Instant>,
    pub offline_since: Option<Instant>,
    pub high_util_polls: u32,
    pub cpu_model: Option<String>,
    pub metrics: Option<NodeMetrics>,
}

/// Process-wide table of configured nodes and their last-known state.
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: Vec<NodeConfig>,
    states: RwLock<HashMap<NodeId, NodeState>>,
    settings: RegistrySettings,
}

impl NodeRegistry {
    pub fn new(nodes: Vec<NodeConfig>, settings: RegistrySettings) -> Self {
        let now = Instant::now();
        let states = nodes
            .iter()
            .map(|n| (n.id, NodeState::new(now)))
            .collect();
        Self {
            nodes,
            states: RwLock::new(states),
            settings,
        }
    }

    /// Static configuration of every node, in declaration order.
    pub fn nodes(&self) -> &[NodeConfig] {
        &self.nodes
    }

    pub fn node_config(&self, id: NodeId) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Allocate the sequence number for the poll about to start.
    pub fn begin_poll(&self, id: NodeId) -> u64 {
        let mut states = self.states.write().unwrap();
        match states.get_mut(&id) {
            Some(state) => {
                state.next_seq += 1;
                state.next_seq
            }
            None => 0,
        }
    }

    /// Apply one poll outcome. `None` records a failed poll (HTTP error,
    /// timeout, or schema violation). Outcomes carrying a sequence number
    /// at or below the last applied one are late responses and are dropped.
    pub fn update_metrics(&self, id: NodeId, seq: u64, metrics: Option<NodeMetrics>) {
        let now = Instant::now();
        let mut states = self.states.write().unwrap();
        let Some(state) = states.get_mut(&id) else {
            return;
        };
        if seq <= state.applied_seq {
            tracing::debug!(node = id, seq, "discarding out-of-order poll result");
            return;
        }
        state.applied_seq = seq;

        match metrics {
            Some(metrics) => {
                if metrics.gpu.utilization_percent >= self.settings.high_util_threshold {
                    state.high_util_polls = state.high_util_polls.saturating_add(1);
                } else {
                    state.high_util_polls = 0;
                }
                state.cpu_model = Some(metrics.cpu_model.clone());
                state.consecutive_failures = 0;
                state.last_success_at = Some(now);
                if !state.online {
                    tracing::info!(node = id, "node is back online");
                }
                state.online = true;
                state.offline_since = None;
                state.metrics = Some(metrics);
            }
            None => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                self.apply_liveness(id, state, now);
            }
        }
    }

    /// Bump the advisory failure counter after a dispatch-side connection
    /// failure. Counts toward the same liveness threshold as poll failures.
    pub fn record_dispatch_failure(&self, id: NodeId) {
        let now = Instant::now();
        let mut states = self.states.write().unwrap();
        if let Some(state) = states.get_mut(&id) {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            self.apply_liveness(id, state, now);
        }
    }

    fn apply_liveness(&self, id: NodeId, state: &mut NodeState, now: Instant) {
        if !state.online {
            return;
        }
        let stale = state
            .last_success_at
            .is_none_or(|t| now.duration_since(t) >= self.settings.offline_after);
        if state.consecutive_failures >= self.settings.failure_threshold || stale {
            tracing::warn!(
                node = id,
                failures = state.consecutive_failures,
                "node marked offline"
            );
            state.online = false;
            state.offline_since = Some(now);
        }
    }

    /// Reserve a node for exclusive use. Fails if the node is offline or
    /// already held; the liveness check and the flag flip happen under one
    /// write guard, so a node cannot be acquired while flipping offline.
    pub fn try_acquire(self: &Arc<Self>, id: NodeId) -> Result<NodeLease, AcquireError> {
        let node = self
            .node_config(id)
            .cloned()
            .ok_or(AcquireError::UnknownNode)?;

        let mut states = self.states.write().unwrap();
        let state = states.get_mut(&id).ok_or(AcquireError::UnknownNode)?;
        if !state.online {
            return Err(AcquireError::Offline);
        }
        if state.busy {
            return Err(AcquireError::Busy);
        }
        state.busy = true;
        drop(states);

        Ok(NodeLease {
            registry: Arc::clone(self),
            node,
        })
    }

    fn release(&self, id: NodeId) {
        let mut states = self.states.write().unwrap();
        if let Some(state) = states.get_mut(&id) {
            state.busy = false;
        }
    }

    /// Consistent view of every configured node, in declaration order.
    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        let states = self.states.read().unwrap();
        self.nodes
            .iter()
            .filter_map(|config| {
                let state = states.get(&config.id)?;
                Some(NodeSnapshot {
                    id: config.id,
                    name: config.name.clone(),
                    vram_gb: config.vram_gb,
                    tflops: config.tflops,
                    online: state.online,
                    busy: state.busy,
                    consecutive_failures: state.consecutive_failures,
                    last_success_at: state.last_success_at,
                    offline_since: state.offline_since,
                    high_util_polls: state.high_util_polls,
                    cpu_model: state.cpu_model.clone(),
                    metrics: state.metrics.clone(),
                })
            })
            .collect()
    }

    pub fn online_count(&self) -> usize {
        let states = self.states.read().unwrap();
        states.values().filter(|s| s.online).count()
    }
}

/// Exclusive hold on a node. Dropping the lease releases the node.
#[derive(Debug)]
pub struct NodeLease {
    registry: Arc<NodeRegistry>,
    node: NodeConfig,
}

impl NodeLease {
    pub fn node_id(&self) -> NodeId {
        self.node.id
    }

    pub fn node_name(&self) -> &str {
        &self.node.name
    }

    pub fn llm_url(&self) -> &str {
        &self.node.llm_url
    }
}

impl Drop for NodeLease {
    fn drop(&mut self) {
        tracing::debug!(node = self.node.id, "releasing node lease");
        self.registry.release(self.node.id);
    }
}
