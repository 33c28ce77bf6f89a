//! Node selection: a pure scoring pass over a registry snapshot.
//!
//! `pick` takes an immutable snapshot plus the request's requirements and
//! returns the best node id, or `None` when nothing is eligible. It never
//! blocks, never retries, and never acquires the exclusivity lock; the
//! caller does that and handles races.

use std::time::{Duration, Instant};

use inferops_common::NodeMetrics;

use super::registry::{NodeId, NodeSnapshot};
use crate::config::SchedulerConfig;

/// Neutral capability assumed for nodes that do not declare theirs.
const DEFAULT_VRAM_GB: f64 = 16.0;
const DEFAULT_TFLOPS: f64 = 20.0;

/// Temperature below which a node takes no scheduling penalty.
const TEMP_FREE_BELOW: f64 = 60.0;
/// Temperature at which the thermal score bottoms out.
const TEMP_CEILING: f64 = 90.0;

const SCORE_EPSILON: f64 = 1e-9;

/// What a request needs from the node that will serve it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Requirements<'a> {
    /// Only nodes advertising this model are eligible.
    pub model: Option<&'a str>,
    /// Nodes that already failed this request; skipped during failover.
    pub exclude: &'a [NodeId],
}

/// Select the best eligible node from `nodes`.
///
/// Eligibility: online, not busy, not excluded, advertising the requested
/// model (if any), and polled successfully within `fresh_within`. Ties on
/// the composite score break on lower GPU utilization, then lower node id.
pub fn pick(
    nodes: &[NodeSnapshot],
    requirements: &Requirements<'_>,
    weights: &SchedulerConfig,
    fresh_within: Duration,
    now: Instant,
) -> Option<NodeId> {
    let (cap_min, cap_max) = capability_range(nodes);

    let mut best: Option<(f64, f64, NodeId)> = None;
    for node in nodes {
        if !node.online || node.busy || requirements.exclude.contains(&node.id) {
            continue;
        }
        let Some(metrics) = &node.metrics else {
            continue;
        };
        let fresh = node
            .last_success_at
            .is_some_and(|t| now.duration_since(t) <= fresh_within);
        if !fresh {
            continue;
        }
        if let Some(model) = requirements.model {
            if !metrics.models.iter().any(|m| m == model) {
                continue;
            }
        }

        let score = composite_score(node, metrics, cap_min, cap_max, weights);
        let util = metrics.gpu.utilization_percent;
        let better = match best {
            None => true,
            Some((best_score, best_util, best_id)) => {
                if score > best_score + SCORE_EPSILON {
                    true
                } else if score < best_score - SCORE_EPSILON {
                    false
                } else if util < best_util - SCORE_EPSILON {
                    true
                } else if util > best_util + SCORE_EPSILON {
                    false
                } else {
                    node.id < best_id
                }
            }
        };
        if better {
            best = Some((score, util, node.id));
        }
    }

    best.map(|(_, _, id)| id)
}

fn composite_score(
    node: &NodeSnapshot,
    metrics: &NodeMetrics,
    cap_min: f64,
    cap_max: f64,
    weights: &SchedulerConfig,
) -> f64 {
    let cap = normalize(raw_capability(node), cap_min, cap_max);
    weights.w_capability * cap
        + weights.w_gpu_util * headroom(metrics.gpu.utilization_percent)
        + weights.w_gpu_mem * headroom(metrics.gpu.memory_usage_percent)
        + weights.w_cpu * headroom(metrics.cpu_usage_percent)
        + weights.w_mem * headroom(metrics.memory.percent)
        + weights.w_temp * temp_score(metrics.gpu.temperature_celsius)
}

/// Fraction of a 0-100 utilization metric still unused.
fn headroom(percent: f64) -> f64 {
    1.0 - (percent / 100.0).clamp(0.0, 1.0)
}

/// 1.0 up to 60 °C, decaying linearly to 0.0 at 90 °C.
fn temp_score(celsius: f64) -> f64 {
    if celsius <= TEMP_FREE_BELOW {
        1.0
    } else if celsius >= TEMP_CEILING {
        0.0
    } else {
        (TEMP_CEILING - celsius) / (TEMP_CEILING - TEMP_FREE_BELOW)
    }
}

fn raw_capability(node: &NodeSnapshot) -> f64 {
    node.vram_gb.unwrap_or(DEFAULT_VRAM_GB) * 0.5 + node.tflops.unwrap_or(DEFAULT_TFLOPS) * 0.5
}

/// Min/max raw capability across all configured nodes, so the capability
/// term is comparable within this fleet.
fn capability_range(nodes: &[NodeSnapshot]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for node in nodes {
        let raw = raw_capability(node);
        min = min.min(raw);
        max = max.max(raw);
    }
    (min, max)
}

fn normalize(raw: f64, min: f64, max: f64) -> f64 {
    if !min.is_finite() || !max.is_finite() || (max - min).abs() < SCORE_EPSILON {
        // Uniform fleet: the capability term cannot distinguish nodes.
        0.5
    } else {
        ((raw - min) / (max - min)).clamp(0.0, 1.0)
    }
}
