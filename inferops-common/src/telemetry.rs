//! Telemetry schema reported by the per-node monitor agents.
//!
//! Ingest is strict: every top-level field must be present or
//! deserialization fails and the gateway counts the poll as a failure.
//! Partially populated snapshots never enter the registry.

use serde::{Deserialize, Serialize};

/// One full metrics snapshot from a monitor agent's `/metrics` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub cpu_usage_percent: f64,
    pub cpu_model: String,
    pub memory: MemoryMetrics,
    pub gpu: GpuMetrics,
    /// Model names the node's LLM daemon currently advertises.
    pub models: Vec<String>,
    /// Mirror of the gateway's exclusivity flag, reported to the UI.
    /// The gateway overwrites this with its own view when serving status.
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuMetrics {
    pub utilization_percent: f64,
    pub memory_usage_percent: f64,
    pub temperature_celsius: f64,
}
