//! Alert evaluation over cluster snapshots.
//!
//! Alerts are derived on demand; nothing is stored. Sustained-load
//! detection rides on the consecutive-poll counter the registry maintains.

use std::time::Instant;

use serde::Serialize;

use crate::cluster::registry::{NodeId, NodeSnapshot};
use crate::config::AlertsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

impl Alert {
    fn critical(node_id: NodeId, message: String) -> Self {
        Self {
            level: AlertLevel::Critical,
            message,
            node_id: Some(node_id),
        }
    }

    fn warning(node_id: NodeId, message: String) -> Self {
        Self {
            level: AlertLevel::Warning,
            message,
            node_id: Some(node_id),
        }
    }
}

/// Derive the current alert set from a registry snapshot.
pub fn evaluate(nodes: &[NodeSnapshot], config: &AlertsConfig, now: Instant) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for node in nodes {
        if !node.online {
            let down_for = node.offline_since.map(|t| now.duration_since(t));
            if let Some(down_for) = down_for {
                if down_for >= config.offline_alert_delay() {
                    alerts.push(Alert::critical(
                        node.id,
                        format!("{} has been offline for {}s", node.name, down_for.as_secs()),
                    ));
                }
            }
            continue;
        }

        let Some(metrics) = &node.metrics else {
            continue;
        };

        if metrics.gpu.temperature_celsius >= config.gpu_temp_critical {
            alerts.push(Alert::critical(
                node.id,
                format!(
                    "{} GPU temperature at {:.0}\u{b0}C",
                    node.name, metrics.gpu.temperature_celsius
                ),
            ));
        }
        if metrics.gpu.memory_usage_percent >= config.gpu_mem_warning {
            alerts.push(Alert::warning(
                node.id,
                format!(
                    "{} GPU memory at {:.0}%",
                    node.name, metrics.gpu.memory_usage_percent
                ),
            ));
        }
        if metrics.memory.percent >= config.mem_warning {
            alerts.push(Alert::warning(
                node.id,
                format!("{} system memory at {:.0}%", node.name, metrics.memory.percent),
            ));
        }
        if node.high_util_polls >= config.sustained_polls {
            alerts.push(Alert::warning(
                node.id,
                format!(
                    "{} GPU utilization at {:.0}% sustained",
                    node.name, metrics.gpu.utilization_percent
                ),
            ));
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use inferops_common::{GpuMetrics, MemoryMetrics, NodeMetrics};
    use std::time::Duration;

    fn base_snapshot(id: NodeId) -> NodeSnapshot {
        NodeSnapshot {
            id,
            name: format!("Node {id}"),
            vram_gb: None,
            tflops: None,
            online: true,
            busy: false,
            consecutive_failures: 0,
            last_success_at: Some(Instant::now()),
            offline_since: None,
            high_util_polls: 0,
            cpu_model: None,
            metrics: Some(NodeMetrics {
                cpu_usage_percent: 20.0,
                cpu_model: "Test CPU".to_string(),
                memory: MemoryMetrics { percent: 30.0 },
                gpu: GpuMetrics {
                    utilization_percent: 40.0,
                    memory_usage_percent: 40.0,
                    temperature_celsius: 50.0,
                },
                models: vec![],
                locked: false,
            }),
        }
    }

    fn config() -> AlertsConfig {
        AlertsConfig::default()
    }

    #[test]
    fn test_healthy_node_raises_nothing() {
        let alerts = evaluate(&[base_snapshot(1)], &config(), Instant::now());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_offline_node_alerts_after_delay() {
        let now = Instant::now();
        let mut node = base_snapshot(1);
        node.online = false;
        node.offline_since = Some(now - Duration::from_secs(31));

        let alerts = evaluate(&[node], &config(), now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert!(alerts[0].message.contains("offline"));
        assert_eq!(alerts[0].node_id, Some(1));
    }

    #[test]
    fn test_recently_offline_node_is_quiet() {
        let now = Instant::now();
        let mut node = base_snapshot(1);
        node.online = false;
        node.offline_since = Some(now - Duration::from_secs(5));

        assert!(evaluate(&[node], &config(), now).is_empty());
    }

    #[test]
    fn test_hot_gpu_is_critical() {
        let mut node = base_snapshot(1);
        node.metrics.as_mut().unwrap().gpu.temperature_celsius = 87.0;

        let alerts = evaluate(&[node], &config(), Instant::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert!(alerts[0].message.contains("87"));
    }

    #[test]
    fn test_memory_pressure_is_warning() {
        let mut node = base_snapshot(1);
        node.metrics.as_mut().unwrap().gpu.memory_usage_percent = 93.0;
        node.metrics.as_mut().unwrap().memory.percent = 91.0;

        let alerts = evaluate(&[node], &config(), Instant::now());
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.level == AlertLevel::Warning));
    }

    #[test]
    fn test_sustained_utilization_needs_two_polls() {
        let mut node = base_snapshot(1);
        node.metrics.as_mut().unwrap().gpu.utilization_percent = 97.0;
        node.high_util_polls = 1;
        assert!(evaluate(&[node.clone()], &config(), Instant::now()).is_empty());

        node.high_util_polls = 2;
        let alerts = evaluate(&[node], &config(), Instant::now());
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].message.contains("sustained"));
    }

    #[test]
    fn test_offline_node_metrics_are_not_judged() {
        let now = Instant::now();
        let mut node = base_snapshot(1);
        node.online = false;
        node.offline_since = Some(now - Duration::from_secs(60));
        node.metrics.as_mut().unwrap().gpu.temperature_celsius = 99.0;

        let alerts = evaluate(&[node], &config(), now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert!(alerts[0].message.contains("offline"));
    }
}
