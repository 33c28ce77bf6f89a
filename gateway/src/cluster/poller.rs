//! Telemetry poller: keeps the registry's view of every node fresh.
//!
//! One task per node fetches `{monitor_base_url}/metrics` on a fixed
//! interval. Every outcome is tagged with a per-node sequence number so a
//! late response can never overwrite a newer one. A failing node only
//! affects its own entry; all errors are recoverable.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use inferops_common::NodeMetrics;

use crate::config::{NodeConfig, TelemetryConfig};

use super::registry::NodeRegistry;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("schema violation: {0}")]
    Schema(String),
}

pub struct TelemetryPoller {
    registry: Arc<NodeRegistry>,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl TelemetryPoller {
    pub fn new(registry: Arc<NodeRegistry>, config: &TelemetryConfig) -> Self {
        Self {
            registry,
            client: reqwest::Client::builder()
                .timeout(config.timeout())
                .build()
                .expect("Failed to create telemetry HTTP client"),
            poll_interval: config.poll_interval(),
        }
    }

    /// Spawn one polling task per configured node.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let poller = Arc::new(self);
        poller
            .registry
            .nodes()
            .iter()
            .cloned()
            .map(|node| {
                let poller = Arc::clone(&poller);
                tokio::spawn(async move { poller.poll_loop(node).await })
            })
            .collect()
    }

    async fn poll_loop(self: Arc<Self>, node: NodeConfig) {
        let url = metrics_url(&node.monitor_base_url);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(node = node.id, url = %url, "telemetry poller started");

        loop {
            ticker.tick().await;
            let seq = self.registry.begin_poll(node.id);
            match self.fetch(&url).await {
                Ok(metrics) => {
                    self.registry.update_metrics(node.id, seq, Some(metrics));
                }
                Err(e) => {
                    tracing::debug!(node = node.id, error = %e, "telemetry poll failed");
                    self.registry.update_metrics(node.id, seq, None);
                }
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<NodeMetrics, TelemetryError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(TelemetryError::Status(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| TelemetryError::Schema(e.to_string()))
    }
}

fn metrics_url(monitor_base_url: &str) -> String {
    format!("{}/metrics", monitor_base_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::registry::RegistrySettings;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metrics_body() -> serde_json::Value {
        serde_json::json!({
            "cpu_usage_percent": 12.0,
            "cpu_model": "Test CPU",
            "memory": { "percent": 35.0 },
            "gpu": {
                "utilization_percent": 44.0,
                "memory_usage_percent": 51.0,
                "temperature_celsius": 58.0
            },
            "models": ["llama3"]
        })
    }

    fn test_registry(monitor_base_url: &str) -> Arc<NodeRegistry> {
        Arc::new(NodeRegistry::new(
            vec![NodeConfig {
                id: 1,
                name: "Node 1".to_string(),
                monitor_base_url: monitor_base_url.to_string(),
                llm_url: "http://unused".to_string(),
                vram_gb: None,
                tflops: None,
            }],
            RegistrySettings {
                failure_threshold: 3,
                offline_after: Duration::from_secs(15),
                high_util_threshold: 95.0,
            },
        ))
    }

    fn test_poller(registry: Arc<NodeRegistry>) -> TelemetryPoller {
        TelemetryPoller::new(
            registry,
            &TelemetryConfig {
                poll_interval_ms: 20,
                timeout_ms: 500,
                failure_threshold: 3,
                offline_after_secs: 15,
            },
        )
    }

    #[test]
    fn test_metrics_url_strips_trailing_slash() {
        assert_eq!(
            metrics_url("http://10.0.0.1:8001/"),
            "http://10.0.0.1:8001/metrics"
        );
    }

    #[tokio::test]
    async fn test_fetch_parses_full_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metrics_body()))
            .mount(&server)
            .await;

        let registry = test_registry(&server.uri());
        let poller = test_poller(registry);
        let metrics = poller
            .fetch(&metrics_url(&server.uri()))
            .await
            .unwrap();
        assert_eq!(metrics.models, vec!["llama3"]);
    }

    #[tokio::test]
    async fn test_fetch_rejects_partial_snapshot() {
        let server = MockServer::start().await;
        let mut body = metrics_body();
        body.as_object_mut().unwrap().remove("gpu");
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let registry = test_registry(&server.uri());
        let poller = test_poller(registry);
        let err = poller
            .fetch(&metrics_url(&server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Schema(_)));
    }

    #[tokio::test]
    async fn test_fetch_maps_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = test_registry(&server.uri());
        let poller = test_poller(registry);
        let err = poller
            .fetch(&metrics_url(&server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Status(500)));
    }

    #[tokio::test]
    async fn test_poll_loop_marks_node_online() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metrics_body()))
            .mount(&server)
            .await;

        let registry = test_registry(&server.uri());
        let handles = test_poller(Arc::clone(&registry)).spawn();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(registry.online_count(), 1);

        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_unreachable_monitor_flips_node_offline() {
        // Nothing is listening on this port.
        let registry = test_registry("http://127.0.0.1:1");
        let handles = test_poller(Arc::clone(&registry)).spawn();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let snapshot = &registry.snapshot()[0];
        assert!(!snapshot.online);
        assert!(snapshot.consecutive_failures >= 3);

        for handle in handles {
            handle.abort();
        }
    }
}
