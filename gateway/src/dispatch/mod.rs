//! Request dispatcher: schedules, locks, and proxies chat completions.
//!
//! One dispatch is: ask the scheduler for a node, take its exclusivity
//! lease, open the upstream POST, and hand the connected stream (with the
//! lease still attached) to the caller. Failures before the first proxied
//! byte release the lease, bump the node's advisory failure counter, and
//! fail over to the next candidate.

mod stream;

use std::sync::Arc;
use std::time::{Duration, Instant};

use inferops_common::ChatCompletionRequest;

use crate::cluster::{registry::NodeRegistry, scheduler, NodeId, NodeLease, Requirements};
use crate::config::{Config, SchedulerConfig};

pub use stream::sse_relay;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no suitable node is available")]
    NoNodeAvailable,
    #[error("upstream node failed: {0}")]
    Upstream(String),
}

/// The node a request landed on, for response headers and logs.
#[derive(Debug, Clone)]
pub struct AssignedNode {
    pub node_id: NodeId,
    pub node_name: String,
}

/// A connected upstream stream plus the lease that guards it. The lease
/// must live as long as bytes are still flowing; dropping it releases the
/// node.
#[derive(Debug)]
pub struct AssignedStream {
    pub lease: NodeLease,
    pub response: reqwest::Response,
}

impl AssignedStream {
    pub fn assigned(&self) -> AssignedNode {
        AssignedNode {
            node_id: self.lease.node_id(),
            node_name: self.lease.node_name().to_string(),
        }
    }
}

enum AttemptError {
    /// The scheduler found nothing eligible.
    NoNode,
    /// A node was locked but failed before the first byte.
    Upstream(String),
}

pub struct Dispatcher {
    registry: Arc<NodeRegistry>,
    client: reqwest::Client,
    weights: SchedulerConfig,
    fresh_within: Duration,
    lock_retries: u32,
    lock_retry_delay: Duration,
    max_attempts: u32,
}

impl Dispatcher {
    pub fn new(registry: Arc<NodeRegistry>, config: &Config) -> Self {
        Self {
            registry,
            client: reqwest::Client::builder()
                .connect_timeout(config.dispatch.connect_timeout())
                .read_timeout(config.dispatch.idle_read_timeout())
                .build()
                .expect("Failed to create dispatch HTTP client"),
            weights: config.scheduler.clone(),
            fresh_within: config.telemetry.freshness_window(),
            lock_retries: config.dispatch.lock_retries,
            lock_retry_delay: config.dispatch.lock_retry_delay(),
            max_attempts: config.dispatch.max_attempts,
        }
    }

    /// Open a streaming dispatch: the returned response is connected and
    /// verified healthy, but no body bytes have been consumed yet.
    pub async fn open_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<AssignedStream, DispatchError> {
        let model = request.model.as_deref();
        let mut tried: Vec<NodeId> = Vec::new();
        let mut upstream_error: Option<String> = None;

        let max_attempts = (self.max_attempts as usize)
            .min(self.registry.online_count())
            .max(1);
        for _ in 0..max_attempts {
            match self.attempt(model, &mut tried, request).await {
                Ok(stream) => return Ok(stream),
                Err(AttemptError::Upstream(e)) => upstream_error = Some(e),
                Err(AttemptError::NoNode) => break,
            }
        }

        // Every node advertising the model failed before the first byte;
        // make one last attempt with the model preference dropped.
        if model.is_some() && !tried.is_empty() {
            if let Ok(stream) = self.attempt(None, &mut tried, request).await {
                return Ok(stream);
            }
        }

        match upstream_error {
            Some(e) => Err(DispatchError::Upstream(e)),
            None => Err(DispatchError::NoNodeAvailable),
        }
    }

    /// Dispatch with a buffered response body. Used for `stream = false`
    /// requests and by the batch engine.
    pub async fn dispatch_buffered(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<(AssignedNode, serde_json::Value), DispatchError> {
        let stream = self.open_stream(request).await?;
        let assigned = stream.assigned();
        let AssignedStream { lease, response } = stream;
        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| DispatchError::Upstream(e.to_string()))?;
        drop(lease);
        Ok((assigned, body))
    }

    async fn attempt(
        &self,
        model: Option<&str>,
        tried: &mut Vec<NodeId>,
        request: &ChatCompletionRequest,
    ) -> Result<AssignedStream, AttemptError> {
        let lease = self
            .acquire(model, tried)
            .await
            .map_err(|_| AttemptError::NoNode)?;
        match self.post_upstream(&lease, request).await {
            Ok(response) => Ok(AssignedStream { lease, response }),
            Err(message) => {
                tracing::warn!(
                    node = lease.node_id(),
                    error = %message,
                    "upstream failed before first byte"
                );
                self.registry.record_dispatch_failure(lease.node_id());
                tried.push(lease.node_id());
                Err(AttemptError::Upstream(message))
            }
        }
    }

    /// Pick a node and take its lease. Losing an acquisition race re-runs
    /// the scheduler after a short backoff, a bounded number of times.
    async fn acquire(
        &self,
        model: Option<&str>,
        exclude: &[NodeId],
    ) -> Result<NodeLease, DispatchError> {
        for attempt in 0..=self.lock_retries {
            if attempt > 0 {
                tokio::time::sleep(self.lock_retry_delay).await;
            }
            let snapshot = self.registry.snapshot();
            let requirements = Requirements { model, exclude };
            match scheduler::pick(
                &snapshot,
                &requirements,
                &self.weights,
                self.fresh_within,
                Instant::now(),
            ) {
                Some(id) => match self.registry.try_acquire(id) {
                    Ok(lease) => {
                        tracing::debug!(node = id, "node lease acquired");
                        return Ok(lease);
                    }
                    Err(e) => {
                        tracing::debug!(node = id, reason = %e, "lost acquisition race");
                    }
                },
                None => {
                    // Retry only while contention could clear; with nothing
                    // online and busy there is no point backing off.
                    let contended = snapshot
                        .iter()
                        .any(|n| n.online && n.busy && !exclude.contains(&n.id));
                    if !contended {
                        return Err(DispatchError::NoNodeAvailable);
                    }
                }
            }
        }
        Err(DispatchError::NoNodeAvailable)
    }

    async fn post_upstream(
        &self,
        lease: &NodeLease,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, String> {
        let response = self
            .client
            .post(lease.llm_url())
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("upstream returned {}", response.status()));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::RegistrySettings;
    use crate::config::NodeConfig;
    use inferops_common::ChatMessage;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            messages: vec![ChatMessage::user("Hello")],
            model: None,
            stream: false,
            extra: serde_json::Map::new(),
        }
    }

    fn test_metrics(models: &[&str]) -> inferops_common::NodeMetrics {
        serde_json::from_value(serde_json::json!({
            "cpu_usage_percent": 20.0,
            "cpu_model": "Test CPU",
            "memory": { "percent": 30.0 },
            "gpu": {
                "utilization_percent": 40.0,
                "memory_usage_percent": 40.0,
                "temperature_celsius": 50.0
            },
            "models": models,
        }))
        .unwrap()
    }

    fn build_registry(llm_urls: &[&str]) -> Arc<NodeRegistry> {
        let nodes = llm_urls
            .iter()
            .enumerate()
            .map(|(i, url)| NodeConfig {
                id: i as u32 + 1,
                name: format!("Node {}", i + 1),
                monitor_base_url: "http://unused".to_string(),
                llm_url: url.to_string(),
                vram_gb: None,
                tflops: None,
            })
            .collect();
        let registry = Arc::new(NodeRegistry::new(
            nodes,
            RegistrySettings {
                failure_threshold: 3,
                offline_after: Duration::from_secs(15),
                high_util_threshold: 95.0,
            },
        ));
        for (i, _) in llm_urls.iter().enumerate() {
            let id = i as u32 + 1;
            let seq = registry.begin_poll(id);
            registry.update_metrics(id, seq, Some(test_metrics(&["llama3"])));
        }
        registry
    }

    fn dispatcher(registry: Arc<NodeRegistry>) -> Dispatcher {
        let mut config = Config::default();
        config.dispatch.lock_retry_delay_ms = 1;
        Dispatcher::new(registry, &config)
    }

    #[tokio::test]
    async fn test_no_nodes_fails_immediately() {
        let registry = Arc::new(NodeRegistry::new(
            vec![],
            RegistrySettings {
                failure_threshold: 3,
                offline_after: Duration::from_secs(15),
                high_util_threshold: 95.0,
            },
        ));
        let dispatcher = dispatcher(registry);

        let started = Instant::now();
        let err = dispatcher.open_stream(&test_request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoNodeAvailable));
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_buffered_dispatch_reports_node_and_releases() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"choices": [{"message": {"content": "hi"}}]})),
            )
            .mount(&server)
            .await;

        let registry = build_registry(&[&format!("{}/api/chat", server.uri())]);
        let dispatcher = dispatcher(Arc::clone(&registry));

        let (assigned, body) = dispatcher.dispatch_buffered(&test_request()).await.unwrap();
        assert_eq!(assigned.node_id, 1);
        assert_eq!(assigned.node_name, "Node 1");
        assert_eq!(body["choices"][0]["message"]["content"], "hi");
        // The lease is gone: the node can be taken again right away.
        assert!(registry.try_acquire(1).is_ok());
    }

    #[tokio::test]
    async fn test_failover_to_second_node_before_first_byte() {
        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&bad)
            .await;
        let good = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&good)
            .await;

        // Node 1 gets a capability edge so the scheduler tries it first.
        let nodes = vec![
            NodeConfig {
                id: 1,
                name: "Node 1".to_string(),
                monitor_base_url: "http://unused".to_string(),
                llm_url: format!("{}/api/chat", bad.uri()),
                vram_gb: Some(24.0),
                tflops: Some(80.0),
            },
            NodeConfig {
                id: 2,
                name: "Node 2".to_string(),
                monitor_base_url: "http://unused".to_string(),
                llm_url: format!("{}/api/chat", good.uri()),
                vram_gb: Some(10.0),
                tflops: Some(30.0),
            },
        ];
        let registry = Arc::new(NodeRegistry::new(
            nodes,
            RegistrySettings {
                failure_threshold: 3,
                offline_after: Duration::from_secs(15),
                high_util_threshold: 95.0,
            },
        ));
        for id in [1, 2] {
            let seq = registry.begin_poll(id);
            registry.update_metrics(id, seq, Some(test_metrics(&["llama3"])));
        }
        let dispatcher = dispatcher(Arc::clone(&registry));

        let (assigned, _) = dispatcher.dispatch_buffered(&test_request()).await.unwrap();
        assert_eq!(assigned.node_id, 2);
        // The failed node carries an advisory failure mark.
        assert_eq!(registry.snapshot()[0].consecutive_failures, 1);
        // Both leases were released along the way.
        assert!(registry.try_acquire(2).is_ok());
    }

    #[tokio::test]
    async fn test_all_upstreams_failing_surfaces_upstream_error() {
        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&bad)
            .await;

        let registry = build_registry(&[&format!("{}/api/chat", bad.uri())]);
        let dispatcher = dispatcher(registry);

        let err = dispatcher.dispatch_buffered(&test_request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_busy_pool_exhausts_lock_retries() {
        let registry = build_registry(&["http://unused/api/chat"]);
        let _lease = registry.try_acquire(1).unwrap();
        let dispatcher = dispatcher(Arc::clone(&registry));

        let err = dispatcher.open_stream(&test_request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoNodeAvailable));
    }

    #[tokio::test]
    async fn test_second_chat_proceeds_after_first_releases() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let registry = build_registry(&[&format!("{}/api/chat", server.uri())]);
        // Default backoff: three 50 ms retries outlast the 20 ms hold below.
        let dispatcher = Dispatcher::new(Arc::clone(&registry), &Config::default());

        let lease = registry.try_acquire(1).unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(lease);
        });

        // The retry loop re-picks after the holder lets go.
        let (assigned, _) = dispatcher.dispatch_buffered(&test_request()).await.unwrap();
        assert_eq!(assigned.node_id, 1);
        release.await.unwrap();
    }
}
