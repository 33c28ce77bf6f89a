//! Canned monitor-agent and LLM-daemon payloads.

use serde_json::{json, Value};

/// A full, healthy `/metrics` payload advertising `models`.
pub fn metrics_payload(models: &[&str]) -> Value {
    json!({
        "cpu_usage_percent": 18.5,
        "cpu_model": "AMD EPYC 7543",
        "memory": { "percent": 35.0 },
        "gpu": {
            "utilization_percent": 42.0,
            "memory_usage_percent": 55.0,
            "temperature_celsius": 57.0
        },
        "models": models,
    })
}

/// A `/metrics` payload with explicit load figures.
pub fn metrics_payload_with_load(gpu_util: f64, gpu_mem: f64, gpu_temp: f64) -> Value {
    let mut payload = metrics_payload(&["llama3"]);
    payload["gpu"]["utilization_percent"] = json!(gpu_util);
    payload["gpu"]["memory_usage_percent"] = json!(gpu_mem);
    payload["gpu"]["temperature_celsius"] = json!(gpu_temp);
    payload
}

/// A buffered chat completion response body.
pub fn chat_response(content: &str) -> Value {
    json!({
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

/// A newline-delimited streamed chat body: one chunk per fragment,
/// as an LLM daemon would emit with `stream = true`.
pub fn chat_stream_body(fragments: &[&str]) -> String {
    fragments
        .iter()
        .map(|fragment| {
            json!({
                "choices": [{ "delta": { "content": fragment } }]
            })
            .to_string()
                + "\n"
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use inferops_common::{NodeMetrics, StreamChunk};

    #[test]
    fn test_metrics_payload_is_schema_complete() {
        let metrics: NodeMetrics = serde_json::from_value(metrics_payload(&["llama3"])).unwrap();
        assert_eq!(metrics.models, vec!["llama3"]);
    }

    #[test]
    fn test_stream_body_lines_parse_as_chunks() {
        let body = chat_stream_body(&["Hel", "lo"]);
        let chunks: Vec<StreamChunk> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hel"));
    }
}
