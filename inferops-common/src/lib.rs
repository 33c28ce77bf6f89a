//! Wire types shared between the InferOps gateway and the daemons running on
//! each compute node: the chat-completion protocol spoken by the LLM daemons
//! and the telemetry schema reported by the monitor agents.

mod chat;
mod telemetry;

pub use chat::{ChatCompletionRequest, ChatMessage, StreamChoice, StreamChunk, StreamDelta};
pub use telemetry::{GpuMetrics, MemoryMetrics, NodeMetrics};
