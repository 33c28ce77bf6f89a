//! SSE relay: injects the node-assignment event, then pumps upstream bytes.
//!
//! The generator owns the node lease for the whole life of the stream.
//! Whether the stream ends cleanly, breaks upstream, or is dropped because
//! the client went away, the lease falls out of scope and the node is
//! released. Reads from the upstream are paced by downstream polls, so a
//! slow client never forces unbounded buffering.

use std::convert::Infallible;

use async_stream::stream;
use axum::response::sse::Event;
use bytes::BytesMut;
use futures_util::{Stream, StreamExt};

use super::AssignedStream;

/// Terminal frame of every cleanly finished stream.
const DONE_FRAME: &str = "[DONE]";

/// Turn a connected upstream into the client-facing SSE event stream.
///
/// The first event is always `node_assigned`; upstream lines follow as
/// `data:` frames; a clean upstream end emits `[DONE]`. An upstream break
/// mid-response emits one in-band error frame instead, since bytes have
/// already been relayed and the request cannot be replayed elsewhere.
pub fn sse_relay(assigned: AssignedStream) -> impl Stream<Item = Result<Event, Infallible>> {
    stream! {
        let AssignedStream { lease, response } = assigned;
        let payload = serde_json::json!({
            "node_id": lease.node_id(),
            "node_name": lease.node_name(),
        });
        yield Ok::<_, Infallible>(Event::default().event("node_assigned").data(payload.to_string()));

        let mut upstream = response.bytes_stream();
        let mut buf = BytesMut::new();
        loop {
            match upstream.next().await {
                Some(Ok(chunk)) => {
                    buf.extend_from_slice(&chunk);
                    while let Some(line) = take_line(&mut buf) {
                        yield Ok(Event::default().data(line));
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        node = lease.node_id(),
                        error = %e,
                        "upstream stream broke mid-response"
                    );
                    yield Ok(Event::default().data(r#"{"error":"upstream truncated"}"#));
                    return;
                }
                None => break,
            }
        }
        if let Some(tail) = drain_tail(&mut buf) {
            yield Ok(Event::default().data(tail));
        }
        yield Ok(Event::default().data(DONE_FRAME));
        tracing::debug!(node = lease.node_id(), "stream finished");
    }
}

/// Pop the next complete line out of `buf`, without its terminator.
/// Returns `None` while no full line is buffered. Blank lines are dropped.
fn take_line(buf: &mut BytesMut) -> Option<String> {
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line = buf.split_to(pos + 1);
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\n', '\r']);
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }
    None
}

/// Flush whatever is left after upstream EOF as a final unterminated line.
fn drain_tail(buf: &mut BytesMut) -> Option<String> {
    if buf.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(buf).trim().to_string();
    buf.clear();
    (!text.is_empty()).then_some(text)
}
