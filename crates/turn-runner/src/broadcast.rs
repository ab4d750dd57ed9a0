//! Live-stream broadcast sink
//!
//! The transport behind this (WebSocket, Socket.IO, ...) belongs to the host
//! application. Runs only fire events into it and never wait on delivery.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::event::OutputStream;

/// Event name for live output chunks
pub const CLI_OUTPUT_EVENT: &str = "cli_output";

/// Fire-and-forget event sink
pub trait BroadcastSink: Send + Sync {
    fn broadcast(&self, event: &str, payload: Value);
}

/// Payload of a [`CLI_OUTPUT_EVENT`]
#[derive(Debug, Clone, Serialize)]
pub struct CliOutputPayload<'a> {
    pub task_id: &'a str,
    pub stream: OutputStream,
    pub data: &'a str,
}

/// Drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBroadcast;

impl BroadcastSink for NoopBroadcast {
    fn broadcast(&self, _event: &str, _payload: Value) {}
}

/// A broadcast event as delivered to channel subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastEvent {
    pub event: String,
    pub payload: Value,
}

/// Fans events out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct ChannelBroadcast {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl ChannelBroadcast {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

impl BroadcastSink for ChannelBroadcast {
    fn broadcast(&self, event: &str, payload: Value) {
        // No subscribers is not an error.
        let _ = self.tx.send(BroadcastEvent {
            event: event.to_string(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shape() {
        let payload = CliOutputPayload {
            task_id: "task-1",
            stream: OutputStream::Stderr,
            data: "hello",
        };
        assert_eq!(
            serde_json::to_value(payload).unwrap(),
            json!({"task_id": "task-1", "stream": "stderr", "data": "hello"})
        );
    }

    #[tokio::test]
    async fn test_channel_broadcast_delivers_in_order() {
        let sink = ChannelBroadcast::new(16);
        let mut rx = sink.subscribe();

        sink.broadcast(CLI_OUTPUT_EVENT, json!({"n": 1}));
        sink.broadcast(CLI_OUTPUT_EVENT, json!({"n": 2}));

        assert_eq!(rx.recv().await.unwrap().payload, json!({"n": 1}));
        assert_eq!(rx.recv().await.unwrap().payload, json!({"n": 2}));
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let sink = ChannelBroadcast::new(4);
        sink.broadcast(CLI_OUTPUT_EVENT, json!({}));
        NoopBroadcast.broadcast(CLI_OUTPUT_EVENT, json!({}));
    }
}
