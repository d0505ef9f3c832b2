//! Inbound message from a provider: handed to the ingestion task for persistence and broadcast.

/// A raw provider message, validated but not yet persisted.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Provider id (e.g. "telegram").
    pub provider: String,
    /// Provider payload exactly as received.
    pub payload: serde_json::Value,
}
