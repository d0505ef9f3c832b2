//! Broadcast events: which channels, which payload.

use crate::authz::ChannelName;
use crate::store::InboundMessageRecord;
use serde::{Deserialize, Serialize};

/// Payload delivered to subscribers: a JSON object.
pub type BroadcastPayload = serde_json::Map<String, serde_json::Value>;

/// Event name used when an event does not name itself.
pub const DEFAULT_EVENT_NAME: &str = "broadcast";

/// Anything that can be broadcast: a list of target channels and a payload.
///
/// The payload defaults to empty; implementors opt fields in explicitly so internal
/// record fields are never broadcast by accident.
pub trait Broadcast: Send + Sync {
    /// Target channels, in delivery order.
    fn channels(&self) -> Vec<ChannelName>;

    fn payload(&self) -> BroadcastPayload {
        BroadcastPayload::new()
    }

    /// Event name carried in the delivered frame.
    fn name(&self) -> &str {
        DEFAULT_EVENT_NAME
    }
}

/// Record fields that may be whitelisted into a [`MessageReceived`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordField {
    Id,
    Provider,
    ReceivedAt,
    Payload,
}

impl RecordField {
    pub fn key(&self) -> &'static str {
        match self {
            RecordField::Id => "id",
            RecordField::Provider => "provider",
            RecordField::ReceivedAt => "receivedAt",
            RecordField::Payload => "payload",
        }
    }
}

/// A message was received and persisted.
pub struct MessageReceived<'a> {
    record: &'a InboundMessageRecord,
    channels: Vec<ChannelName>,
    fields: Vec<RecordField>,
}

impl<'a> MessageReceived<'a> {
    pub const NAME: &'static str = "message.received";

    /// Event for `record` on `channel`, with an empty payload.
    pub fn new(record: &'a InboundMessageRecord, channel: ChannelName) -> Self {
        Self {
            record,
            channels: vec![channel],
            fields: Vec::new(),
        }
    }

    /// Also deliver to `channel` (after the ones already declared).
    pub fn with_channel(mut self, channel: ChannelName) -> Self {
        self.channels.push(channel);
        self
    }

    /// Whitelist record fields into the payload. Duplicates are ignored.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = RecordField>) -> Self {
        for f in fields {
            if !self.fields.contains(&f) {
                self.fields.push(f);
            }
        }
        self
    }

    pub fn record(&self) -> &InboundMessageRecord {
        self.record
    }
}

impl Broadcast for MessageReceived<'_> {
    fn channels(&self) -> Vec<ChannelName> {
        self.channels.clone()
    }

    fn payload(&self) -> BroadcastPayload {
        let mut payload = BroadcastPayload::new();
        for field in &self.fields {
            let value: serde_json::Value = match field {
                RecordField::Id => self.record.id.clone().into(),
                RecordField::Provider => self.record.provider.clone().into(),
                RecordField::ReceivedAt => self.record.received_at.to_rfc3339().into(),
                RecordField::Payload => self.record.payload.clone(),
            };
            payload.insert(field.key().to_string(), value);
        }
        payload
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}
