//! Broadcast dispatch: events, the publisher, and the in-process channel hub.
//!
//! An event names its channels and its payload; the publisher hands the payload to the
//! transport once per channel; the transport delivers only to subscribers the channel
//! authorizer admitted at attach time.

mod event;
mod hub;
mod publisher;

pub use event::{Broadcast, BroadcastPayload, MessageReceived, RecordField, DEFAULT_EVENT_NAME};
pub use hub::{event_frame, BroadcastHub, Subscription, SHUTDOWN_EVENT_JSON};
pub use publisher::{DeliveryFailure, EventPublisher, PublishReport, Transport};
