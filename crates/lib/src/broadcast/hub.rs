//! In-process transport: one bounded broadcast channel per channel name.
//!
//! Subscribers attach through [`BroadcastHub::attach`], which consults the
//! [`ChannelAuthorizer`] first. Publishing never blocks: frames sent while nobody is
//! attached are dropped, and slow receivers lag and skip the oldest frames.

use crate::authz::{ChannelAuthorizer, ChannelName};
use crate::broadcast::event::BroadcastPayload;
use crate::broadcast::publisher::Transport;
use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Frame sent to every connected client when the hub shuts down.
pub const SHUTDOWN_EVENT_JSON: &str = r#"{"type":"event","event":"shutdown","payload":{}}"#;

/// Wire frame for a delivered event: `{ "type": "event", "event", "channel", "payload" }`.
#[derive(Debug, Serialize)]
struct EventFrame<'a> {
    #[serde(rename = "type")]
    typ: &'static str,
    event: &'a str,
    channel: &'a ChannelName,
    payload: &'a BroadcastPayload,
}

/// Serialize one event frame.
pub fn event_frame(
    channel: &ChannelName,
    event: &str,
    payload: &BroadcastPayload,
) -> Result<String, serde_json::Error> {
    serde_json::to_string(&EventFrame {
        typ: "event",
        event,
        channel,
        payload,
    })
}

/// An authorized attachment to one channel.
pub struct Subscription {
    channel: ChannelName,
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    /// Next frame on this channel. None once the channel is closed.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::debug!("subscriber on {} lagged {} frames", self.channel, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Channel-based broadcast transport shared by the gateway and the publisher.
pub struct BroadcastHub {
    authorizer: Arc<ChannelAuthorizer>,
    channels: RwLock<HashMap<ChannelName, broadcast::Sender<String>>>,
    /// Hub-wide notices (shutdown) for every connected client.
    notices: broadcast::Sender<String>,
    capacity: usize,
    closed: AtomicBool,
}

impl BroadcastHub {
    /// Hub whose per-channel buffers hold `capacity` frames (minimum 1).
    pub fn new(authorizer: Arc<ChannelAuthorizer>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (notices, _) = broadcast::channel(capacity);
        Self {
            authorizer,
            channels: RwLock::new(HashMap::new()),
            notices,
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    pub fn authorizer(&self) -> &ChannelAuthorizer {
        &self.authorizer
    }

    /// Attach `identity` to `channel`. None when the authorizer denies or the hub is shut down.
    pub async fn attach(&self, identity: &str, channel: &ChannelName) -> Option<Subscription> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        if !self.authorizer.authorize(identity, channel) {
            log::info!("attach denied: {:?} on {}", identity, channel);
            return None;
        }
        let mut g = self.channels.write().await;
        g.retain(|_, tx| tx.receiver_count() > 0);
        let tx = g
            .entry(channel.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        log::debug!("attach: {:?} on {}", identity, channel);
        Some(Subscription {
            channel: channel.clone(),
            rx: tx.subscribe(),
        })
    }

    /// Receiver for hub-wide notices.
    pub fn notices(&self) -> broadcast::Receiver<String> {
        self.notices.subscribe()
    }

    /// Number of live subscriptions on `channel`.
    pub async fn subscriber_count(&self, channel: &ChannelName) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Refuse further deliveries and attachments, and tell clients to disconnect.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.notices.send(SHUTDOWN_EVENT_JSON.to_string());
    }
}

#[async_trait]
impl Transport for BroadcastHub {
    async fn deliver(
        &self,
        channel: &ChannelName,
        event: &str,
        payload: &BroadcastPayload,
    ) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let frame = event_frame(channel, event, payload)?;
        if let Some(tx) = self.channels.read().await.get(channel) {
            // no receivers is not a failure
            let _ = tx.send(frame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hub() -> BroadcastHub {
        let authorizer = ChannelAuthorizer::builder()
            .register("dashboard", |identity: &str, _: &ChannelName| Ok(identity == "owner"))
            .build();
        BroadcastHub::new(Arc::new(authorizer), 8)
    }

    #[tokio::test]
    async fn attach_consults_authorizer() {
        let hub = hub();
        let dashboard = ChannelName::from("private-dashboard");
        assert!(hub.attach("owner", &dashboard).await.is_some());
        assert!(hub.attach("guest", &dashboard).await.is_none());
        assert!(hub.attach("guest", &ChannelName::from("private-billing")).await.is_none());
        assert!(hub.attach("guest", &ChannelName::from("announcements")).await.is_some());
    }

    #[tokio::test]
    async fn delivered_frames_reach_attached_subscribers_only() {
        let hub = hub();
        let dashboard = ChannelName::from("private-dashboard");
        let other = ChannelName::from("announcements");
        let mut sub = hub.attach("owner", &dashboard).await.expect("authorized");
        let mut other_sub = hub.attach("owner", &other).await.expect("public");

        let mut payload = BroadcastPayload::new();
        payload.insert("id".into(), json!("msg-1"));
        hub.deliver(&dashboard, "message.received", &payload).await.unwrap();

        let frame: serde_json::Value = serde_json::from_str(&sub.recv().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({
                "type": "event",
                "event": "message.received",
                "channel": "private-dashboard",
                "payload": { "id": "msg-1" }
            })
        );
        assert!(other_sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivery_without_subscribers_succeeds() {
        let hub = hub();
        let payload = BroadcastPayload::new();
        assert!(hub
            .deliver(&ChannelName::from("private-dashboard"), "x", &payload)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_pruned() {
        let hub = hub();
        let dashboard = ChannelName::from("private-dashboard");
        let sub = hub.attach("owner", &dashboard).await.unwrap();
        assert_eq!(hub.subscriber_count(&dashboard).await, 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(&dashboard).await, 0);
        let _other = hub.attach("owner", &ChannelName::from("announcements")).await;
        assert!(!hub.channels.read().await.contains_key(&dashboard));
    }

    #[tokio::test]
    async fn shutdown_notifies_and_closes() {
        let hub = hub();
        let mut notices = hub.notices();
        hub.shutdown();
        assert_eq!(notices.recv().await.unwrap(), SHUTDOWN_EVENT_JSON);
        let payload = BroadcastPayload::new();
        assert!(matches!(
            hub.deliver(&ChannelName::from("announcements"), "x", &payload).await,
            Err(TransportError::Closed)
        ));
        assert!(hub.attach("owner", &ChannelName::from("announcements")).await.is_none());
    }
}
