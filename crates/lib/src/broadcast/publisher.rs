//! Event publisher: fan an event out to each of its channels through a transport.
//!
//! Deliveries run in the order the event declares its channels. Each one is bounded by a
//! timeout and independent of the others: a failed channel is logged and reported, and the
//! remaining channels are still attempted. Nothing is retried.

use crate::authz::ChannelName;
use crate::broadcast::event::{Broadcast, BroadcastPayload};
use crate::error::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Publish/subscribe delivery mechanism. Fire-and-forget: `Ok` means the transport accepted
/// the frame, not that any subscriber received it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(
        &self,
        channel: &ChannelName,
        event: &str,
        payload: &BroadcastPayload,
    ) -> Result<(), TransportError>;
}

/// One channel that could not be delivered to.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub channel: ChannelName,
    pub error: TransportError,
}

/// Outcome of one `publish` call.
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Channels the transport accepted, in delivery order.
    pub delivered: Vec<ChannelName>,
    pub failures: Vec<DeliveryFailure>,
}

impl PublishReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Publishes [`Broadcast`] events. Stateless apart from its transport handle; share freely.
#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn Transport>,
    delivery_timeout: Duration,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn Transport>, delivery_timeout: Duration) -> Self {
        Self {
            transport,
            delivery_timeout,
        }
    }

    /// Deliver `event.payload()` to every channel in `event.channels()`, in order.
    pub async fn publish<E: Broadcast + ?Sized>(&self, event: &E) -> PublishReport {
        let channels = event.channels();
        let payload = event.payload();
        let name = event.name();
        let mut report = PublishReport::default();
        if channels.is_empty() {
            log::warn!("publish: event {:?} declares no channels", name);
            return report;
        }
        for channel in channels {
            let delivery = self.transport.deliver(&channel, name, &payload);
            let result = match tokio::time::timeout(self.delivery_timeout, delivery).await {
                Ok(r) => r,
                Err(_) => Err(TransportError::Timeout(self.delivery_timeout)),
            };
            match result {
                Ok(()) => {
                    log::debug!("publish: {} delivered to {}", name, channel);
                    report.delivered.push(channel);
                }
                Err(error) => {
                    log::warn!("publish: {} to {} failed: {}", name, channel, error);
                    report.failures.push(DeliveryFailure { channel, error });
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every delivery; fails or stalls on configured channels.
    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<(String, String, BroadcastPayload)>>,
        failing: Vec<&'static str>,
        stalled: Vec<&'static str>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn deliver(
            &self,
            channel: &ChannelName,
            event: &str,
            payload: &BroadcastPayload,
        ) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((channel.to_string(), event.to_string(), payload.clone()));
            if self.stalled.iter().any(|c| *c == channel.as_str()) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.failing.iter().any(|c| *c == channel.as_str()) {
                return Err(TransportError::Other("broker refused".into()));
            }
            Ok(())
        }
    }

    struct TestEvent {
        channels: Vec<&'static str>,
        payload: Option<BroadcastPayload>,
    }

    impl Broadcast for TestEvent {
        fn channels(&self) -> Vec<ChannelName> {
            self.channels.iter().map(|c| ChannelName::from(*c)).collect()
        }

        fn payload(&self) -> BroadcastPayload {
            self.payload.clone().unwrap_or_default()
        }
    }

    fn publisher(transport: Arc<RecordingTransport>) -> EventPublisher {
        EventPublisher::new(transport, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn single_private_channel_gets_empty_payload() {
        let transport = Arc::new(RecordingTransport::default());
        let event = TestEvent {
            channels: vec!["private-dashboard"],
            payload: None,
        };
        let report = publisher(transport.clone()).publish(&event).await;

        assert!(report.is_complete());
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "private-dashboard");
        assert_eq!(calls[0].1, "broadcast");
        assert!(calls[0].2.is_empty());
    }

    #[tokio::test]
    async fn delivers_once_per_channel_in_order_with_exact_payload() {
        let transport = Arc::new(RecordingTransport::default());
        let mut payload = BroadcastPayload::new();
        payload.insert("id".into(), json!("msg-1"));
        let event = TestEvent {
            channels: vec!["private-dashboard", "announcements", "private-orders.9"],
            payload: Some(payload.clone()),
        };
        let report = publisher(transport.clone()).publish(&event).await;

        let calls = transport.calls.lock().unwrap();
        let order: Vec<&str> = calls.iter().map(|c| c.0.as_str()).collect();
        assert_eq!(order, vec!["private-dashboard", "announcements", "private-orders.9"]);
        assert!(calls.iter().all(|c| c.2 == payload));
        assert_eq!(report.delivered.len(), 3);
    }

    #[tokio::test]
    async fn failure_does_not_stop_later_channels() {
        let transport = Arc::new(RecordingTransport {
            failing: vec!["a"],
            ..Default::default()
        });
        let event = TestEvent {
            channels: vec!["a", "b", "c"],
            payload: None,
        };
        let report = publisher(transport.clone()).publish(&event).await;

        assert_eq!(transport.calls.lock().unwrap().len(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].channel.as_str(), "a");
        assert_eq!(
            report.delivered,
            vec![ChannelName::from("b"), ChannelName::from("c")]
        );
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn stalled_delivery_times_out_and_publishing_continues() {
        let transport = Arc::new(RecordingTransport {
            stalled: vec!["slow"],
            ..Default::default()
        });
        let event = TestEvent {
            channels: vec!["slow", "fast"],
            payload: None,
        };
        let report = publisher(transport.clone()).publish(&event).await;

        assert!(matches!(
            report.failures[0].error,
            TransportError::Timeout(_)
        ));
        assert_eq!(report.delivered, vec![ChannelName::from("fast")]);
    }

    #[tokio::test]
    async fn no_channels_means_no_deliveries() {
        let transport = Arc::new(RecordingTransport::default());
        let event = TestEvent {
            channels: vec![],
            payload: None,
        };
        let report = publisher(transport.clone()).publish(&event).await;
        assert!(transport.calls.lock().unwrap().is_empty());
        assert!(report.delivered.is_empty() && report.is_complete());
    }
}
