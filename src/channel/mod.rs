//! Publish/subscribe bridge to the remote operator
//!
//! The transport's listener thread does nothing but hand inbound messages to
//! a callback; the callback either honours a subscription request or stores
//! the topic/payload pair in the pending-change map. All business logic runs
//! on the control-loop thread, which drains the map once per iteration.

pub mod command;
pub mod mock;
pub mod mqtt;

pub use command::{Command, FlightCommand, ParseError};
pub use mock::MockPubSub;
pub use mqtt::MqttTransport;

use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked on the transport's listener thread for each inbound
/// message
pub type MessageHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Publish/subscribe transport contract
pub trait PubSub: Send + Sync {
    /// Establish the network session and begin delivering inbound messages
    /// to `on_message`
    fn connect(&self, on_message: MessageHandler) -> Result<()>;

    /// Add a subscription filter
    fn subscribe(&self, filter: &str) -> Result<()>;

    /// Publish a payload on a topic (fire-and-forget)
    fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    /// Stop the listener and close the session
    fn disconnect(&self) -> Result<()>;
}

/// Command channel bridging the operator to the control loop
pub struct CommandChannel {
    transport: Arc<dyn PubSub>,
    /// Diff of inbound values since the last drain; written by the listener
    /// thread, swapped out by the control loop
    pending: Arc<Mutex<HashMap<String, String>>>,
    /// Full merged view of everything received so far (control loop only)
    subscriptions: HashMap<String, String>,
    /// Last payload sent per outbound topic (control loop only)
    sent: HashMap<String, String>,
}

impl CommandChannel {
    /// Connect the transport, wire the listener callback and subscribe to
    /// the operator's command filters
    pub fn connect(transport: Arc<dyn PubSub>, operator: &str) -> Result<Self> {
        let pending: Arc<Mutex<HashMap<String, String>>> = Arc::default();

        let subscribe_topic = format!("{}/commands/subscribe", operator);
        let handler: MessageHandler = {
            let pending = Arc::clone(&pending);
            let transport = Arc::clone(&transport);
            Arc::new(move |topic: &str, payload: &str| {
                if topic == subscribe_topic {
                    // Reserved topic: the payload is a new filter to follow
                    if let Err(e) = transport.subscribe(payload) {
                        log::warn!("subscription request for {} failed: {}", payload, e);
                    }
                } else {
                    pending.lock().insert(topic.to_string(), payload.to_string());
                }
            })
        };
        transport.connect(handler)?;

        for category in ["commands", "pins", "i2c", "mavlink"] {
            transport.subscribe(&format!("{}/{}/#", operator, category))?;
        }

        Ok(Self {
            transport,
            pending,
            subscriptions: HashMap::new(),
            sent: HashMap::new(),
        })
    }

    /// Atomically take everything received since the last drain, leaving the
    /// pending map empty; drained values are merged into the full
    /// subscription view
    pub fn drain_changes(&mut self) -> HashMap<String, String> {
        let changes = std::mem::take(&mut *self.pending.lock());
        for (topic, payload) in &changes {
            self.subscriptions.insert(topic.clone(), payload.clone());
        }
        changes
    }

    /// Last known value for every topic received so far
    pub fn current_subscriptions(&self) -> &HashMap<String, String> {
        &self.subscriptions
    }

    /// Publish only if the payload differs from the last one sent on this
    /// topic; a failed send is not recorded, so the value is retried on the
    /// next iteration
    pub fn publish_if_changed(&mut self, topic: &str, payload: &str) {
        if self.sent.get(topic).map(String::as_str) == Some(payload) {
            return;
        }
        match self.transport.publish(topic, payload) {
            Ok(()) => {
                self.sent.insert(topic.to_string(), payload.to_string());
            }
            Err(e) => {
                log::warn!("publish on {} failed: {}", topic, e);
            }
        }
    }

    /// Stop the listener and close the session
    pub fn disconnect(&self) -> Result<()> {
        self.transport.disconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (CommandChannel, MockPubSub) {
        let transport = MockPubSub::new();
        let channel =
            CommandChannel::connect(Arc::new(transport.clone()), "PC").expect("mock connect");
        (channel, transport)
    }

    #[test]
    fn test_connect_subscribes_operator_filters() {
        let (_channel, transport) = channel();
        let filters = transport.subscriptions();
        assert!(filters.contains(&"PC/commands/#".to_string()));
        assert!(filters.contains(&"PC/pins/#".to_string()));
        assert!(filters.contains(&"PC/i2c/#".to_string()));
        assert!(filters.contains(&"PC/mavlink/#".to_string()));
    }

    #[test]
    fn test_drain_changes_empties_pending_map() {
        let (mut channel, transport) = channel();
        transport.inject("PC/pins/LED/id", "17");
        transport.inject("PC/pins/LED/val", "1");

        let first = channel.drain_changes();
        assert_eq!(first.len(), 2);
        assert_eq!(first.get("PC/pins/LED/id").map(String::as_str), Some("17"));

        // No messages in between: second drain is empty
        assert!(channel.drain_changes().is_empty());
    }

    #[test]
    fn test_later_value_overwrites_earlier_within_one_drain() {
        let (mut channel, transport) = channel();
        transport.inject("PC/pins/LED/val", "0");
        transport.inject("PC/pins/LED/val", "1");

        let changes = channel.drain_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get("PC/pins/LED/val").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_drained_values_merge_into_subscription_view() {
        let (mut channel, transport) = channel();
        transport.inject("PC/pins/LED/id", "17");
        channel.drain_changes();
        transport.inject("PC/pins/LED/id", "27");
        channel.drain_changes();

        assert_eq!(
            channel
                .current_subscriptions()
                .get("PC/pins/LED/id")
                .map(String::as_str),
            Some("27")
        );
    }

    #[test]
    fn test_publish_if_changed_suppresses_duplicates() {
        let (mut channel, transport) = channel();
        channel.publish_if_changed("ROV/GPIO/LED", "1");
        channel.publish_if_changed("ROV/GPIO/LED", "1");
        assert_eq!(transport.publish_count("ROV/GPIO/LED"), 1);

        channel.publish_if_changed("ROV/GPIO/LED", "0");
        assert_eq!(transport.publish_count("ROV/GPIO/LED"), 2);
    }

    #[test]
    fn test_failed_publish_retried_next_iteration() {
        let (mut channel, transport) = channel();
        transport.set_fail_publish(true);
        channel.publish_if_changed("ROV/status", "running");
        assert_eq!(transport.publish_count("ROV/status"), 0);

        // Transport recovers: the same value goes out on the next attempt
        transport.set_fail_publish(false);
        channel.publish_if_changed("ROV/status", "running");
        assert_eq!(transport.publish_count("ROV/status"), 1);
    }

    #[test]
    fn test_subscribe_request_adds_filter() {
        let (mut channel, transport) = channel();
        transport.inject("PC/commands/subscribe", "PC/video/#");

        assert!(transport.subscriptions().contains(&"PC/video/#".to_string()));
        // The reserved topic itself never reaches the pending map
        assert!(channel.drain_changes().is_empty());
    }
}
