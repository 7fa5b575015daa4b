//! Mock pub/sub transport for testing

use super::{MessageHandler, PubSub};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct MockPubSubInner {
    handler: Option<MessageHandler>,
    published: Vec<(String, String)>,
    subscriptions: Vec<String>,
    fail_publish: bool,
}

/// Mock transport for unit testing
///
/// Clones share state, so a test can keep one handle while the channel owns
/// the other.
#[derive(Clone, Default)]
pub struct MockPubSub {
    inner: Arc<Mutex<MockPubSubInner>>,
}

impl MockPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an inbound message as the broker would
    pub fn inject(&self, topic: &str, payload: &str) {
        // Clone the handler out so it can re-enter the transport
        // (subscription requests call subscribe from inside the callback)
        let handler = self.inner.lock().handler.clone();
        if let Some(handler) = handler {
            handler(topic, payload);
        }
    }

    /// All published (topic, payload) pairs, in order
    pub fn published(&self) -> Vec<(String, String)> {
        self.inner.lock().published.clone()
    }

    /// Number of sends on one topic
    pub fn publish_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }

    /// Last payload published on a topic
    pub fn last_published(&self, topic: &str) -> Option<String> {
        self.inner
            .lock()
            .published
            .iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
    }

    /// Active subscription filters
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.lock().subscriptions.clone()
    }

    /// Make publish calls fail until cleared
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.lock().fail_publish = fail;
    }
}

impl PubSub for MockPubSub {
    fn connect(&self, on_message: MessageHandler) -> Result<()> {
        self.inner.lock().handler = Some(on_message);
        Ok(())
    }

    fn subscribe(&self, filter: &str) -> Result<()> {
        self.inner.lock().subscriptions.push(filter.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_publish {
            return Err(Error::Other("mock publish failure".to_string()));
        }
        inner
            .published
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.inner.lock().handler = None;
        Ok(())
    }
}
