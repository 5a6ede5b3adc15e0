//! # Topic Subscriptions
//!
//! Handlers are registered per topic and invoked once per logical message,
//! after any chunk reassembly. Dropping a [`Subscription`] unregisters it.

use crate::errors::{BusError, CodecError};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::debug;

/// A fully reassembled message delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
    /// Publishing peer, when the transport reports it.
    pub sender: Option<String>,
}

impl BusMessage {
    /// Deserialize the payload into a typed message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| BusError::DecodeFailed(CodecError::InvalidJson(e.to_string())))
    }
}

/// Callback invoked for each message on a topic.
pub type MessageHandler = Arc<dyn Fn(BusMessage) + Send + Sync>;

/// Registered handlers by topic.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(u64, MessageHandler)>>>,
}

impl SubscriptionTable {
    fn insert(&self, topic: &str, handler: MessageHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn remove(&self, topic: &str, id: u64) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(topic);
        }
        removed
    }

    pub(crate) fn has_subscribers(&self, topic: &str) -> bool {
        self.handlers.read().contains_key(topic)
    }

    pub(crate) fn subscriber_count(&self, topic: &str) -> usize {
        self.handlers.read().get(topic).map_or(0, Vec::len)
    }

    /// Invoke every handler for the message's topic. Handlers run outside
    /// the lock so they may subscribe or unsubscribe themselves.
    pub(crate) fn dispatch(&self, message: &BusMessage) -> usize {
        let handlers: Vec<MessageHandler> = match self.handlers.read().get(&message.topic) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &handlers {
            handler(message.clone());
        }
        handlers.len()
    }
}

/// Handle for a registered topic handler.
///
/// When dropped, the handler is unregistered.
pub struct Subscription {
    table: Weak<SubscriptionTable>,
    topic: String,
    id: u64,
    active: bool,
}

impl Subscription {
    pub(crate) fn register(table: &Arc<SubscriptionTable>, topic: &str, handler: MessageHandler) -> Self {
        let id = table.insert(topic, handler);
        debug!(topic = %topic, subscription = id, "Subscription created");
        Self {
            table: Arc::downgrade(table),
            topic: topic.to_string(),
            id,
            active: true,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Unregister now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the handler registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(table) = self.table.upgrade() {
            table.remove(&self.topic, self.id);
        }
        debug!(topic = %self.topic, subscription = self.id, "Subscription dropped");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Pull-style subscription: messages are buffered in an unbounded channel.
///
/// Implements `tokio_stream::Stream` for use with stream combinators.
pub struct MessageStream {
    subscription: Subscription,
    receiver: UnboundedReceiverStream<BusMessage>,
}

impl MessageStream {
    pub(crate) fn register(table: &Arc<SubscriptionTable>, topic: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: MessageHandler = Arc::new(move |message| {
            let _ = tx.send(message);
        });
        Self {
            subscription: Subscription::register(table, topic, handler),
            receiver: UnboundedReceiverStream::new(rx),
        }
    }

    /// Receive the next message, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.as_mut().recv().await
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.receiver.as_mut().try_recv().ok()
    }

    pub fn topic(&self) -> &str {
        self.subscription.topic()
    }
}

impl Stream for MessageStream {
    type Item = BusMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}
