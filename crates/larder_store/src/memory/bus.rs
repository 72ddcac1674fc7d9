// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process message bus.

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{MessageBus, MessageHandler, Result};

struct Subscription<M> {
    connection: u64,
    handler: MessageHandler<M>,
}

struct Broker<M> {
    channels: Mutex<HashMap<String, Vec<Subscription<M>>>>,
    next_connection: AtomicU64,
}

/// A message bus that delivers messages within the current process.
///
/// Every `InMemoryBus` value is one connection to a shared broker; call
/// [`connect`](Self::connect) to open another connection to the same broker, the
/// way separate service instances would each hold their own connection.
/// [`publish`](MessageBus::publish) completes after every subscribed handler has
/// finished processing the message.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// use futures::FutureExt;
/// use larder_store::{InMemoryBus, MessageBus};
/// # futures::executor::block_on(async {
///
/// let bus = InMemoryBus::<String>::new();
/// let other = bus.connect();
/// let seen = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&seen);
/// other
///     .subscribe("updates", Arc::new(move |_message| {
///         counter.fetch_add(1, Ordering::SeqCst);
///         async {}.boxed()
///     }))
///     .await?;
///
/// bus.publish("updates", "hello".to_string()).await?;
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// # Ok::<(), larder_store::Error>(())
/// # });
/// ```
pub struct InMemoryBus<M> {
    broker: Arc<Broker<M>>,
    connection: u64,
}

impl<M> Debug for InMemoryBus<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl<M> Default for InMemoryBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> InMemoryBus<M> {
    /// Creates a new broker and returns the first connection to it.
    #[must_use]
    pub fn new() -> Self {
        Self {
            broker: Arc::new(Broker {
                channels: Mutex::new(HashMap::new()),
                next_connection: AtomicU64::new(1),
            }),
            connection: 0,
        }
    }

    /// Opens another connection to the same broker.
    #[must_use]
    pub fn connect(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            connection: self.broker.next_connection.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Returns the number of handlers subscribed to `channel` across all connections.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.broker.channels.lock().get(channel).map_or(0, Vec::len)
    }
}

impl<M> MessageBus<M> for InMemoryBus<M>
where
    M: Clone + Send + 'static,
{
    async fn subscribe(&self, channel: &str, handler: MessageHandler<M>) -> Result<()> {
        self.broker
            .channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(Subscription {
                connection: self.connection,
                handler,
            });
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let mut channels = self.broker.channels.lock();
        if let Some(subscriptions) = channels.get_mut(channel) {
            subscriptions.retain(|subscription| subscription.connection != self.connection);
            if subscriptions.is_empty() {
                channels.remove(channel);
            }
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: M) -> Result<()> {
        // Handlers run outside the lock so they may publish or unsubscribe themselves.
        let handlers: Vec<MessageHandler<M>> = self
            .broker
            .channels
            .lock()
            .get(channel)
            .map(|subscriptions| subscriptions.iter().map(|s| Arc::clone(&s.handler)).collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(message.clone()).await;
        }
        Ok(())
    }
}
