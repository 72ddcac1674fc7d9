// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Publish/subscribe contract used for cross-instance signaling.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::Result;

/// A callback invoked for every message delivered on a subscribed channel.
pub type MessageHandler<M> = Arc<dyn Fn(M) -> BoxFuture<'static, ()> + Send + Sync>;

/// A connection to a publish/subscribe message bus.
///
/// Subscriptions belong to the connection: [`unsubscribe`](MessageBus::unsubscribe)
/// removes only the handlers registered through this connection.
pub trait MessageBus<M>: Send + Sync {
    /// Registers `handler` for messages published on `channel`.
    fn subscribe(&self, channel: &str, handler: MessageHandler<M>) -> impl Future<Output = Result<()>> + Send;

    /// Removes every handler this connection registered on `channel`.
    fn unsubscribe(&self, channel: &str) -> impl Future<Output = Result<()>> + Send;

    /// Publishes `message` to every subscriber of `channel`.
    fn publish(&self, channel: &str, message: M) -> impl Future<Output = Result<()>> + Send;
}
