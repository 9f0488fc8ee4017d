// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the domain-level transport interface used by the
//! client and server layers to exchange messages. It intentionally avoids any
//! reference to concrete protocols, brokers, or client libraries.
//!
//! The transport layer is responsible only for connecting to the bus and
//! delivering opaque envelopes to subscribed consumers. Correlation, retries
//! and timeouts are handled by the client; method dispatch by the server.
//!
//! Concrete implementations of this interface live under `src/transport/`.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{Envelope, Result};

/// A topic envelopes are published to.
///
/// Treated as an opaque identifier at the domain level. Addresses are
/// immutable, cheap to clone, and safe to share across threads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        Address(value.into())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request to receive envelopes published to a topic.
///
/// The in-memory transport matches subscriptions against addresses by exact
/// string equality; that is the reference semantics for all transports.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(pub Arc<str>);

impl From<Address> for Subscription {
    fn from(address: Address) -> Self {
        Subscription(address.0)
    }
}

impl<T> From<T> for Subscription
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        Subscription(value.into())
    }
}

/// Handle returned from a successful subscription.
///
/// The inbox yields every envelope delivered to the topic, on whichever task
/// reads it. It closes when the topic is unsubscribed or the transport stops.
pub struct SubscriptionHandle {
    // ---
    /// The topic this handle receives from.
    pub subscription: Subscription,

    /// Receiver channel for delivered envelopes matching this subscription.
    pub inbox: mpsc::Receiver<Envelope>,
}

/// Bus client capability consumed by the RPC core.
///
/// Implementations must ensure that:
/// - `start()` and `stop()` are idempotent: a second `start()` is a no-op, as
///   is `stop()` on a transport that never started.
/// - A failed connection attempt returns [`RpcError::Connection`](crate::RpcError::Connection).
/// - `publish()`, `subscribe()` and `unsubscribe()` while disconnected return
///   [`RpcError::Connection`](crate::RpcError::Connection) and change nothing.
/// - Once `subscribe()` returns successfully, envelopes published *after*
///   that point to the topic are deliverable to the returned inbox.
/// - `publish()` does not wait on subscribers processing the envelope.
///
/// Inbound delivery is message passing: each inbox is drained by its own task
/// (see [`run`](crate::transport::run)), so the consumer callback runs on a
/// different execution context than the publisher.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Identifier of this transport instance, used for logging.
    fn transport_id(&self) -> &str;

    /// Connect to the bus.
    async fn start(&self) -> Result<()>;

    /// Disconnect and drop every subscription made through this transport.
    async fn stop(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Publish an envelope to the given topic.
    async fn publish(&self, topic: &Address, env: Envelope) -> Result<()>;

    /// Register a subscription and return a handle for receiving messages.
    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle>;

    /// Remove this transport's subscriptions for the topic, closing their
    /// inboxes. Unknown topics are a no-op.
    async fn unsubscribe(&self, sub: &Subscription) -> Result<()>;
}

/// Shared transport pointer.
///
/// This is an `Arc<dyn Transport>`, which means:
/// - `.clone()` is cheap (only increments a reference count)
/// - Multiple clones share the same underlying connection
pub type TransportPtr = Arc<dyn Transport>;
