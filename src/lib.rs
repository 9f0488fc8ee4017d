//! Remote procedure calls over a publish/subscribe bus.
//!
//! A caller invokes a named method on a remote service as if it were local.
//! The only transport is a topic-based message bus: requests go to
//! `<namespace>/request/<service>`, and each reply comes back on a per-call
//! topic `<namespace>/reply/<correlation_id>`.
//!
//! The crate provides:
//! - [`RpcClient`] with cached [`ServiceProxy`] handles, per-call timeout and
//!   fixed-delay retry
//! - [`RpcServer`] hosting [`RpcService`] implementations, with concurrent
//!   request dispatch
//! - an in-memory bus ([`MemoryHub`]) for tests and single-process use, and an
//!   MQTT bus (feature `transport_rumqttc`)
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ef_rpc::Result<()> {
//! use ef_rpc::{
//!     create_memory_transport_with_hub, CallArgs, MemoryHub, RpcClient, RpcConfig, RpcServer,
//!     ServiceBuilder,
//! };
//!
//! let hub = MemoryHub::new();
//!
//! let server = RpcServer::new(
//!     create_memory_transport_with_hub("server", hub.clone()),
//!     RpcConfig::default(),
//! )?;
//! let calculator = ServiceBuilder::new("Calculator")
//!     .method("add", |args: CallArgs| async move {
//!         let (a, b): (i64, i64) = args.positional()?;
//!         Ok(a + b)
//!     })
//!     .build();
//! server.register_service(calculator, None)?;
//! server.start().await?;
//!
//! let client = RpcClient::new(
//!     create_memory_transport_with_hub("client", hub),
//!     RpcConfig::default(),
//! )?;
//! client.start().await?;
//!
//! let calculator = client.create_service("Calculator")?;
//! let sum: i64 = calculator.call("add", (10, 20)).await?;
//! assert_eq!(sum, 30);
//!
//! client.stop().await?;
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard};

mod macros;
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

mod client;
mod domain;
mod server;

pub mod codec;
pub mod protocol;
pub mod transport;

mod correlation;
mod error;
mod retry;
mod rpc_config;

// --- public re-exports

pub use client::{
    //
    CorrelationRegistry,
    InvocationProducer,
    MethodCaller,
    PendingReply,
    RpcClient,
    ServiceProxy,
};
pub use server::{
    //
    CallArgs,
    FnService,
    MethodError,
    RequestDispatcher,
    RpcServer,
    RpcService,
    ServiceBuilder,
};

pub use codec::{Codec, CodecPtr, JsonCodec};
pub use correlation::CorrelationId;
pub use error::{Result, RpcError};
pub use protocol::{Invocation, Response, Topics};
pub use rpc_config::{RetryPolicy, RpcConfig, DEFAULT_NAMESPACE};

pub use domain::{
    //
    Address,
    Envelope,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};

pub use transport::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    MemoryHub,
    TransportConsumer,
};

#[cfg(feature = "transport_rumqttc")]
pub use transport::{create_rumqttc_transport, DeliveryQuality, MqttOptions};

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// Every map guarded this way is updated by single insert/remove operations,
/// so a panic while holding the lock cannot leave it half-modified.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
