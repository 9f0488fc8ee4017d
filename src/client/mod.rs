// src/client/mod.rs
//! RPC client implementation.
//!
//! [`RpcClient`] owns one transport, one [`CorrelationRegistry`] and one
//! [`InvocationProducer`], and hands out cached [`ServiceProxy`] handles.
//!
//! # Architecture
//!
//! Each call attempt subscribes to its own reply topic
//! (`<namespace>/reply/<correlation_id>`), registers a pending slot, publishes
//! the request and waits. A forwarder task on the reply topic completes the
//! slot when the reply arrives. The reply topic is unsubscribed afterwards
//! whatever the outcome.
//!
//! # Concurrency
//!
//! Any number of calls may be in flight. The pending map is a plain mutex;
//! every operation on it is a single insert or remove.

mod pending;
mod producer;
mod proxy;
mod service_client;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub use pending::{CorrelationRegistry, PendingReply};
pub use producer::InvocationProducer;
pub use proxy::{MethodCaller, ServiceProxy};

use crate::codec::{CodecPtr, JsonCodec};
use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    log_info,
    Result,
    RpcConfig,
    RpcError,
    TransportPtr,
};

/// RPC client.
///
/// Cheap to clone (internally `Arc`-backed). Clones share the transport,
/// pending calls and proxy cache.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ef_rpc::Result<()> {
/// use ef_rpc::{create_memory_transport, RpcClient, RpcConfig};
///
/// let client = RpcClient::new(create_memory_transport("doc-client"), RpcConfig::default())?;
/// client.start().await?;
///
/// let calculator = client.create_service("Calculator")?;
/// assert_eq!(calculator.name(), "Calculator");
///
/// client.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    registry: Arc<CorrelationRegistry>,
    producer: Arc<InvocationProducer>,
    services: Mutex<HashMap<String, Arc<ServiceProxy>>>,
    started: AtomicBool,
}

impl RpcClient {
    // ---

    /// Create a client that encodes records as JSON.
    ///
    /// # Errors
    ///
    /// [`RpcError::InvalidConfig`] if `config` fails validation.
    pub fn new(transport: TransportPtr, config: RpcConfig) -> Result<Self> {
        Self::with_codec(transport, Arc::new(JsonCodec::new()), config)
    }

    /// Create a client with a custom record codec.
    pub fn with_codec(transport: TransportPtr, codec: CodecPtr, config: RpcConfig) -> Result<Self> {
        // ---
        config.validate()?;

        let registry = Arc::new(CorrelationRegistry::new());
        let producer = InvocationProducer::new(
            Arc::clone(&transport),
            codec,
            Arc::new(config),
            Arc::clone(&registry),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                registry,
                producer: Arc::new(producer),
                services: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Connect the transport. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// [`RpcError::Connection`] if the bus cannot be reached.
    pub async fn start(&self) -> Result<()> {
        // ---
        if self.is_started() {
            return Ok(());
        }
        self.inner.transport.start().await?;
        self.inner.registry.reopen();
        self.inner.started.store(true, Ordering::SeqCst);
        log_info!("{}: rpc client started", self.inner.transport.transport_id());
        Ok(())
    }

    /// Cancel every pending call, then disconnect. A second call is a no-op.
    ///
    /// Calls still in flight end with a bare [`RpcError::Cancelled`], not
    /// wrapped in [`RpcError::Invocation`]: this covers calls waiting for a
    /// reply, calls paused between retries, and calls that reach the
    /// registry after this point. [`start`](Self::start) accepts calls again.
    pub async fn stop(&self) -> Result<()> {
        // ---
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let _cancelled = self.inner.registry.cancel_all();
        log_debug!("cancelled {_cancelled} pending calls");

        self.inner.transport.stop().await?;
        log_info!("{}: rpc client stopped", self.inner.transport.transport_id());
        Ok(())
    }

    /// Proxy for the service registered under `name`.
    ///
    /// Repeated calls with the same name return the same proxy.
    ///
    /// # Errors
    ///
    /// [`RpcError::NotStarted`] before [`start`](Self::start).
    pub fn create_service(&self, name: &str) -> Result<Arc<ServiceProxy>> {
        // ---
        if !self.is_started() {
            return Err(RpcError::NotStarted);
        }

        let mut services = lock_ignore_poison(&self.inner.services);
        let proxy = services.entry(name.to_string()).or_insert_with(|| {
            Arc::new(ServiceProxy::new(name, Arc::clone(&self.inner.producer)))
        });
        Ok(Arc::clone(proxy))
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    pub fn config(&self) -> &RpcConfig {
        self.inner.producer.config()
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.registry.len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{create_memory_transport_with_hub, MemoryHub};

    fn client(hub: Arc<MemoryHub>) -> RpcClient {
        RpcClient::new(create_memory_transport_with_hub("client", hub), RpcConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        // ---
        let transport = create_memory_transport_with_hub("client", MemoryHub::new());
        let result = RpcClient::new(transport, RpcConfig::default().with_namespace(""));
        assert!(matches!(result, Err(RpcError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_create_service_requires_start() {
        // ---
        let client = client(MemoryHub::new());
        assert!(matches!(
            client.create_service("Calculator"),
            Err(RpcError::NotStarted)
        ));

        client.start().await.unwrap();
        let first = client.create_service("Calculator").unwrap();
        let second = client.create_service("Calculator").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        client.stop().await.unwrap();
        assert!(matches!(
            client.create_service("Calculator"),
            Err(RpcError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_is_idempotent() {
        // ---
        let client = client(MemoryHub::new());

        client.stop().await.unwrap();
        client.start().await.unwrap();
        client.start().await.unwrap();
        assert!(client.is_started());
        assert!(client.is_connected());

        client.stop().await.unwrap();
        client.stop().await.unwrap();
        assert!(!client.is_started());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_restart_reopens_registry() {
        // ---
        let client = client(MemoryHub::new());
        client.start().await.unwrap();
        assert!(!client.inner.registry.is_closed());

        client.stop().await.unwrap();
        assert!(client.inner.registry.is_closed());

        client.start().await.unwrap();
        assert!(!client.inner.registry.is_closed());
        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_failure_leaves_client_stopped() {
        // ---
        let hub = MemoryHub::new();
        hub.set_online(false);
        let client = client(hub);

        assert!(matches!(client.start().await, Err(RpcError::Connection(_))));
        assert!(!client.is_started());
    }
}
