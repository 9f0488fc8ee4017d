// src/server/mod.rs
//! RPC server implementation.
//!
//! [`RpcServer`] keeps a registry of services. On `start()` the registry is
//! frozen into a [`RequestDispatcher`] and one consumer per service subscribes
//! to `<namespace>/request/<service>`. Requests are dispatched concurrently;
//! each reply goes to the request's `reply_to` topic.

mod consumer;
mod dispatcher;
mod service;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub use dispatcher::RequestDispatcher;
pub use service::{CallArgs, FnService, MethodError, RpcService, ServiceBuilder};

use consumer::{ServiceBinding, ServiceConsumer};

use crate::codec::{CodecPtr, JsonCodec};
use crate::protocol::Topics;
use crate::{
    // ---
    lock_ignore_poison,
    log_info,
    log_warn,
    Result,
    RpcConfig,
    RpcError,
    TransportPtr,
};

/// RPC server.
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> ef_rpc::Result<()> {
/// use ef_rpc::{create_memory_transport, CallArgs, RpcConfig, RpcServer, ServiceBuilder};
///
/// let server = RpcServer::new(create_memory_transport("doc-server"), RpcConfig::default())?;
///
/// let greeter = ServiceBuilder::new("Greeter")
///     .method("hello", |args: CallArgs| async move {
///         let name: String = args.arg(0)?;
///         Ok(format!("hello, {name}"))
///     })
///     .build();
/// server.register_service(greeter, None)?;
///
/// server.start().await?;
/// assert!(server.is_running());
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcServer {
    // ---
    transport: TransportPtr,
    codec: CodecPtr,
    topics: Topics,
    services: Mutex<HashMap<String, Arc<dyn RpcService>>>,
    running: AtomicBool,
    bindings: tokio::sync::Mutex<Option<Vec<ServiceBinding>>>,
}

impl RpcServer {
    // ---

    /// Create a server that encodes records as JSON.
    ///
    /// # Errors
    ///
    /// [`RpcError::InvalidConfig`] if `config` fails validation.
    pub fn new(transport: TransportPtr, config: RpcConfig) -> Result<Self> {
        Self::with_codec(transport, Arc::new(JsonCodec::new()), config)
    }

    pub fn with_codec(transport: TransportPtr, codec: CodecPtr, config: RpcConfig) -> Result<Self> {
        // ---
        config.validate()?;

        Ok(Self {
            transport,
            codec,
            topics: Topics::new(config.namespace.as_str()),
            services: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            bindings: tokio::sync::Mutex::new(None),
        })
    }

    /// Register `service` under `name`, or under its
    /// [`default_name`](RpcService::default_name) when `name` is `None`.
    ///
    /// Registering a name twice replaces the earlier service. Returns the name
    /// used.
    ///
    /// # Errors
    ///
    /// [`RpcError::AlreadyStarted`] while the server is running.
    pub fn register_service<S>(&self, service: S, name: Option<&str>) -> Result<String>
    where
        S: RpcService + 'static,
    {
        self.register_shared(Arc::new(service), name)
    }

    /// Like [`register_service`](Self::register_service), for a service that
    /// is already shared.
    pub fn register_shared(&self, service: Arc<dyn RpcService>, name: Option<&str>) -> Result<String> {
        // ---
        let name = match name {
            Some(name) => name.to_string(),
            None => service.default_name(),
        };
        if name.is_empty() {
            return Err(RpcError::InvalidConfig("service name is empty".into()));
        }

        let mut services = lock_ignore_poison(&self.services);
        if self.is_running() {
            return Err(RpcError::AlreadyStarted);
        }
        if services.insert(name.clone(), service).is_some() {
            log_warn!("service {name} registered twice, keeping the latest");
        }
        Ok(name)
    }

    /// Names of the registered services, unordered.
    pub fn service_names(&self) -> Vec<String> {
        lock_ignore_poison(&self.services).keys().cloned().collect()
    }

    /// Connect and start serving every registered service.
    ///
    /// A second call is a no-op.
    ///
    /// # Errors
    ///
    /// [`RpcError::Connection`] if the bus cannot be reached, or the error of
    /// the first service subscription that fails. Nothing keeps running after
    /// a failed start.
    pub async fn start(&self) -> Result<()> {
        // ---
        let mut bindings = self.bindings.lock().await;
        if bindings.is_some() {
            return Ok(());
        }

        // From here on, registration is refused.
        self.running.store(true, Ordering::SeqCst);
        let snapshot = lock_ignore_poison(&self.services).clone();

        match self.bind_all(snapshot).await {
            Ok(started) => {
                log_info!(
                    "{}: rpc server serving {} services",
                    self.transport.transport_id(),
                    started.len()
                );
                *bindings = Some(started);
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn bind_all(
        &self,
        services: HashMap<String, Arc<dyn RpcService>>,
    ) -> Result<Vec<ServiceBinding>> {
        // ---
        let names: Vec<String> = services.keys().cloned().collect();
        let dispatcher = Arc::new(RequestDispatcher::new(services, Arc::clone(&self.codec)));

        self.transport.start().await?;

        let mut started = Vec::with_capacity(names.len());
        for name in names {
            let consumer = ServiceConsumer::new(
                name.as_str(),
                self.topics.request(&name),
                Arc::clone(&dispatcher),
                Arc::clone(&self.transport),
            );

            match consumer.start().await {
                Ok(binding) => started.push(binding),
                Err(err) => {
                    for binding in started {
                        binding.stop(&self.transport).await;
                    }
                    let _ = self.transport.stop().await;
                    return Err(err);
                }
            }
        }
        Ok(started)
    }

    /// Stop every service consumer, then disconnect. A second call is a no-op.
    pub async fn stop(&self) -> Result<()> {
        // ---
        let Some(started) = self.bindings.lock().await.take() else {
            return Ok(());
        };

        for binding in started {
            let _name = binding.service_name().to_string();
            binding.stop(&self.transport).await;
            log_info!("stopped serving {_name}");
        }

        let result = self.transport.stop().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}
