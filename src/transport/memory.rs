//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, local execution,
//! and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - Topics match subscriptions by exact string equality. No wildcards.
//! - Once `subscribe()` returns successfully, messages published *after* that
//!   point to the topic are deliverable.
//! - Every live subscriber of a topic receives its own copy (fan-out).
//! - `unsubscribe()` and `stop()` only remove the calling transport's own
//!   subscriptions; other transports on the same hub are unaffected.
//!
//! ## Non-Goals
//!
//! This transport does not attempt to emulate the failure modes, persistence,
//! or delivery guarantees of any specific broker. [`MemoryHub::set_online`]
//! is the one failure knob: it simulates the bus becoming unreachable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, RwLock};

use crate::{
    // ---
    log_debug,
    log_info,
    Address,
    Envelope,
    Result,
    RpcError,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};

const INBOX_CAPACITY: usize = 64;

struct Subscriber {
    owner: u64,
    tx: mpsc::Sender<Envelope>,
}

/// Shared message bus for the in-memory transport.
///
/// Simulates a message broker within a single process. All transports that
/// share a `MemoryHub` can publish and receive each other's messages, exactly
/// as nodes connected to a real broker would.
///
/// Tests that run in parallel should each construct their own hub and pass it
/// to [`create_memory_transport_with_hub`]:
///
/// ```
/// # use ef_rpc::MemoryHub;
/// let hub = MemoryHub::new();
///
/// let server_transport = ef_rpc::create_memory_transport_with_hub("server", hub.clone());
/// let client_transport = ef_rpc::create_memory_transport_with_hub("client", hub.clone());
/// ```
pub struct MemoryHub {
    // ---
    subscriptions: RwLock<HashMap<Subscription, Vec<Subscriber>>>,
    next_owner: AtomicU64,
    online: AtomicBool,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate the bus becoming reachable or unreachable.
    ///
    /// While offline, `start()` and `publish()` on every attached transport
    /// fail with [`RpcError::Connection`]. Existing subscriptions are kept.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of live subscribers for a topic.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let subs = self.subscriptions.read().await;
        subs.get(&Subscription::from(topic)).map_or(0, Vec::len)
    }

    fn allocate_owner(&self) -> u64 {
        self.next_owner.fetch_add(1, Ordering::Relaxed)
    }

    async fn publish(&self, _transport_id: &str, topic: &Address, env: Envelope) -> Result<()> {
        // ---
        // Snapshot senders so the lock is not held while delivering.
        let senders: Vec<mpsc::Sender<Envelope>> = {
            let subs = self.subscriptions.read().await;
            match subs.get(&Subscription::from(topic.clone())) {
                Some(list) => list.iter().map(|s| s.tx.clone()).collect(),
                None => Vec::new(),
            }
        };

        log_debug!(
            "{_transport_id}: publish to {topic} ({} subscribers)",
            senders.len()
        );

        for sender in senders {
            // A closed channel means the subscriber went away between the
            // snapshot and the send; nothing to deliver to.
            if let Err(_err) = sender.send(env.clone()).await {
                log_info!("{_transport_id}: dropped delivery on {topic}: {_err}");
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        _transport_id: &str,
        owner: u64,
        sub: Subscription,
    ) -> SubscriptionHandle {
        // ---
        log_debug!("{_transport_id}: subscribe to {:?}", sub.0);

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);

        let mut subs = self.subscriptions.write().await;
        subs.entry(sub.clone())
            .or_default()
            .push(Subscriber { owner, tx });

        SubscriptionHandle {
            subscription: sub,
            inbox: rx,
        }
    }

    async fn unsubscribe(&self, _transport_id: &str, owner: u64, sub: &Subscription) {
        // ---
        let mut subs = self.subscriptions.write().await;
        if let Some(list) = subs.get_mut(sub) {
            list.retain(|s| s.owner != owner);
            if list.is_empty() {
                subs.remove(sub);
            }
            log_debug!("{_transport_id}: unsubscribed from {:?}", sub.0);
        }
    }

    async fn remove_owner(&self, _transport_id: &str, owner: u64) {
        // ---
        let mut subs = self.subscriptions.write().await;
        for list in subs.values_mut() {
            list.retain(|s| s.owner != owner);
        }
        subs.retain(|_, list| !list.is_empty());
        log_debug!("{_transport_id}: removed all subscriptions");
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_owner: AtomicU64::new(1),
            online: AtomicBool::new(true),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes messages through a shared [`MemoryHub`]. Tracks its own connection
/// state so the lifecycle contract (idempotent start/stop, no traffic while
/// disconnected) behaves like a broker-backed transport.
struct MemoryTransport {
    // ---
    transport_id: String,
    owner: u64,
    hub: Arc<MemoryHub>,
    connected: AtomicBool,
}

impl MemoryTransport {
    fn ensure_connected(&self, action: &str) -> Result<()> {
        // ---
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RpcError::Connection(format!(
                "{}: cannot {action} while disconnected",
                self.transport_id
            )));
        }
        if !self.hub.is_online() {
            return Err(RpcError::Connection(format!(
                "{}: bus unreachable",
                self.transport_id
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    async fn start(&self) -> Result<()> {
        // ---
        if self.connected.load(Ordering::SeqCst) {
            log_debug!("{}: already connected", self.transport_id);
            return Ok(());
        }
        if !self.hub.is_online() {
            return Err(RpcError::Connection(format!(
                "{}: bus unreachable",
                self.transport_id
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        log_info!("{}: connected to memory hub", self.transport_id);
        Ok(())
    }

    /// Disconnect and remove every subscription this transport made.
    async fn stop(&self) -> Result<()> {
        // ---
        if !self.connected.swap(false, Ordering::SeqCst) {
            log_debug!("{}: not connected, nothing to stop", self.transport_id);
            return Ok(());
        }
        self.hub.remove_owner(&self.transport_id, self.owner).await;
        log_info!("{}: disconnected from memory hub", self.transport_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.hub.is_online()
    }

    async fn publish(&self, topic: &Address, env: Envelope) -> Result<()> {
        self.ensure_connected("publish")?;
        self.hub.publish(&self.transport_id, topic, env).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        self.ensure_connected("subscribe")?;
        Ok(self.hub.subscribe(&self.transport_id, self.owner, sub).await)
    }

    async fn unsubscribe(&self, sub: &Subscription) -> Result<()> {
        self.ensure_connected("unsubscribe")?;
        self.hub.unsubscribe(&self.transport_id, self.owner, sub).await;
        Ok(())
    }
}

/// Create a new in-memory transport on the process-global hub.
///
/// All transports created with this function share a single message bus.
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
pub fn create_memory_transport(transport_id: impl Into<String>) -> TransportPtr {
    create_memory_transport_with_hub(transport_id, global_hub())
}

/// Create a new in-memory transport attached to the provided hub.
pub fn create_memory_transport_with_hub(
    transport_id: impl Into<String>,
    hub: Arc<MemoryHub>,
) -> TransportPtr {
    // ---
    let transport_id = transport_id.into();
    log_debug!("{transport_id}: create memory transport");

    Arc::new(MemoryTransport {
        transport_id,
        owner: hub.allocate_owner(),
        hub,
        connected: AtomicBool::new(false),
    })
}
