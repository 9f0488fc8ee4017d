//! Correlation registry: outstanding calls keyed by correlation id.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, watch};

use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    CorrelationId,
    Result,
    RpcError,
};

/// Outcome delivered to a waiting call: the encoded response body, or the
/// reason the call will never get one.
type Outcome = Result<String>;

struct PendingSlot {
    #[cfg_attr(not(feature = "logging"), allow(dead_code))]
    created_at: Instant,
    tx: oneshot::Sender<Outcome>,
}

/// Receiving half of a registered slot. Pass it to
/// [`CorrelationRegistry::wait`].
#[derive(Debug)]
pub struct PendingReply {
    correlation_id: CorrelationId,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingReply {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}

/// Tracks calls waiting for their reply.
///
/// Each slot completes at most once. Completion removes the slot from the map
/// under the lock and then sends on a oneshot channel, so the delivery side
/// never blocks and a second reply for the same id finds nothing to resolve.
///
/// [`cancel_all`](Self::cancel_all) also closes the registry: until
/// [`reopen`](Self::reopen), `register` fails with [`RpcError::Cancelled`].
///
/// The lock is a `std::sync::Mutex`; it is never held across an `.await`.
pub struct CorrelationRegistry {
    slots: Mutex<HashMap<CorrelationId, PendingSlot>>,
    closed: watch::Sender<bool>,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            slots: Mutex::default(),
            closed,
        }
    }
}

impl CorrelationRegistry {
    // ---

    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a slot for `correlation_id`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Cancelled`] while the registry is closed.
    /// - [`RpcError::DuplicateCorrelationId`] if the id is already pending.
    pub fn register(&self, correlation_id: CorrelationId) -> Result<PendingReply> {
        // ---
        let mut slots = lock_ignore_poison(&self.slots);
        if *self.closed.borrow() {
            return Err(RpcError::Cancelled);
        }
        if slots.contains_key(&correlation_id) {
            return Err(RpcError::DuplicateCorrelationId(correlation_id.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        slots.insert(
            correlation_id.clone(),
            PendingSlot {
                created_at: Instant::now(),
                tx,
            },
        );

        Ok(PendingReply { correlation_id, rx })
    }

    /// Complete the slot for `correlation_id` with a response body.
    ///
    /// Returns `false` when no such slot is pending (late, duplicate or
    /// unknown reply); the body is discarded.
    pub fn resolve(&self, correlation_id: &CorrelationId, body: String) -> bool {
        self.complete(correlation_id, Ok(body))
    }

    /// Complete the slot for `correlation_id` with an error.
    pub fn fail(&self, correlation_id: &CorrelationId, err: RpcError) -> bool {
        self.complete(correlation_id, Err(err))
    }

    fn complete(&self, correlation_id: &CorrelationId, outcome: Outcome) -> bool {
        // ---
        let slot = lock_ignore_poison(&self.slots).remove(correlation_id);

        match slot {
            Some(slot) => {
                log_debug!(
                    "completing {correlation_id} after {:?}",
                    slot.created_at.elapsed()
                );
                // receiver gone means the caller stopped waiting
                slot.tx.send(outcome).is_ok()
            }
            None => {
                log_debug!("no pending call for {correlation_id}, reply discarded");
                false
            }
        }
    }

    /// Wait for the slot to complete, for at most `timeout`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] when the window expires; the slot is removed.
    /// - Whatever error the slot was failed with, e.g. [`RpcError::Cancelled`].
    pub async fn wait(&self, reply: PendingReply, timeout: Duration) -> Result<String> {
        // ---
        let PendingReply { correlation_id, rx } = reply;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => {
                // slot dropped without completion (removed by `remove`)
                Err(RpcError::Cancelled)
            }
            Err(_elapsed) => {
                self.remove(&correlation_id);
                Err(RpcError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Drop the slot without completing it.
    pub fn remove(&self, correlation_id: &CorrelationId) -> bool {
        lock_ignore_poison(&self.slots)
            .remove(correlation_id)
            .is_some()
    }

    /// Close the registry and fail every pending slot with
    /// [`RpcError::Cancelled`].
    ///
    /// Returns the number of slots cancelled.
    pub fn cancel_all(&self) -> usize {
        // ---
        let drained: Vec<PendingSlot> = {
            let mut slots = lock_ignore_poison(&self.slots);
            // under the lock, so no register can slip in between
            self.closed.send_replace(true);
            slots.drain().map(|(_, slot)| slot).collect()
        };

        let count = drained.len();
        for slot in drained {
            let _ = slot.tx.send(Err(RpcError::Cancelled));
        }
        count
    }

    /// Accept registrations again after [`cancel_all`](Self::cancel_all).
    pub fn reopen(&self) {
        self.closed.send_replace(false);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that flips to `true` when the registry closes.
    pub(crate) fn watch_closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_register_and_resolve() {
        // ---
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::generate();

        let reply = registry.register(id.clone()).unwrap();
        assert_eq!(registry.len(), 1);

        assert!(registry.resolve(&id, "body".into()));
        assert!(registry.is_empty());

        let body = registry.wait(reply, Duration::from_secs(1)).await.unwrap();
        assert_eq!(body, "body");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        // ---
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::from("dup");

        let _reply = registry.register(id.clone()).unwrap();
        assert!(matches!(
            registry.register(id),
            Err(RpcError::DuplicateCorrelationId(ref s)) if s == "dup"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_resolution_are_noops() {
        // ---
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::generate();
        let other = CorrelationId::generate();
        let _keep = registry.register(other.clone()).unwrap();

        let reply = registry.register(id.clone()).unwrap();
        assert!(registry.resolve(&id, "first".into()));
        assert!(!registry.resolve(&id, "second".into()));
        assert!(!registry.resolve(&CorrelationId::generate(), "stray".into()));

        // only the completed slot is gone
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.wait(reply, Duration::from_secs(1)).await.unwrap(),
            "first"
        );
    }

    #[tokio::test]
    async fn test_timeout_removes_slot_and_late_reply_is_ignored() {
        // ---
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::generate();

        let reply = registry.register(id.clone()).unwrap();
        let result = registry.wait(reply, Duration::from_millis(20)).await;

        assert!(matches!(result, Err(RpcError::Timeout { timeout_ms: 20 })));
        assert!(registry.is_empty());
        assert!(!registry.resolve(&id, "late".into()));
    }

    #[tokio::test]
    async fn test_cancel_all_fails_every_waiter() {
        // ---
        let registry = Arc::new(CorrelationRegistry::new());

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let reply = registry.register(CorrelationId::generate()).unwrap();
            let registry = Arc::clone(&registry);
            waiters.push(tokio::spawn(async move {
                registry.wait(reply, Duration::from_secs(5)).await
            }));
        }

        assert_eq!(registry.cancel_all(), 3);
        assert!(registry.is_empty());

        for waiter in waiters {
            assert!(matches!(waiter.await.unwrap(), Err(RpcError::Cancelled)));
        }
    }

    #[tokio::test]
    async fn test_closed_registry_rejects_until_reopened() {
        // ---
        let registry = CorrelationRegistry::new();
        let mut closed = registry.watch_closed();

        assert_eq!(registry.cancel_all(), 0);
        assert!(registry.is_closed());
        assert!(*closed.borrow_and_update());
        assert!(matches!(
            registry.register(CorrelationId::generate()),
            Err(RpcError::Cancelled)
        ));
        assert!(registry.is_empty());

        registry.reopen();
        assert!(!registry.is_closed());
        let reply = registry.register(CorrelationId::generate()).unwrap();
        assert!(registry.resolve(&reply.correlation_id().clone(), "ok".into()));
        assert_eq!(registry.wait(reply, Duration::from_secs(1)).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_concurrent_resolution_routes_to_matching_waiter() {
        // ---
        let registry = Arc::new(CorrelationRegistry::new());

        let mut waiters = Vec::new();
        let mut ids = Vec::new();
        for i in 0..50 {
            let id = CorrelationId::generate();
            let reply = registry.register(id.clone()).unwrap();
            let registry = Arc::clone(&registry);
            ids.push((id, i));
            waiters.push(tokio::spawn(async move {
                (i, registry.wait(reply, Duration::from_secs(5)).await)
            }));
        }

        // resolve in reverse order from separate tasks
        for (id, i) in ids.into_iter().rev() {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry.resolve(&id, format!("reply-{i}"));
            });
        }

        for waiter in waiters {
            let (i, body) = waiter.await.unwrap();
            assert_eq!(body.unwrap(), format!("reply-{i}"));
        }
        assert!(registry.is_empty());
    }
}
