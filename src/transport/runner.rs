//! Transport execution runner.
//!
//! Glue between a [`Transport`](crate::Transport) and a message-driven role
//! such as the server's per-service consumer or the client's reply bridge.
//!
//! The runner:
//! - subscribes using the consumer-provided [`Subscription`]
//! - spawns a receive loop over the subscription inbox
//! - hands each [`Envelope`] to [`TransportConsumer::handle_envelope`]
//!
//! It does not define RPC semantics or impose retry, timeout, or durability
//! policies.
//!
//! ## Receive loop
//!
//! The loop runs on its own task and yields while waiting, so the consumer
//! callback always executes on a different context than the publisher. When
//! the topic is unsubscribed or the transport stops, the inbox closes and the
//! loop exits.
//!
//! ## Error handling
//!
//! Errors returned by the consumer are logged and do not terminate the loop.
//! A single bad message must not bring down the consumer.

use tokio::task::JoinHandle;

use crate::{
    // ---
    log_debug,
    log_warn,
    Envelope,
    Result,
    Subscription,
    TransportPtr,
};

/// A consumer of transport-delivered envelopes.
///
/// Implementations should assume envelopes may arrive out of order and, on
/// at-least-once transports, more than once.
#[async_trait::async_trait]
pub trait TransportConsumer: Send + Sync {
    /// The topic this consumer receives from.
    fn subscription(&self) -> Subscription;

    /// Handle a single incoming envelope.
    ///
    /// Returning an error does not stop the receive loop.
    async fn handle_envelope(&self, env: Envelope) -> Result<()>;
}

/// Subscribe `consumer` and start its receive loop.
///
/// Returns once the subscription is in place, so envelopes published after
/// this call returns are delivered. Aborting the returned handle stops the
/// loop without unsubscribing.
pub async fn run<T>(transport: TransportPtr, consumer: T) -> Result<JoinHandle<()>>
where
    T: TransportConsumer + 'static,
{
    // ---
    let mut handle = transport.subscribe(consumer.subscription()).await?;

    let join = tokio::spawn(async move {
        // ---
        while let Some(env) = handle.inbox.recv().await {
            if let Err(_err) = consumer.handle_envelope(env).await {
                log_warn!("consumer on {:?} failed: {_err}", handle.subscription.0);
            }
        }
        log_debug!("inbox for {:?} closed", handle.subscription.0);
    });

    Ok(join)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{create_memory_transport_with_hub, Address, CorrelationId, MemoryHub, RpcError};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    struct Recorder {
        topic: &'static str,
        seen: mpsc::UnboundedSender<String>,
    }

    #[async_trait::async_trait]
    impl TransportConsumer for Recorder {
        fn subscription(&self) -> Subscription {
            Subscription::from(self.topic)
        }

        async fn handle_envelope(&self, env: Envelope) -> Result<()> {
            let body = env.body()?.to_string();
            if body == "bad" {
                return Err(RpcError::Transport("rejected".into()));
            }
            let _ = self.seen.send(body);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_consumer_error_does_not_stop_loop() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_memory_transport_with_hub("runner", hub.clone());
        transport.start().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = Recorder {
            topic: "efrpc/request/Echo",
            seen: tx,
        };
        let join = run(Arc::clone(&transport), consumer).await.unwrap();

        let topic = Address::from("efrpc/request/Echo");
        for body in ["first", "bad", "second"] {
            let env = Envelope::reply(body, CorrelationId::generate());
            transport.publish(&topic, env).await.unwrap();
        }

        let first = timeout(Duration::from_millis(200), rx.recv()).await.unwrap();
        let second = timeout(Duration::from_millis(200), rx.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some("first"));
        assert_eq!(second.as_deref(), Some("second"));

        // stopping the transport closes the inbox and ends the loop
        transport.stop().await.unwrap();
        timeout(Duration::from_millis(200), join)
            .await
            .expect("loop did not exit")
            .unwrap();
    }
}
