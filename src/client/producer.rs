//! Turns one logical call into request/reply exchanges on the bus.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use super::pending::{CorrelationRegistry, PendingReply};
use crate::codec::CodecPtr;
use crate::protocol::{Invocation, Topics};
use crate::retry::retry_with_delay;
use crate::transport::{run, TransportConsumer};
use crate::{
    // ---
    log_debug,
    Address,
    Envelope,
    Result,
    RpcConfig,
    Subscription,
    TransportPtr,
};

/// Feeds replies arriving on one call's reply topic into the registry.
struct ReplyForwarder {
    topic: Address,
    registry: Arc<CorrelationRegistry>,
}

#[async_trait::async_trait]
impl TransportConsumer for ReplyForwarder {
    fn subscription(&self) -> Subscription {
        Subscription::from(self.topic.clone())
    }

    async fn handle_envelope(&self, env: Envelope) -> Result<()> {
        // ---
        let body = match env.body() {
            Ok(body) => body,
            Err(err) => {
                // fail the caller now instead of letting it time out
                self.registry.fail(&env.correlation_id, err);
                return Ok(());
            }
        };
        if !self.registry.resolve(&env.correlation_id, body.to_string()) {
            log_debug!("late or duplicate reply {} on {}", env.correlation_id, self.topic);
        }
        Ok(())
    }
}

/// Reply-topic subscription for one attempt, torn down on every exit path.
struct ReplyRoute {
    topic: Address,
    forwarder: JoinHandle<()>,
}

/// Sends invocations and waits for their responses, retrying per the config.
///
/// Every attempt is a fresh exchange: new invocation record, new correlation
/// id, new reply topic.
pub struct InvocationProducer {
    // ---
    transport: TransportPtr,
    codec: CodecPtr,
    config: Arc<RpcConfig>,
    registry: Arc<CorrelationRegistry>,
    topics: Topics,
}

impl InvocationProducer {
    // ---

    pub fn new(
        transport: TransportPtr,
        codec: CodecPtr,
        config: Arc<RpcConfig>,
        registry: Arc<CorrelationRegistry>,
    ) -> Self {
        let topics = Topics::new(config.namespace.as_str());
        Self {
            transport,
            codec,
            config,
            registry,
            topics,
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Call `service.method(args, kwargs)` and return its result.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Invocation`](crate::RpcError::Invocation) once the retry
    ///   budget is spent; its source is the last failure
    ///   ([`Timeout`](crate::RpcError::Timeout),
    ///   [`Remote`](crate::RpcError::Remote), a connection error, ...).
    /// - [`RpcError::Cancelled`](crate::RpcError::Cancelled), unwrapped, if
    ///   the registry was closed while the call was waiting for a reply or
    ///   between attempts.
    pub async fn invoke(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value> {
        // ---
        retry_with_delay(&self.config, self.registry.watch_closed(), || {
            self.attempt(service, method, args.clone(), kwargs.clone())
        })
        .await
    }

    async fn attempt(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value> {
        // ---
        let invocation = Invocation::new(service, method, args, kwargs, self.config.version.as_str());
        let correlation_id = invocation.correlation_id().clone();
        let body = self.codec.encode_invocation(&invocation)?;

        let route = self.open_reply_route(self.topics.reply(&correlation_id)).await?;

        let outcome = match self.registry.register(correlation_id.clone()) {
            Ok(pending) => self.exchange(service, body, &route.topic, pending).await,
            Err(err) => Err(err),
        };

        self.close_reply_route(route).await;

        let response = self.codec.decode_response(&outcome?)?;
        response.into_result()
    }

    async fn open_reply_route(&self, topic: Address) -> Result<ReplyRoute> {
        // ---
        let forwarder = ReplyForwarder {
            topic: topic.clone(),
            registry: Arc::clone(&self.registry),
        };
        let forwarder = run(Arc::clone(&self.transport), forwarder).await?;
        Ok(ReplyRoute { topic, forwarder })
    }

    async fn close_reply_route(&self, route: ReplyRoute) {
        // ---
        route.forwarder.abort();
        let sub = Subscription::from(route.topic);
        if let Err(_err) = self.transport.unsubscribe(&sub).await {
            log_debug!("unsubscribe from {:?} failed: {_err}", sub.0);
        }
    }

    /// Publish the request and wait for its reply body.
    async fn exchange(
        &self,
        service: &str,
        body: String,
        reply_topic: &Address,
        pending: PendingReply,
    ) -> Result<String> {
        // ---
        let correlation_id = pending.correlation_id().clone();
        let env = Envelope::request(body, correlation_id.clone(), reply_topic)
            .with_metadata("content_type", self.codec.content_type())
            .with_metadata("version", self.config.version.as_str());

        let request_topic = self.topics.request(service);
        log_debug!("publishing {correlation_id} to {request_topic}");

        if let Err(err) = self.transport.publish(&request_topic, env).await {
            self.registry.remove(&correlation_id);
            return Err(err);
        }

        self.registry.wait(pending, self.config.timeout).await
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::codec::{Codec, JsonCodec};
    use crate::protocol::Response;
    use crate::{create_memory_transport_with_hub, MemoryHub, RpcError};
    use serde_json::json;
    use std::time::Duration;

    fn producer(transport: TransportPtr, config: RpcConfig) -> InvocationProducer {
        InvocationProducer::new(
            transport,
            Arc::new(JsonCodec::new()),
            Arc::new(config),
            Arc::new(CorrelationRegistry::new()),
        )
    }

    /// Answers every request on `topic` with `respond(invocation)`.
    async fn fake_server<F>(hub: Arc<MemoryHub>, topic: &str, respond: F)
    where
        F: Fn(&Invocation) -> Response + Send + 'static,
    {
        // ---
        let transport = create_memory_transport_with_hub("fake-server", hub);
        transport.start().await.unwrap();
        let mut handle = transport.subscribe(Subscription::from(topic)).await.unwrap();

        tokio::spawn(async move {
            let codec = JsonCodec::new();
            while let Some(env) = handle.inbox.recv().await {
                let invocation = codec.decode_invocation(env.body().unwrap()).unwrap();
                let body = codec.encode_response(&respond(&invocation)).unwrap();
                let reply = Envelope::reply(body, env.correlation_id.clone());
                transport
                    .publish(&env.reply_address().unwrap(), reply)
                    .await
                    .unwrap();
            }
        });
    }

    #[tokio::test]
    async fn test_invoke_round_trip_cleans_up() {
        // ---
        let hub = MemoryHub::new();
        fake_server(hub.clone(), "efrpc/request/Calc", |inv| {
            let a = inv.arguments()[0].as_i64().unwrap();
            let b = inv.arguments()[1].as_i64().unwrap();
            Response::success(json!(a + b))
        })
        .await;

        let transport = create_memory_transport_with_hub("client", hub.clone());
        transport.start().await.unwrap();
        let producer = producer(transport, RpcConfig::default());

        let value = producer
            .invoke("Calc", "add", vec![json!(10), json!(20)], Map::new())
            .await
            .unwrap();
        assert_eq!(value, json!(30));
        assert!(producer.registry.is_empty());
    }

    #[tokio::test]
    async fn test_remote_error_is_wrapped_after_retries() {
        // ---
        let hub = MemoryHub::new();
        fake_server(hub.clone(), "efrpc/request/Calc", |_| {
            Response::failure("boom")
        })
        .await;

        let transport = create_memory_transport_with_hub("client", hub);
        transport.start().await.unwrap();
        let config = RpcConfig::default()
            .with_retry_count(1)
            .with_retry_delay(Duration::from_millis(5));
        let producer = producer(transport, config);

        let err = producer
            .invoke("Calc", "explode", vec![], Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err.cause(), Some(RpcError::Remote(msg)) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_malformed_reply_fails_the_call() {
        // ---
        let hub = MemoryHub::new();
        let server = create_memory_transport_with_hub("bad-server", hub.clone());
        server.start().await.unwrap();
        let mut handle = server
            .subscribe(Subscription::from("efrpc/request/Calc"))
            .await
            .unwrap();

        tokio::spawn(async move {
            while let Some(env) = handle.inbox.recv().await {
                let mut reply = Envelope::reply("", env.correlation_id.clone());
                reply.payload.clear();
                server
                    .publish(&env.reply_address().unwrap(), reply)
                    .await
                    .unwrap();
            }
        });

        let transport = create_memory_transport_with_hub("client", hub);
        transport.start().await.unwrap();
        let config = RpcConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_retry_count(0);
        let producer = producer(transport, config);

        let started = std::time::Instant::now();
        let err = producer
            .invoke("Calc", "add", vec![], Map::new())
            .await
            .unwrap_err();

        assert!(matches!(err.cause(), Some(RpcError::Serialization(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(producer.registry.is_empty());
    }

    #[tokio::test]
    async fn test_no_server_times_out_and_leaves_no_slot() {
        // ---
        let hub = MemoryHub::new();
        let transport = create_memory_transport_with_hub("client", hub.clone());
        transport.start().await.unwrap();
        let config = RpcConfig::default()
            .with_timeout(Duration::from_millis(30))
            .with_retry_count(0);
        let producer = producer(transport, config);

        let err = producer
            .invoke("Nobody", "ping", vec![], Map::new())
            .await
            .unwrap_err();

        assert!(matches!(err.cause(), Some(RpcError::Timeout { timeout_ms: 30 })));
        assert!(producer.registry.is_empty());
    }
}
