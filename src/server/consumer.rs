//! Per-service request consumer.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::dispatcher::RequestDispatcher;
use crate::transport::{run, TransportConsumer};
use crate::{
    // ---
    log_debug,
    log_error,
    log_warn,
    Address,
    Envelope,
    Result,
    Subscription,
    TransportPtr,
};

/// Receives requests for one service and publishes the replies.
///
/// Each request is dispatched on its own task, so a slow method does not
/// hold up the requests queued behind it.
pub(crate) struct ServiceConsumer {
    // ---
    service_name: String,
    topic: Address,
    dispatcher: Arc<RequestDispatcher>,
    transport: TransportPtr,
}

/// A consumer that is subscribed and running.
pub(crate) struct ServiceBinding {
    service_name: String,
    subscription: Subscription,
    receive_loop: JoinHandle<()>,
}

impl ServiceConsumer {
    // ---

    pub(crate) fn new(
        service_name: impl Into<String>,
        topic: Address,
        dispatcher: Arc<RequestDispatcher>,
        transport: TransportPtr,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            topic,
            dispatcher,
            transport,
        }
    }

    /// Subscribe to the service's request topic and begin serving.
    pub(crate) async fn start(self) -> Result<ServiceBinding> {
        // ---
        let service_name = self.service_name.clone();
        let subscription = self.subscription();
        let transport = Arc::clone(&self.transport);

        let receive_loop = run(transport, self).await?;
        log_debug!("serving {service_name} on {:?}", subscription.0);

        Ok(ServiceBinding {
            service_name,
            subscription,
            receive_loop,
        })
    }
}

impl ServiceBinding {
    pub(crate) fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Stop receiving and drop the subscription.
    pub(crate) async fn stop(self, transport: &TransportPtr) {
        // ---
        self.receive_loop.abort();
        if let Err(_err) = transport.unsubscribe(&self.subscription).await {
            log_debug!("unsubscribe {} failed: {_err}", self.service_name);
        }
    }
}

#[async_trait::async_trait]
impl TransportConsumer for ServiceConsumer {
    // ---
    fn subscription(&self) -> Subscription {
        Subscription::from(self.topic.clone())
    }

    async fn handle_envelope(&self, env: Envelope) -> Result<()> {
        // ---
        let Some(reply_to) = env.reply_address() else {
            log_debug!("{}: ignoring envelope {} without reply_to", self.service_name, env.id);
            return Ok(());
        };
        let request = env.body().map(str::to_string);
        let correlation_id = env.correlation_id;

        let service_name = self.service_name.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let transport = Arc::clone(&self.transport);

        tokio::spawn(async move {
            // ---
            let body = match request {
                Ok(request) => dispatcher.handle(&service_name, &request).await,
                Err(err) => {
                    log_warn!("{service_name}: rejecting request {correlation_id}: {err}");
                    dispatcher.reject(format!("invalid request: {err}"))
                }
            };
            let reply = Envelope::reply(body, correlation_id)
                .with_metadata("content_type", dispatcher.content_type());

            if let Err(_err) = transport.publish(&reply_to, reply).await {
                log_error!("{service_name}: failed to publish reply to {reply_to}: {_err}");
            }
        });

        Ok(())
    }
}
