//! Request dispatch: encoded invocation in, encoded response out.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use super::service::{CallArgs, RpcService};
use crate::codec::CodecPtr;
use crate::log_debug;
use crate::protocol::Response;

/// Routes decoded invocations to registered services.
///
/// Holds an immutable snapshot of the service registry, so it is safe to
/// share across concurrently running requests. [`handle`](Self::handle)
/// never fails: every problem is reported as an error response.
pub struct RequestDispatcher {
    services: HashMap<String, Arc<dyn RpcService>>,
    codec: CodecPtr,
}

impl RequestDispatcher {
    // ---

    pub fn new(services: HashMap<String, Arc<dyn RpcService>>, codec: CodecPtr) -> Self {
        Self { services, codec }
    }

    pub fn content_type(&self) -> &str {
        self.codec.content_type()
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Run the request addressed to `service_name` and encode its outcome.
    pub async fn handle(&self, service_name: &str, request: &str) -> String {
        // ---
        let response = self.dispatch(service_name, request).await;
        self.encode(&response)
    }

    /// Encode an error response without dispatching anything.
    pub fn reject(&self, message: impl Into<String>) -> String {
        self.encode(&Response::failure(message))
    }

    fn encode(&self, response: &Response) -> String {
        // ---
        match self.codec.encode_response(response) {
            Ok(encoded) => encoded,
            Err(err) => {
                // the result itself could not be encoded; report that instead
                json!({
                    "result": null,
                    "error": format!("failed to encode response: {err}"),
                })
                .to_string()
            }
        }
    }

    async fn dispatch(&self, service_name: &str, request: &str) -> Response {
        // ---
        let invocation = match self.codec.decode_invocation(request) {
            Ok(invocation) => invocation,
            Err(err) => return Response::failure(format!("invalid request: {err}")),
        };

        let Some(service) = self.services.get(service_name).cloned() else {
            return Response::failure(format!("service not found: {service_name}"));
        };

        let method = invocation.method_name().to_string();
        if method.is_empty() {
            return Response::failure("missing method name");
        }

        log_debug!(
            "dispatching {service_name}.{method} ({})",
            invocation.correlation_id()
        );

        let (args, kwargs) = invocation.into_args();

        // Own task, so a panicking method surfaces as a JoinError.
        let call = tokio::spawn(async move {
            service.call(&method, CallArgs::new(args, kwargs)).await
        });

        match call.await {
            Ok(Ok(value)) => Response::success(value),
            Ok(Err(err)) => Response::failure(err.to_string()),
            Err(join_err) if join_err.is_panic() => {
                Response::failure(panic_message(join_err.into_panic()))
            }
            Err(_cancelled) => Response::failure("method call was cancelled"),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    // ---
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("method panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("method panicked: {msg}")
    } else {
        "method panicked".to_string()
    }
}
