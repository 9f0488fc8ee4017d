//! Local stand-ins for remote services and their methods.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::producer::InvocationProducer;
use crate::{lock_ignore_poison, Result};

/// Convert Rust call arguments into the positional argument list.
///
/// Tuples and sequences are spread into separate arguments, `()` means no
/// arguments, and anything else is sent as a single argument. To pass one
/// list as a single argument, wrap it in a 1-tuple: `(vec![1, 2],)`.
fn positional<A: Serialize>(args: A) -> Result<Vec<Value>> {
    Ok(match serde_json::to_value(args)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

/// Callable bound to one method of one remote service.
pub struct MethodCaller {
    // ---
    service: String,
    method: String,
    producer: Arc<InvocationProducer>,
}

impl MethodCaller {
    // ---

    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn method_name(&self) -> &str {
        &self.method
    }

    /// Invoke with untyped arguments and get the untyped result.
    pub async fn invoke(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value> {
        self.producer
            .invoke(&self.service, &self.method, args, kwargs)
            .await
    }

    /// Invoke with positional arguments and decode the result.
    ///
    /// ```no_run
    /// # async fn demo(proxy: std::sync::Arc<ef_rpc::ServiceProxy>) -> ef_rpc::Result<()> {
    /// let sum: i64 = proxy.method("add").call((10, 20)).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<A, R>(&self, args: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_kwargs(args, Map::new()).await
    }

    /// Invoke with positional and keyword arguments and decode the result.
    pub async fn call_with_kwargs<A, R>(&self, args: A, kwargs: Map<String, Value>) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        // ---
        let value = self.invoke(positional(args)?, kwargs).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Client-side handle for a remote service.
///
/// Method callers are created on first use and cached by name, so
/// `proxy.method("add")` always returns the same `Arc`.
pub struct ServiceProxy {
    // ---
    name: String,
    producer: Arc<InvocationProducer>,
    methods: Mutex<HashMap<String, Arc<MethodCaller>>>,
}

impl ServiceProxy {
    // ---

    pub(crate) fn new(name: impl Into<String>, producer: Arc<InvocationProducer>) -> Self {
        Self {
            name: name.into(),
            producer,
            methods: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Callable for `method`.
    pub fn method(&self, method: &str) -> Arc<MethodCaller> {
        // ---
        let mut methods = lock_ignore_poison(&self.methods);
        let caller = methods.entry(method.to_string()).or_insert_with(|| {
            Arc::new(MethodCaller {
                service: self.name.clone(),
                method: method.to_string(),
                producer: Arc::clone(&self.producer),
            })
        });
        Arc::clone(caller)
    }

    /// Shorthand for `self.method(method).invoke(args, kwargs)`.
    pub async fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value> {
        self.method(method).invoke(args, kwargs).await
    }

    /// Shorthand for `self.method(method).call(args)`.
    pub async fn call<A, R>(&self, method: &str, args: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.method(method).call(args).await
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::client::pending::CorrelationRegistry;
    use crate::codec::JsonCodec;
    use crate::{create_memory_transport_with_hub, MemoryHub, RpcConfig};
    use serde_json::json;

    fn proxy(name: &str) -> ServiceProxy {
        // ---
        let transport = create_memory_transport_with_hub("proxy-test", MemoryHub::new());
        let producer = InvocationProducer::new(
            transport,
            Arc::new(JsonCodec::new()),
            Arc::new(RpcConfig::default()),
            Arc::new(CorrelationRegistry::new()),
        );
        ServiceProxy::new(name, Arc::new(producer))
    }

    #[test]
    fn test_method_callers_are_cached() {
        // ---
        let proxy = proxy("Calculator");
        let first = proxy.method("add");
        let second = proxy.method("add");
        let other = proxy.method("subtract");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(first.service_name(), "Calculator");
        assert_eq!(other.method_name(), "subtract");
    }

    #[test]
    fn test_positional_argument_shapes() {
        // ---
        assert_eq!(positional((10, 20)).unwrap(), vec![json!(10), json!(20)]);
        assert_eq!(positional(()).unwrap(), Vec::<Value>::new());
        assert_eq!(positional("solo").unwrap(), vec![json!("solo")]);
        assert_eq!(
            positional((vec![1, 2],)).unwrap(),
            vec![json!([1, 2])]
        );
    }
}
