//! Services the server exposes, and how their methods are called.
//!
//! A service is anything implementing [`RpcService`]: it receives a method
//! name plus the call's arguments and returns a JSON value. Hand-written
//! implementations match on the method name; [`ServiceBuilder`] assembles a
//! service from named async closures.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure of a single method call, reported back to the caller as the
/// response's error message.
#[derive(Debug, Error)]
pub enum MethodError {
    #[error("method not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

impl MethodError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        MethodError::Failed(message.to_string())
    }
}

impl From<serde_json::Error> for MethodError {
    fn from(err: serde_json::Error) -> Self {
        MethodError::Failed(format!("invalid arguments: {err}"))
    }
}

/// Arguments of one call as they arrived on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    // ---

    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Decode all positional arguments at once, usually into a tuple.
    ///
    /// ```
    /// # use ef_rpc::CallArgs;
    /// # use serde_json::{json, Map};
    /// let args = CallArgs::new(vec![json!(10), json!(20)], Map::new());
    /// let (a, b): (i64, i64) = args.positional().unwrap();
    /// assert_eq!(a + b, 30);
    /// ```
    pub fn positional<T: DeserializeOwned>(&self) -> Result<T, MethodError> {
        Ok(serde_json::from_value(Value::Array(self.args.clone()))?)
    }

    /// Decode the positional argument at `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, MethodError> {
        // ---
        let value = self
            .args
            .get(index)
            .ok_or_else(|| MethodError::Failed(format!("missing argument {index}")))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Decode the keyword argument `name`, if it was passed.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, MethodError> {
        match self.kwargs.get(name) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }
}

/// A service whose methods can be called remotely.
#[async_trait::async_trait]
pub trait RpcService: Send + Sync {
    /// Name used when the service is registered without an explicit one.
    ///
    /// Defaults to the implementing type's name without its module path.
    fn default_name(&self) -> String {
        short_type_name(std::any::type_name::<Self>()).to_string()
    }

    /// Run `method` with `args`.
    ///
    /// Unknown methods return [`MethodError::NotFound`].
    async fn call(&self, method: &str, args: CallArgs) -> Result<Value, MethodError>;
}

fn short_type_name(full: &str) -> &str {
    // ---
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// Type-erased method body
trait MethodFn: Send + Sync {
    fn call(&self, args: CallArgs) -> BoxFuture<'static, Result<Value, MethodError>>;
}

struct Method<F, Fut, R> {
    func: F,
    _phantom: PhantomData<fn() -> (Fut, R)>,
}

impl<F, Fut, R> MethodFn for Method<F, Fut, R>
where
    F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
    R: Serialize + Send + 'static,
{
    fn call(&self, args: CallArgs) -> BoxFuture<'static, Result<Value, MethodError>> {
        // ---
        let fut = (self.func)(args);

        Box::pin(async move {
            let result = fut.await?;
            serde_json::to_value(result)
                .map_err(|err| MethodError::Failed(format!("failed to encode result: {err}")))
        })
    }
}

/// Builds an [`RpcService`] from named async closures.
///
/// ```
/// use ef_rpc::{CallArgs, MethodError, ServiceBuilder};
///
/// let calculator = ServiceBuilder::new("Calculator")
///     .method("add", |args: CallArgs| async move {
///         let (a, b): (i64, i64) = args.positional()?;
///         Ok(a + b)
///     })
///     .method("divide", |args: CallArgs| async move {
///         let (a, b): (f64, f64) = args.positional()?;
///         if b == 0.0 {
///             return Err(MethodError::failed("division by zero"));
///         }
///         Ok(a / b)
///     })
///     .build();
/// ```
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, Arc<dyn MethodFn>>,
}

impl ServiceBuilder {
    // ---

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Register `handler` as method `name`, replacing any earlier one.
    pub fn method<F, Fut, R>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, MethodError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.methods.insert(
            name.to_string(),
            Arc::new(Method {
                func: handler,
                _phantom: PhantomData,
            }),
        );
        self
    }

    pub fn build(self) -> FnService {
        FnService {
            name: self.name,
            methods: self.methods,
        }
    }
}

/// Service assembled by [`ServiceBuilder`].
pub struct FnService {
    name: String,
    methods: HashMap<String, Arc<dyn MethodFn>>,
}

impl FnService {
    /// Registered method names, unordered.
    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }
}

#[async_trait::async_trait]
impl RpcService for FnService {
    // ---
    fn default_name(&self) -> String {
        self.name.clone()
    }

    async fn call(&self, method: &str, args: CallArgs) -> Result<Value, MethodError> {
        // ---
        let handler = self
            .methods
            .get(method)
            .cloned()
            .ok_or_else(|| MethodError::NotFound(method.to_string()))?;

        handler.call(args).await
    }
}
