use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CorrelationId, Result, RpcError};

fn default_version() -> String {
    "1.0".to_string()
}

/// One call attempt: which method, with which arguments, under which id.
///
/// Immutable once built. A retried call builds a new record (and therefore a
/// new correlation id) instead of reusing the previous one.
///
/// Wire form (JSON codec):
///
/// ```text
/// {"service_name":"Calculator","method_name":"add","arguments":[10,20],
///  "kwargs":{},"request_id":"<uuid>","version":"1.0"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    // ---
    #[serde(default)]
    service_name: String,
    #[serde(default)]
    method_name: String,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    kwargs: Map<String, Value>,
    request_id: CorrelationId,
    #[serde(default = "default_version")]
    version: String,
}

impl Invocation {
    /// Build a record with a freshly generated correlation id.
    pub fn new(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        arguments: Vec<Value>,
        kwargs: Map<String, Value>,
        version: impl Into<String>,
    ) -> Self {
        // ---
        Self {
            service_name: service_name.into(),
            method_name: method_name.into(),
            arguments,
            kwargs,
            request_id: CorrelationId::generate(),
            version: version.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.request_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Split into positional and named arguments, consuming the record.
    pub fn into_args(self) -> (Vec<Value>, Map<String, Value>) {
        (self.arguments, self.kwargs)
    }
}

/// Outcome of one remote call: a result or an error message.
///
/// `result: null` with no error is a successful call returning nothing.
/// An empty error string counts as no error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    pub fn success(result: Value) -> Self {
        // ---
        // null and absent are the same thing on the wire
        let result = match result {
            Value::Null => None,
            other => Some(other),
        };
        Self {
            result,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }

    /// The error message, if the response carries a non-empty one.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|msg| !msg.is_empty())
    }

    pub fn is_error(&self) -> bool {
        self.error_message().is_some()
    }

    /// Convert into the caller-facing outcome.
    ///
    /// A response carrying both a result and an error is treated as an
    /// error; the result is not returned.
    pub fn into_result(self) -> Result<Value> {
        // ---
        if let Some(message) = self.error.filter(|msg| !msg.is_empty()) {
            return Err(RpcError::Remote(message));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_each_invocation_gets_new_id() {
        // ---
        let a = Invocation::new("Calc", "add", vec![json!(1)], Map::new(), "1.0");
        let b = Invocation::new("Calc", "add", vec![json!(1)], Map::new(), "1.0");
        assert_ne!(a.correlation_id(), b.correlation_id());
    }

    #[test]
    fn test_request_without_optional_fields_decodes() {
        // ---
        let raw = r#"{"method_name":"ping","request_id":"r-1"}"#;
        let inv: Invocation = serde_json::from_str(raw).unwrap();

        assert_eq!(inv.method_name(), "ping");
        assert!(inv.arguments().is_empty());
        assert!(inv.kwargs().is_empty());
        assert_eq!(inv.version(), "1.0");
        assert_eq!(inv.correlation_id().as_str(), "r-1");
    }

    #[test]
    fn test_both_result_and_error_is_error() {
        // ---
        let resp = Response {
            result: Some(json!(3)),
            error: Some("boom".into()),
        };
        assert!(matches!(resp.into_result(), Err(RpcError::Remote(msg)) if msg == "boom"));
    }

    #[test]
    fn test_null_result_is_success() {
        // ---
        let resp = Response::success(Value::Null);
        assert_eq!(resp.result, None);
        assert_eq!(resp.into_result().unwrap(), Value::Null);

        let resp = Response {
            result: None,
            error: Some(String::new()),
        };
        assert!(!resp.is_error());
        assert!(resp.into_result().is_ok());
    }
}
