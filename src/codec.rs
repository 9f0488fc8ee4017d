//! Record encoding.
//!
//! The correlation engine only needs records turned into a transmissible
//! string and back, deterministically and reversibly. [`Codec`] is that
//! seam; [`JsonCodec`] is the implementation used by default.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::{Invocation, Response};
use crate::{log_debug, Result, RpcError};

/// Encodes and decodes call records for the envelope payload.
pub trait Codec: Send + Sync {
    /// Content type advertised in envelope metadata.
    fn content_type(&self) -> &str;

    fn encode_invocation(&self, invocation: &Invocation) -> Result<String>;

    fn decode_invocation(&self, data: &str) -> Result<Invocation>;

    fn encode_response(&self, response: &Response) -> Result<String>;

    fn decode_response(&self, data: &str) -> Result<Response>;
}

/// Shared codec pointer.
pub type CodecPtr = Arc<dyn Codec>;

/// UTF-8 JSON codec.
///
/// Non-ASCII text is written verbatim, not `\u`-escaped. Set `pretty` for
/// indented output when reading bus traffic by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    fn encode<T: Serialize>(&self, what: &str, value: &T) -> Result<String> {
        // ---
        let encoded = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        encoded.map_err(|err| {
            log_debug!("failed to encode {what}: {err}");
            RpcError::Serialization(format!("failed to encode {what}: {err}"))
        })
    }

    fn decode<T: DeserializeOwned>(&self, what: &str, data: &str) -> Result<T> {
        // ---
        serde_json::from_str(data).map_err(|err| {
            log_debug!("failed to decode {what}: {err}");
            RpcError::Serialization(format!("failed to decode {what}: {err}"))
        })
    }
}

impl Codec for JsonCodec {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn encode_invocation(&self, invocation: &Invocation) -> Result<String> {
        self.encode("invocation", invocation)
    }

    fn decode_invocation(&self, data: &str) -> Result<Invocation> {
        self.decode("invocation", data)
    }

    fn encode_response(&self, response: &Response) -> Result<String> {
        self.encode("response", response)
    }

    fn decode_response(&self, data: &str) -> Result<Response> {
        self.decode("response", data)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::{json, Map, Value};

    fn sample_invocation() -> Invocation {
        // ---
        let mut kwargs = Map::new();
        kwargs.insert("单位".into(), json!("摄氏度"));
        kwargs.insert("nested".into(), json!({"a": [1, 2, {"b": null}], "c": true}));

        Invocation::new(
            "Calculator",
            "add",
            vec![json!(10), json!("测试"), json!([1.5, -2, {"k": "v"}])],
            kwargs,
            "1.0",
        )
    }

    #[test]
    fn test_invocation_round_trip() {
        // ---
        let codec = JsonCodec::new();
        let original = sample_invocation();

        let encoded = codec.encode_invocation(&original).unwrap();
        let decoded = codec.decode_invocation(&encoded).unwrap();
        assert_eq!(decoded, original);

        // decode then re-encode gives the same text
        assert_eq!(codec.encode_invocation(&decoded).unwrap(), encoded);
    }

    #[test]
    fn test_response_round_trip() {
        // ---
        let codec = JsonCodec::new();

        for response in [
            Response::success(json!({"sum": 30, "label": "三十"})),
            Response::success(Value::Null),
            Response::failure("方法不存在: nope"),
        ] {
            let encoded = codec.encode_response(&response).unwrap();
            let decoded = codec.decode_response(&encoded).unwrap();
            assert_eq!(decoded, response);
            assert_eq!(codec.encode_response(&decoded).unwrap(), encoded);
        }
    }

    #[test]
    fn test_non_ascii_not_escaped() {
        // ---
        let codec = JsonCodec::new();
        let encoded = codec
            .encode_response(&Response::success(json!("测试")))
            .unwrap();
        assert!(encoded.contains("测试"));
    }

    #[test]
    fn test_invalid_input_is_serialization_error() {
        // ---
        let codec = JsonCodec::pretty();
        assert!(matches!(
            codec.decode_invocation("{not json"),
            Err(RpcError::Serialization(_))
        ));
        assert!(matches!(
            codec.decode_response("[1, 2]"),
            Err(RpcError::Serialization(_))
        ));
    }
}
