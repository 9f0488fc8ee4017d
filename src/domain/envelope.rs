// src/domain/envelope.rs

//! Transport-level message wrapper.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{Address, CorrelationId, Result, RpcError};

/// The unit of transport between producers and consumers.
///
/// Wire shape:
///
/// ```text
/// {"id":"<uuid>","created_at":"<rfc3339>","payload":["<encoded record>"],
///  "correlation_id":"<uuid>","reply_to":"efrpc/reply/<uuid>","metadata":{...}}
/// ```
///
/// `payload` carries exactly one element: the encoded invocation or response
/// record. A non-empty `reply_to` marks a request and names the topic the
/// reply must go to; replies carry an empty `reply_to`.
///
/// # Examples
///
/// ```
/// # use ef_rpc::{Address, CorrelationId, Envelope};
/// let id = CorrelationId::generate();
/// let request = Envelope::request("{}", id.clone(), &Address::from("efrpc/reply/x"));
/// assert!(request.is_request());
///
/// let reply = Envelope::reply("{}", id);
/// assert!(!reply.is_request());
/// assert!(reply.reply_address().is_none());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    // ---
    /// Unique message id, independent of the correlation id.
    pub id: String,

    /// Creation time, RFC 3339.
    pub created_at: String,

    /// Encoded record, exactly one element.
    pub payload: Vec<String>,

    /// Correlation identifier used to associate requests with replies.
    pub correlation_id: CorrelationId,

    /// Reply topic on requests; empty on replies.
    #[serde(default)]
    pub reply_to: String,

    /// Optional informational metadata (content type, protocol version).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Envelope {
    // ---
    fn new(body: impl Into<String>, correlation_id: CorrelationId, reply_to: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            payload: vec![body.into()],
            correlation_id,
            reply_to,
            metadata: None,
        }
    }

    /// Create a request envelope whose reply goes to `reply_to`.
    pub fn request(
        body: impl Into<String>,
        correlation_id: CorrelationId,
        reply_to: &Address,
    ) -> Self {
        Self::new(body, correlation_id, reply_to.0.to_string())
    }

    /// Create a reply envelope for the request carrying `correlation_id`.
    pub fn reply(body: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self::new(body, correlation_id, String::new())
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn is_request(&self) -> bool {
        !self.reply_to.is_empty()
    }

    pub fn reply_address(&self) -> Option<Address> {
        if self.is_request() {
            Some(Address::from(self.reply_to.as_str()))
        } else {
            None
        }
    }

    /// The encoded record carried by this envelope.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Serialization`] unless the payload holds exactly
    /// one element.
    pub fn body(&self) -> Result<&str> {
        // ---
        match self.payload.as_slice() {
            [body] => Ok(body.as_str()),
            other => Err(RpcError::Serialization(format!(
                "envelope {} carries {} payload elements, expected 1",
                self.id,
                other.len()
            ))),
        }
    }

    /// Frame the envelope for a byte-oriented bus.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse an envelope framed by [`Envelope::to_bytes`].
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
