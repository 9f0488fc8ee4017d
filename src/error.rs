use thiserror::Error;

/// Errors that can occur during RPC operations
#[derive(Error, Debug)]
pub enum RpcError {
    /// Bus unavailable or not connected
    #[error("connection error: {0}")]
    Connection(String),

    /// No reply observed within the configured window
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server reported an error in the response record
    #[error("remote error: {0}")]
    Remote(String),

    /// Final failure of a call after the retry budget was spent.
    ///
    /// `source` keeps the last underlying cause for diagnostics.
    #[error("{message}")]
    Invocation {
        message: String,
        #[source]
        source: Box<RpcError>,
    },

    /// The pending call was cancelled because its client stopped
    #[error("call cancelled: client stopped")]
    Cancelled,

    /// Operation requires a started client or server
    #[error("not started")]
    NotStarted,

    /// Operation is not allowed while running
    #[error("already started")]
    AlreadyStarted,

    /// A pending slot already exists for this correlation id
    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelationId(String),

    /// Configuration value missing or invalid
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Bus driver failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl RpcError {
    /// Wrap the last failure of a call into one invocation error.
    pub(crate) fn invocation(last: RpcError) -> Self {
        // ---
        RpcError::Invocation {
            message: format!("rpc call failed: {last}"),
            source: Box::new(last),
        }
    }

    /// Underlying cause of an [`RpcError::Invocation`], if any.
    pub fn cause(&self) -> Option<&RpcError> {
        match self {
            RpcError::Invocation { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
