//! Public, transport-agnostic RPC configuration.
//!
//! This type intentionally contains no transport-specific concepts
//! (e.g. MQTT client options). Transport layers carry their own options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::{Result, RpcError};

/// Default topic namespace (`efrpc/request/<service>`, `efrpc/reply/<id>`).
pub const DEFAULT_NAMESPACE: &str = "efrpc";

/// Decides whether a failed call attempt is retried.
///
/// The default policy retries every failure until the attempt budget is
/// spent. Supply a custom predicate to, for example, stop retrying on
/// [`RpcError::Remote`] errors that will fail the same way again.
///
/// ```
/// use ef_rpc::{RetryPolicy, RpcError};
///
/// let transient_only = RetryPolicy::new(|err| {
///     matches!(err, RpcError::Connection(_) | RpcError::Timeout { .. })
/// });
/// assert!(!transient_only.should_retry(&RpcError::Remote("boom".into())));
/// ```
#[derive(Clone)]
pub struct RetryPolicy(Arc<dyn Fn(&RpcError) -> bool + Send + Sync>);

impl RetryPolicy {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&RpcError) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Retry every failure.
    pub fn always() -> Self {
        Self::new(|_| true)
    }

    pub fn should_retry(&self, err: &RpcError) -> bool {
        (self.0)(err)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::always()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryPolicy(..)")
    }
}

/// Client/server configuration.
///
/// Immutable once handed to an [`RpcClient`](crate::RpcClient) or
/// [`RpcServer`](crate::RpcServer); shared by every call they issue.
///
/// # Example
///
/// ```
/// use ef_rpc::RpcConfig;
/// use std::time::Duration;
///
/// let config = RpcConfig::default()
///     .with_timeout(Duration::from_secs(5))
///     .with_retry_count(1)
///     .with_retry_delay(Duration::from_millis(200));
///
/// assert_eq!(config.version, "1.0");
/// assert_eq!(config.retry_count, 1);
/// ```
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Protocol version stamped on every invocation record.
    pub version: String,

    /// How long one attempt waits for its reply.
    ///
    /// Default: 30 seconds
    pub timeout: Duration,

    /// Number of retries after the first attempt (0 = single attempt).
    ///
    /// Default: 3
    pub retry_count: u32,

    /// Fixed pause between attempts. No backoff, no jitter.
    ///
    /// Default: 1 second
    pub retry_delay: Duration,

    /// Leading topic segment shared by clients and servers on one bus.
    pub namespace: String,

    /// Which failures are retried.
    pub retry_policy: RetryPolicy,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            timeout: Duration::from_millis(30_000),
            retry_count: 3,
            retry_delay: Duration::from_millis(1_000),
            namespace: DEFAULT_NAMESPACE.to_string(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl RpcConfig {
    /// Set the protocol version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the per-attempt reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retries after the first attempt.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the fixed delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the topic namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Replace the retry predicate.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Timeout in whole milliseconds, as reported by [`RpcError::Timeout`].
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Reject values that would produce unusable topics or records.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.namespace.is_empty() || self.namespace.contains(&['+', '#'][..]) {
            return Err(RpcError::InvalidConfig(format!(
                "namespace must be non-empty and free of wildcards: {:?}",
                self.namespace
            )));
        }
        if self.version.is_empty() {
            return Err(RpcError::InvalidConfig("version must be non-empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(RpcError::InvalidConfig("timeout must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_defaults() {
        // ---
        let config = RpcConfig::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.timeout_ms(), 30_000);
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1_000));
        assert_eq!(config.namespace, "efrpc");
        assert!(config.retry_policy.should_retry(&RpcError::NotStarted));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_wildcard_namespace() {
        // ---
        let config = RpcConfig::default().with_namespace("efrpc/#");
        assert!(matches!(config.validate(), Err(RpcError::InvalidConfig(_))));

        let config = RpcConfig::default().with_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
