use std::sync::Arc;

use crate::{Address, CorrelationId};

/// Topic naming shared by every client and server on one bus.
///
/// - requests: `<namespace>/request/<service>`
/// - replies: `<namespace>/reply/<correlation_id>`
///
/// Reply topics exist only for the lifetime of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    namespace: Arc<str>,
}

impl Topics {
    pub fn new(namespace: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Topic a service listens on for requests.
    pub fn request(&self, service_name: &str) -> Address {
        Address::from(format!("{}/request/{service_name}", self.namespace))
    }

    /// Topic the reply for one call is published to.
    pub fn reply(&self, correlation_id: &CorrelationId) -> Address {
        Address::from(format!("{}/reply/{correlation_id}", self.namespace))
    }

    /// Recover the service name from a request topic.
    pub fn service_of<'a>(&self, topic: &'a str) -> Option<&'a str> {
        // ---
        topic
            .strip_prefix(self.namespace.as_ref())
            .and_then(|rest| rest.strip_prefix("/request/"))
            .filter(|name| !name.is_empty())
    }
}
