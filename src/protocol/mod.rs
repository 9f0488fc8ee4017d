/// Protocol types: call records and topic naming.
///
/// This module defines what travels inside an envelope payload (the
/// invocation and response records) and where envelopes are published.
mod message;
mod topics;

pub use message::{Invocation, Response};
pub use topics::Topics;
