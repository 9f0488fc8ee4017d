//! Domain layer public interface.
//!
//! This module defines domain-level abstractions that are independent of
//! transport implementations, protocols, or infrastructure concerns.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod envelope;
mod transport;

// --- Transport domain re-exports ---

pub use envelope::Envelope;
pub use transport::{
    //
    Address,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};
