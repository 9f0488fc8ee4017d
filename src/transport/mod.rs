//! Transport implementations.
//!
//! Concrete implementations of the domain-level `Transport` trait, plus the
//! runner that drives consumers. Broker-backed transports sit behind feature
//! flags and are exposed only through constructor functions.
//!
//! Domain code must not depend on transport-specific types.

mod memory;
mod runner;

#[cfg(feature = "transport_rumqttc")]
mod rumqttc;

pub use memory::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};
pub use runner::{run, TransportConsumer};

#[cfg(feature = "transport_rumqttc")]
pub use self::rumqttc::{create_transport as create_rumqttc_transport, DeliveryQuality, MqttOptions};
