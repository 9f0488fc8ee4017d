//! MQTT transport implementation based on rumqttc.
//!
//! Adapts the rumqttc API to the domain-level `Transport` trait without
//! leaking MQTT concepts upward. Delivery quality, credentials and session
//! settings are configured through [`MqttOptions`].
//!
//! # Features
//!
//! - Actor-based concurrency model with single EventLoop ownership
//! - `start()` waits for the broker's CONNACK
//! - SUBACK confirmation before returning from `subscribe()`
//! - Resubscription of active topics after a reconnect
//!
//! # Usage
//!
//! Enable the `transport_rumqttc` feature in your Cargo.toml:
//!
//! ```toml
//! [dependencies]
//! ef-rpc = { version = "0.1", features = ["transport_rumqttc"] }
//! ```

mod options;
mod transport;

pub use options::{DeliveryQuality, MqttOptions};
pub use transport::create_transport;
