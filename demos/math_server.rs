//! Math RPC server over an MQTT broker.
//!
//! Run with: cargo run --example math_server --features transport_rumqttc
//!
//! Requires: An MQTT broker running on localhost:1883 (override with
//! `BROKER_URI`).
mod common;

use common::calculator;
use ef_rpc::{create_rumqttc_transport, MqttOptions, RpcConfig, RpcServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    env_logger::init();

    let broker_uri =
        std::env::var("BROKER_URI").unwrap_or_else(|_| "mqtt://localhost:1883".to_string());

    let transport = create_rumqttc_transport(MqttOptions::new(broker_uri, "math-server"))?;

    let server = RpcServer::new(transport, RpcConfig::default())?;
    server.register_service(calculator(), None)?;
    server.start().await?;
    println!("serving {:?}, Ctrl+C to stop", server.service_names());

    tokio::signal::ctrl_c().await?;
    println!("Received Ctrl+C, shutting down...");

    server.stop().await?;
    Ok(())
}
