//! Math RPC client over an MQTT broker.
//!
//! Start `math_server` first, then:
//!
//! Run with: cargo run --example math_client --features transport_rumqttc
mod common;

use std::time::Duration;

use common::CalculatorClient;
use ef_rpc::{create_rumqttc_transport, DeliveryQuality, MqttOptions, RpcClient, RpcConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    env_logger::init();

    let broker_uri =
        std::env::var("BROKER_URI").unwrap_or_else(|_| "mqtt://localhost:1883".to_string());

    let options = MqttOptions::new(broker_uri, "math-client")
        .with_quality(DeliveryQuality::AtLeastOnce)
        .with_connect_timeout(Duration::from_secs(5));
    let transport = create_rumqttc_transport(options)?;

    let config = RpcConfig::default()
        .with_timeout(Duration::from_secs(3))
        .with_retry_count(2)
        .with_retry_delay(Duration::from_millis(500));

    let client = RpcClient::new(transport, config)?;
    client.start().await?;

    let calc = CalculatorClient::new(&client)?;
    let sum = calc.add(10, 20).await?;
    println!("10 + 20 = {sum}");

    client.stop().await?;
    Ok(())
}
