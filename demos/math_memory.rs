//! Math RPC example over the in-memory bus.
//!
//! Server and client run in one process and share a `MemoryHub`.
//!
//! Run with: cargo run --example math_memory
mod common;

use std::time::Duration;

use common::{calculator, CalculatorClient};
use ef_rpc::{create_memory_transport_with_hub, MemoryHub, RpcClient, RpcConfig, RpcServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    env_logger::init();

    let hub = MemoryHub::new();
    let config = RpcConfig::default()
        .with_timeout(Duration::from_secs(5))
        .with_retry_count(1);

    let server = RpcServer::new(
        create_memory_transport_with_hub("math-server", hub.clone()),
        config.clone(),
    )?;
    server.register_service(calculator(), None)?;
    server.start().await?;

    let client = RpcClient::new(create_memory_transport_with_hub("math-client", hub), config)?;
    client.start().await?;

    let calc = CalculatorClient::new(&client)?;
    println!("10 + 20 = {}", calc.add(10, 20).await?);
    println!("10 - 20 = {}", calc.subtract(10, 20).await?);
    println!("7 / 2 = {}", calc.divide(7.0, 2.0).await?);

    match calc.divide(1.0, 0.0).await {
        Ok(value) => println!("1 / 0 = {value}"),
        Err(err) => println!("1 / 0 failed: {err}"),
    }

    client.stop().await?;
    server.stop().await?;

    Ok(())
}
