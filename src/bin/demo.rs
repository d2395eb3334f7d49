/// Voltage SunSpec Demo
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Starts a local SunSpec server publishing the bundled demo models, then
/// scans it with the client and walks the discovered device.
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use voltage_sunspec::{noop_handler, ModelDef, ServerConfig, SunSpecTcpClient, SunSpecTcpServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("🌞 Voltage SunSpec Demo");
    println!("=======================");

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(1502);
    let endpoint = format!("127.0.0.1:{}", port);

    let defs: Vec<ModelDef> = serde_json::from_str(include_str!("../../demos/models.json"))?;
    println!("Loaded {} model definitions", defs.len());

    // publish the demo device
    let config = ServerConfig {
        bind_address: endpoint.parse()?,
        ..Default::default()
    };
    let mut server = SunSpecTcpServer::new(config, &defs, noop_handler()).await?;
    let shutdown = CancellationToken::new();
    let server_ctx = shutdown.clone();
    let server_task = tokio::spawn(async move { server.serve(&server_ctx).await });
    sleep(Duration::from_millis(200)).await;

    // discover it
    println!("\n🔍 Scanning {}...", endpoint);
    let mut client = SunSpecTcpClient::connect(&endpoint, Duration::from_secs(5)).await?;
    let ctx = CancellationToken::new();
    client.scan(&ctx, &defs).await?;

    for model in client.device().models() {
        match model.id() {
            Some(id) => println!("   model {:5} @ {} ({} registers)", id, model.address(), model.quantity()),
            None => println!("   marker      @ {}", model.address()),
        }
    }

    // read everything and show the interesting points
    println!("\n📖 Reading all points...");
    for point in client.read(&ctx, &[]).await? {
        if point.valid() {
            match point.scaled() {
                Some(value) => println!("   {:8} = {}", point.name(), value),
                None => println!("   {:8} = {}", point.name(), point.value()),
            }
        }
    }

    // write the device address register of the common model
    if let Some(da) = client
        .device()
        .model(1)
        .and_then(|m| m.group().point("DA"))
        .map(|p| p.index())
    {
        println!("\n✏️  Writing DA register at {}...", da.address);
        if let Some(model) = client.device_mut().model_mut(1) {
            model
                .group_mut()
                .point_mut("DA")
                .unwrap()
                .value_mut()
                .set_unsigned(11)?;
        }
        client.write(&ctx, &[da]).await?;

        let points = client.read(&ctx, &[da]).await?;
        println!("   readback: {}", points[0]);
    }

    shutdown.cancel();
    let _ = server_task.await?;
    println!("\n✅ Demo complete");
    Ok(())
}
