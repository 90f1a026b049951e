//! Loopback demo: a host and an emulated device over an in-memory link.
//!
//! Run with `cargo run --example loopback`.

use std::time::Duration;

use handlink::transport::memory_pair;
use handlink::{Connection, ConnectionConfig, RpcRequest, RpcResponse};

#[tokio::main]
async fn main() -> handlink::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let cfg = ConnectionConfig::default().with_recv_timeout(Duration::from_secs(5));
    let (device_end, host_end) = memory_pair();

    let device_cfg = cfg.clone();
    let device = tokio::spawn(async move {
        let mut conn = Connection::bind(device_end, device_cfg);
        conn.listen()?;
        conn.accept().await?;

        let raw = conn.receive().await?;
        let request = RpcRequest::decode(&raw)?;
        tracing::info!(
            command = request.command,
            args = request.args.len(),
            "device received request"
        );

        let response = RpcResponse::new(request.command, 0).with_arg(0x20, &b"OK"[..]);
        conn.send(&response.encode()?).await?;
        conn.close().await
    });

    let mut conn = Connection::bind(host_end, cfg);
    conn.connect().await?;
    println!("connected at {} baud", conn.speed());

    let response = conn
        .call(&RpcRequest::new(0x01).with_arg(0x20, &b"ping"[..]))
        .await?;
    println!(
        "device answered status {} with {:?}",
        response.status, response.args[0].data
    );

    conn.close().await?;
    device.await.expect("device task panicked")
}
