//! Drive one CN56 reader directly: query it, then grant and deny access

use std::net::SocketAddr;
use std::time::Duration;

use civintec::{DeviceModel, ReaderConfig, ReaderSession};
use civintec_transport::{TransportEvent, UdpEndpoint, UdpTransport, event_channel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let ip = std::env::var("READER_IP").unwrap_or_else(|_| "192.168.1.50".to_string());
    let config = ReaderConfig::new(DeviceModel::Cn56, ip.parse()?, 2000);
    let remote = config.socket_addr();

    let (events, mut inbound) = event_channel();
    let local: SocketAddr = "0.0.0.0:2000".parse()?;
    let endpoint = UdpEndpoint::bind(local, events).await?;
    let session = ReaderSession::new(config, Box::new(UdpTransport::new(endpoint, remote)));

    // Without a dispatcher, feed the session by hand
    let reader = session.clone();
    tokio::spawn(async move {
        while let Some(event) = inbound.recv().await {
            if let TransportEvent::Received {
                source,
                connection,
                data,
            } = event
            {
                reader.ingest(source, connection, data);
            }
        }
    });

    session.connect().await?;
    println!("✓ Connected to {}", session.remote_addr());

    let info = session.get_device_info().await?;
    println!("✓ Device: {}", info);

    session.open().await?;
    println!("✓ Door opened");
    tokio::time::sleep(Duration::from_secs(4)).await;

    session.refuse().await?;
    println!("✓ Access refused");
    tokio::time::sleep(Duration::from_secs(4)).await;

    session.disconnect().await?;
    println!("✓ Disconnected");

    Ok(())
}
