//! Load a reader roster, connect the flagged readers and print every frame
//!
//! ```text
//! RUST_LOG=civintec=debug cargo run --example roster -- readers.json
//! ```

use std::sync::Arc;

use civintec::{Dispatcher, Roster};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "readers.json".to_string());
    let roster = Roster::load(&path)?;
    println!("Loaded {} readers from {}", roster.readers.len(), path);

    let dispatcher = Arc::new(Dispatcher::from_roster(&roster).await?);
    let mut feed = dispatcher.subscribe();
    dispatcher.spawn();

    for (ip, result) in dispatcher.connect_auto().await {
        match result {
            Ok(()) => println!("✓ {} connected", ip),
            Err(e) => println!("✗ {}: {}", ip, e),
        }
    }

    while let Ok(event) = feed.recv().await {
        println!("{}  {:?}", event, event.text());
    }

    Ok(())
}
