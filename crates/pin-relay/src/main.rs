//! pin-relay binary entry point

use anyhow::Result;
use pin_relay::{RelayServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration
    let config = if let Ok(path) = std::env::var("PIN_RELAY_CONFIG") {
        ServerConfig::from_toml(path)?
    } else {
        ServerConfig::from_env()?
    };

    // Create and run server
    let server = RelayServer::new(config).await?;
    server.run().await?;

    Ok(())
}
