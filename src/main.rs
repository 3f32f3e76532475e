use duet_signal::signaling::{ServerConfig, SignalingServer};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;

    println!("   Duet Signaling Server");
    println!("   Binding to ws://{}", config.bind_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = SignalingServer::bind(config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Server stopped: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
