use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::core::config::Config;
use crate::core::gateway::gemini::GeminiGateway;
use crate::server::{self, ServerState};

pub async fn run_serve(config: &Config) -> Result<(), Box<dyn Error>> {
    let addr: SocketAddr = config
        .bind()
        .parse()
        .map_err(|e| format!("Invalid bind address '{}': {e}", config.bind()))?;

    let gateway = GeminiGateway::from_config(reqwest::Client::new(), config);
    if !gateway.has_api_key() {
        warn!(
            "{} is not set; chat requests will fail until it is",
            config.api_key_env()
        );
    }
    info!(model = gateway.model(), "relaying to Gemini");

    let state = ServerState::new(Arc::new(gateway), config.system_prompt());
    server::serve(addr, state, shutdown_signal()).await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("could not listen for Ctrl+C; stop the process to shut down");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
