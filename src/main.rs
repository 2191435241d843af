// OJP server binary: load configuration, wire the runtime, serve.

use ojp::config::properties::{install_process_properties, load_properties};
use ojp::config::server::ServerConfig;
use ojp::server::OjpServer;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let properties = match load_properties(&config_dir) {
        Ok(props) => props,
        Err(e) => {
            tracing::error!(error = %e, dir = %config_dir.display(), "failed to load properties");
            return ExitCode::from(2);
        }
    };
    install_process_properties(properties.clone());
    let config = ServerConfig::from_properties(&properties);

    let node_id = format!("ojp-{}", uuid::Uuid::new_v4());
    let server = OjpServer::build(config, properties, node_id);

    if let Err(e) = server.initialize().await {
        tracing::error!(error = %e, "startup initialization failed");
        return ExitCode::from(1);
    }

    tokio::select! {
        outcome = server.bind_and_run() => {
            if let Err(e) = outcome {
                tracing::error!(error = %e, "server failed");
                return ExitCode::from(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    server.shutdown().await;
    ExitCode::SUCCESS
}
