//! storeftp - Entry Point
//!
//! Resolves the storage backend, binds the control listener and accepts
//! control connections until Ctrl-C.

use log::{error, info, warn};
use std::process;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use storeftp::Server;
use storeftp::config::ServerConfig;
use storeftp::error::ServerError;
use storeftp::error::handlers::handle_error;

#[tokio::main]
async fn main() {
    // Initialize the logger (env_logger picks up RUST_LOG environment variable)
    env_logger::init();

    info!("Launching FTP server...");

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let server = match Server::new(&config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Cannot start: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = server.start().await {
        error!("{}", e);
        process::exit(1);
    }

    let shutdown = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.stop();
        }
    });

    loop {
        match server.accept_client().await {
            Ok((stream, peer)) => {
                tokio::spawn(async move {
                    if let Err(e) = handle_control_connection(stream, &peer).await {
                        warn!("Failed to handle client {}: {}", peer, e);
                    }
                });
            }
            Err(ServerError::ListenerClosed) | Err(ServerError::NotStarted) => break,
            Err(e) => handle_error(&e.into()),
        }
    }

    info!("Server stopped after {:?}", server.uptime());
}

/// Greets the client and closes; command interpretation is not wired in here.
async fn handle_control_connection(mut stream: TcpStream, peer: &str) -> std::io::Result<()> {
    info!("Client connected: {}", peer);
    stream.write_all(b"220 storeftp ready\r\n").await?;
    stream
        .write_all(b"421 No command interpreter attached, closing control connection\r\n")
        .await?;
    stream.shutdown().await
}
