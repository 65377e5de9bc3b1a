// src/main.rs
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use tcp_service_manager::{
    config,
    server::{BrokerEvent, BrokerHandle, ServiceBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tcp_service_manager=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    // The dispatch layer lives elsewhere; here it only reports what it was given.
    let (broker, mut events) = BrokerHandle::channel();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                BrokerEvent::Listen(socket) => {
                    info!("broker received {} for {}", event.kind(), socket.local_addr())
                }
            }
        }
    });

    let service = ServiceBuilder::new(config, broker)
        .build()
        .await
        .context("startup failed")?;
    let service = Arc::new(service);
    service.run()?;

    let stopper = service.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        stopper.shutdown();
    })
    .await?;

    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
