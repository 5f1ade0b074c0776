//! `serve` command implementation.

use anyhow::{Context, Result};
use session::SessionRegistry;
use tracing::{info, warn};

use crate::cli::ServeArgs;
use crate::plugin_api::{self, PluginState};

/// Execute the `serve` command
pub async fn run_serve(args: &ServeArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    let mut config = config_loader::ConfigLoader::load_or_default(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(ref socket) = args.socket {
        info!(socket = %socket.display(), "Overriding socket path from CLI");
        config.server.socket_path = socket.clone();
    }
    if let Some(ref root) = args.store_root {
        info!(root = %root.display(), "Overriding store root from CLI");
        config.store.root = root.clone();
    }

    info!(
        socket = %config.server.socket_path.display(),
        store_root = %config.store.root.display(),
        max_frame_size = config.pipeline.max_frame_size,
        send_timeout_ms = config.pipeline.send_timeout_ms,
        default_options = config.defaults.len(),
        "Configuration loaded"
    );

    let registry = SessionRegistry::new(config.store.root.clone(), config.pipeline.clone());
    let state = PluginState::new(registry.clone(), config.defaults.clone());

    // Sessions are drained before the server stops so that following
    // ReadLogs streams can finish.
    let shutdown = {
        let registry = registry.clone();
        async move {
            setup_shutdown_signal().await;
            warn!("Received shutdown signal, draining sessions...");
            registry.shutdown_all().await;
        }
    };

    let served = plugin_api::serve(&config.server.socket_path, state, shutdown).await;
    registry.shutdown_all().await;
    served?;

    info!("logchain finished");
    Ok(())
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
