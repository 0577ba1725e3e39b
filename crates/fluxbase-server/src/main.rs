mod error;
mod extract;
mod routes;
mod state;
mod ws;

use clap::{Parser, Subcommand};
use fluxbase_core::AppConfig;
use crate::state::AppState;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fluxbase", version, about = "Fluxbase backend server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (default).
    Serve,
    /// Load and validate the configuration, then exit.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FLUXBASE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Check => {
            // Configuration validation is the one fatal path; surface
            // problems and a zero/nonzero exit, nothing else.
            match AppConfig::load() {
                Ok(_) => {
                    println!("configuration ok");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Serve => serve().await,
    }
}

async fn serve() -> anyhow::Result<()> {
    let cfg = AppConfig::load().map_err(|e| anyhow::anyhow!("{e}"))?;
    let bind = cfg.server.bind.clone();

    let (state, background) = AppState::init(cfg)
        .await
        .map_err(|e| anyhow::anyhow!("startup failed: {e}"))?;

    let app = routes::build_router(state);

    tracing::info!(%bind, "fluxbase listening");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Listeners are down; stop the workers in reverse boot order.
    background.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
