// Gestor Web - analytics API server and scheduler runner

use anyhow::Result;
use clap::{Parser, Subcommand};
use gestor_core::config::EngineConfig;
use gestor_web::{create_app, AppState, WebConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "gestor-web")]
#[command(about = "Municipal KPI, alerting and dashboard service", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API (default)
    Serve {
        /// Override the listening port
        #[arg(long)]
        port: Option<u16>,

        /// Do not run the background scheduler in this process
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Run one scheduler pass for the current time and print the report
    Tick,

    /// Write the default engine configuration to a file
    InitConfig {
        /// Destination path
        #[arg(long, default_value = ".gestor.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gestor_web=info,gestor_core=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = WebConfig::load()?;
    if cli.config.is_some() {
        config.engine_config = cli.config.clone();
    }

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        no_scheduler: false,
    }) {
        Commands::Serve { port, no_scheduler } => {
            if let Some(port) = port {
                config.port = port;
            }
            if no_scheduler {
                config.run_scheduler = false;
            }
            serve(config).await
        }
        Commands::Tick => {
            let state = AppState::new(config).await?;
            let now = chrono::Utc::now();
            let report = state.engine.scheduler.run_due(now).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::InitConfig { path } => {
            EngineConfig::default().save_to_path(&path)?;
            info!("Wrote default engine configuration to {}", path.display());
            Ok(())
        }
    }
}

async fn serve(config: WebConfig) -> Result<()> {
    let state = AppState::new(config.clone()).await?;

    let shutdown = CancellationToken::new();
    let scheduler = if config.run_scheduler {
        Some(state.engine.scheduler.clone().spawn(shutdown.clone()))
    } else {
        None
    };

    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Gestor analytics API listening on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            tracing::warn!("Scheduler task ended abnormally: {}", e);
        }
    }
    Ok(())
}
