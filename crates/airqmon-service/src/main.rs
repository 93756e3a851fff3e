//! AirQMon Service - CO2 collector, pruner, alerter and HTTP API.
//!
//! Run with: `cargo run -p airqmon-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use airqmon_service::{AppState, Alerter, Collector, Config, Pruner, app, build_sensor, now_unix};
use airqmon_store::Store;

mod service;

/// AirQMon Service - CO2 collector, alerter and HTTP REST API.
#[derive(Parser, Debug)]
#[command(name = "airqmon-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every loop and the HTTP API in the foreground (default).
    Run,

    /// Run the HTTP API only.
    Serve,

    /// Sample the sensor and prune old measurements.
    Collect,

    /// Poll for alert transitions and send notifications.
    Alert,

    /// Delete measurements older than the retention horizon, then exit.
    Prune,

    /// Manage the background service.
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
}

#[derive(Subcommand, Debug)]
enum ServiceAction {
    /// Install a role as a system service.
    Install {
        /// Role to install.
        #[arg(value_enum, default_value = "run")]
        role: service::Role,
        /// Install as user-level service (no root/admin required).
        #[arg(long)]
        user: bool,
    },

    /// Uninstall a role's system service.
    Uninstall {
        #[arg(value_enum, default_value = "run")]
        role: service::Role,
        /// Uninstall user-level service.
        #[arg(long)]
        user: bool,
    },

    /// Start a role's system service.
    Start {
        #[arg(value_enum, default_value = "run")]
        role: service::Role,
        /// Start user-level service.
        #[arg(long)]
        user: bool,
    },

    /// Stop a role's system service.
    Stop {
        #[arg(value_enum, default_value = "run")]
        role: service::Role,
        /// Stop user-level service.
        #[arg(long)]
        user: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::Service { action }) => handle_service_action(action),
        _ => run(args).await,
    }
}

fn handle_service_action(action: ServiceAction) -> anyhow::Result<()> {
    use service::Level;

    let level = |user: bool| if user { Level::User } else { Level::System };
    let (action_name, role, result) = match action {
        ServiceAction::Install { role, user } => {
            ("install", role, service::install(role, level(user)))
        }
        ServiceAction::Uninstall { role, user } => {
            ("uninstall", role, service::uninstall(role, level(user)))
        }
        ServiceAction::Start { role, user } => ("start", role, service::start(role, level(user))),
        ServiceAction::Stop { role, user } => ("stop", role, service::stop(role, level(user))),
    };

    match result {
        Ok(()) => {
            println!(
                "Successfully ran {} for airqmon-service ({})",
                action_name,
                role.subcommand()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to {} service: {}", action_name, e);
            Err(e.into())
        }
    }
}

fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("airqmon_service=info".parse()?)
                .add_directive("airqmon_core=info".parse()?)
                .add_directive("airqmon_store=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Override config with CLI args
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    init_logging()?;
    let config = load_config(&args)?;

    let store = Store::open(&config.storage.path)
        .with_context(|| format!("opening database {}", config.storage.path.display()))?;

    if let Some(Command::Prune) = args.command {
        let state = AppState::new(store, config)?;
        let removed = Pruner::new(state).prune_once(now_unix()).await?;
        println!("Pruned {} measurement(s)", removed);
        return Ok(());
    }

    let state = AppState::new(store, config.clone())?;
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let (collect, alert, serve) = match args.command {
        Some(Command::Serve) => (false, false, true),
        Some(Command::Collect) => (true, false, false),
        Some(Command::Alert) => (false, true, false),
        _ => (true, true, true),
    };

    if collect {
        let sensor = build_sensor(&config.collector)?;
        tasks.push(Collector::new(Arc::clone(&state), sensor).start());
        tasks.push(Pruner::new(Arc::clone(&state)).start());
    }
    if alert {
        tasks.push(Alerter::new(Arc::clone(&state)).start());
    }

    if serve {
        let addr: SocketAddr = config.server.bind.parse()?;
        info!("Starting server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app(Arc::clone(&state)))
            .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
            .await?;
    } else {
        shutdown_signal(Arc::clone(&state)).await;
    }

    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }
    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl-C, then ask every loop to stop after its current cycle.
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");
    state.signal_stop();
}
