//! Jetson Exporter binary.
//!
//! Serves board telemetry on a Prometheus metrics endpoint.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use jetson_exporter::{
    build_registry, encode_text, start_metrics_server, web::shutdown_signal, SessionConfig,
    TelemetrySession, WebConfig, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_INTERVAL_MS, DEFAULT_PORT,
    DEFAULT_SOCKET_PATH,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "jetson_exporter")]
#[command(about = "Prometheus exporter for Jetson board telemetry")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Austin Couch")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Metrics server bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Metrics collector port number
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Telemetry backend socket
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Refresh interval requested from the backend in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_INTERVAL_MS)]
    interval: u64,

    /// Backend connect and handshake timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    connect_timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "debug")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve metrics (default)
    Serve,

    /// Read a single snapshot from the backend and exit
    Snapshot(SnapshotArgs),
}

#[derive(Args)]
struct SnapshotArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = SnapshotFormat::Json)]
    format: SnapshotFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SnapshotFormat {
    /// Decoded snapshot as JSON
    Json,
    /// Prometheus text exposition
    Prometheus,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        SessionConfig::new(&self.socket)
            .with_refresh_interval(Duration::from_millis(self.interval))
            .with_connect_timeout(Duration::from_millis(self.connect_timeout))
    }

    fn web_config(&self) -> WebConfig {
        WebConfig::new(&self.host, self.port)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Snapshot(args)) => snapshot_command(&cli, args).await,
        Some(Commands::Serve) | None => serve_command(&cli).await,
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install the log subscriber")?;

    Ok(())
}

async fn start_session(cli: &Cli) -> anyhow::Result<Arc<TelemetrySession>> {
    match TelemetrySession::start(cli.session_config()).await {
        Ok(session) => Ok(Arc::new(session)),
        Err(e) => {
            error!("Error starting telemetry session: {}", e);
            Err(e).context("telemetry backend unavailable")
        }
    }
}

async fn serve_command(cli: &Cli) -> anyhow::Result<()> {
    info!("Starting Jetson exporter...");

    let session = start_session(cli).await?;
    // Stops the session on every path out of this function
    let _stop = session.stop_guard();

    let registry = build_registry(Arc::clone(&session)).context("failed to build registry")?;

    start_metrics_server(cli.web_config(), registry, shutdown_signal())
        .await
        .context("metrics server failed")?;

    Ok(())
}

async fn snapshot_command(cli: &Cli, args: &SnapshotArgs) -> anyhow::Result<()> {
    let session = start_session(cli).await?;
    let _stop = session.stop_guard();

    let snapshot = session
        .wait_ready(Duration::from_millis(cli.connect_timeout))
        .await
        .context("backend sent no snapshot")?;

    match args.format {
        SnapshotFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&*snapshot)?);
        }
        SnapshotFormat::Prometheus => {
            let registry = build_registry(Arc::clone(&session))?;
            print!("{}", encode_text(&registry)?);
        }
    }

    Ok(())
}
