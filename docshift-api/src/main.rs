use anyhow::{Context, Result};
use clap::Parser;
use docshift::{ExternalTool, ServiceConfig};
use docshift_api::{app, spawn_result_sweeper, AppState};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "docshift-api", about = "Document conversion HTTP service", version, author)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "DOCSHIFT_BIND", default_value = "0.0.0.0:3000")]
    bind: String,

    /// Parent directory for per-job scratch directories
    #[arg(long, env = "DOCSHIFT_SCRATCH_ROOT")]
    scratch_root: Option<PathBuf>,

    /// Office engine executable
    #[arg(long, env = "DOCSHIFT_SOFFICE", default_value = "soffice")]
    soffice: String,

    /// PDF rasterizer executable
    #[arg(long, env = "DOCSHIFT_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: String,

    #[arg(long, env = "DOCSHIFT_OFFICE_TIMEOUT_SECS", default_value_t = 60)]
    office_timeout_secs: u64,

    #[arg(long, env = "DOCSHIFT_RASTER_TIMEOUT_SECS", default_value_t = 120)]
    raster_timeout_secs: u64,

    /// How long a handed-off result can be fetched
    #[arg(long, env = "DOCSHIFT_RESULT_TTL_SECS", default_value_t = 600)]
    result_ttl_secs: u64,

    /// Per-file upload ceiling in megabytes, overriding the per-operation limits
    #[arg(long, env = "DOCSHIFT_MAX_FILE_MB")]
    max_file_mb: Option<u64>,
}

impl Args {
    fn into_config(self) -> ServiceConfig {
        let defaults = ServiceConfig::default();
        ServiceConfig {
            scratch_root: self.scratch_root.unwrap_or(defaults.scratch_root),
            max_file_bytes: self.max_file_mb.map(|mb| mb.saturating_mul(1024 * 1024)),
            office: ExternalTool::new(self.soffice, Duration::from_secs(self.office_timeout_secs)),
            rasterizer: ExternalTool::new(self.pdftoppm, Duration::from_secs(self.raster_timeout_secs)),
            result_ttl: Duration::from_secs(self.result_ttl_secs),
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docshift=debug,docshift_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let bind = args.bind.clone();
    let config = args.into_config();
    let sweep_interval = config.sweep_interval;

    tokio::fs::create_dir_all(&config.scratch_root)
        .await
        .with_context(|| format!("creating scratch root {}", config.scratch_root.display()))?;
    let state = AppState::new(config).await.context("invalid service configuration")?;
    let results = state.results().clone();
    let sweeper = spawn_result_sweeper(results.clone(), sweep_interval);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(
        address = %bind,
        scratch_root = %state.config().scratch_root.display(),
        "docshift API listening"
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    sweeper.abort();
    let dropped = results.clear().await;
    info!(dropped, "unfetched results removed, shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
    info!("termination signal received, draining connections");
}
