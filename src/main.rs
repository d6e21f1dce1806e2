use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

mod config;
mod error;
mod media;
mod orchestrator;
mod server;
mod session;
mod utils;

use config::Config;
use media::YtDlpFetcher;
use orchestrator::DownloadOrchestrator;
use session::SessionRegistry;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<String>,
}

fn get_config_path(args: &Args) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("CONFIG_FILE") {
        return Some(path);
    }

    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        let config_path = format!("{}/grabby-web/config.toml", xdg_config_home);
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_path = format!("{}/.config/grabby-web/config.toml", home.display());
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    None
}

fn init_logging(format: &str) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = get_config_path(&args);
    let mut config = match &config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::default(),
    };
    config.apply_env(std::env::var("PORT").ok())?;

    init_logging(config.get_logging_format());

    info!("Starting Grabby web...");
    match &config_path {
        Some(path) => info!("Loaded config from: {}", path),
        None => info!("No config file found, using defaults"),
    }

    let fetcher = Arc::new(YtDlpFetcher::with_args(
        config.download.ytdlp_path.clone(),
        config.download.ytdlp_args.clone(),
    ));
    if let Err(e) = media::test_setup(fetcher.as_ref()).await {
        warn!("Media fetcher test failed: {}", e);
    }

    let staging_root = config.download.staging_root();
    match media::sweep_stale(&staging_root, config.download.stale_after()) {
        Ok(0) => {}
        Ok(removed) => info!(
            "Removed {} orphaned staging directories from {}",
            removed,
            staging_root.display()
        ),
        Err(e) => warn!(
            "Could not sweep staging directory {}: {}",
            staging_root.display(),
            e
        ),
    }

    let orchestrator = DownloadOrchestrator::new(
        fetcher,
        SessionRegistry::new(),
        staging_root,
        config.download.fetch_timeout(),
    )
    .require_session_id(config.server.require_session_id);
    let state = server::AppState::new(orchestrator);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{} (set PORT to override)", addr);

    tokio::spawn(server::shutdown_on_signal(state.shutdown.clone()));
    server::serve(listener, state).await
}
