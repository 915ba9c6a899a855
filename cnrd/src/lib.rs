use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cnr_core::browser::{SessionManager, SessionProvider};
use cnr_core::captcha::OcrSpaceRecognizer;
use cnr_core::{load_lookup_config, LookupEngine};

pub mod server;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] cnr_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("browser error: {0}")]
    Browser(#[from] cnr_core::browser::BrowserError),
    #[error("ocr client error: {0}")]
    OcrClient(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "CNR case-details lookup daemon", long_about = None)]
pub struct Cli {
    /// Path to the cnr.toml config file
    #[arg(long, default_value = "configs/cnr.toml")]
    pub config: PathBuf,
    /// Override the listen address from the config
    #[arg(long)]
    pub bind: Option<String>,
    /// Run the browser with a visible window (debugging)
    #[arg(long)]
    pub headed: bool,
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = load_lookup_config(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }
    if cli.headed {
        config.chromium.headless = false;
    }
    let config = Arc::new(config);

    let sessions = Arc::new(SessionManager::new(Arc::clone(&config)));
    let recognizer = OcrSpaceRecognizer::new(config.ocr.clone())
        .map_err(|err| AppError::OcrClient(err.to_string()))?;
    let engine = Arc::new(LookupEngine::new(
        Arc::clone(&sessions) as Arc<dyn SessionProvider>,
        Arc::new(recognizer),
        Arc::clone(&config),
    ));

    // Warm the browser up front so the first lookup does not pay the launch
    // cost; a startup failure aborts the daemon. The session stays lazily
    // re-creatable afterwards.
    info!("warming up browser session");
    sessions.acquire().await?;

    server::run(server::AppState { engine, sessions }, &config.server.bind_addr).await
}
