use std::path::PathBuf;
use std::sync::Arc;

use inbox_cleanup_lib::adapters::imap::ImapConnector;
use inbox_cleanup_lib::config::{self, get_config};
use inbox_cleanup_lib::credentials::ConfigCredentialProvider;
use inbox_cleanup_lib::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // RUST_LOG wins; otherwise debug builds are chatty for our crate only.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("inbox_cleanup_lib=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> inbox_cleanup_lib::Result<()> {
    info!("Starting inbox-cleanup ...");

    match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => config::init_config_from_path(&path)?,
        None => config::init_config()?,
    }
    let config = get_config()?;
    if config.accounts.is_empty() {
        warn!("No accounts configured, nothing to sync");
    }

    let connector = Arc::new(ImapConnector::new(config.sync.timeout()));
    let credentials = Arc::new(ConfigCredentialProvider::new(config.clone()));
    let (state, events) = AppState::from_config(&config, connector, credentials)?;
    state.start_all().await?;

    // Stand-in for a UI: one JSON line per progress event.
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Could not encode progress event: {}", e),
            }
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for ctrl-c: {}", e);
    }
    info!("Shutting down");
    state.shutdown().await;
    printer.abort();
    Ok(())
}
