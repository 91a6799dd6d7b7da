pub mod agent;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod process;
pub mod state;

use cli::Cli;
use error::Result;
use state::AppState;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Load configuration, then serve the chat endpoint until Ctrl-C.
pub async fn run(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = cli.config.clone().unwrap_or_else(config::get_config_path);

    if cli.init_config {
        config::init_config(&config_path)?;
        tracing::info!("Wrote default config to {:?}", config_path);
        return Ok(());
    }

    let mut config = config::load_config(Some(&config_path))?;
    config::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    cli.apply(&mut config);
    config::validate_config(&config)?;

    tracing::info!(
        "Starting chatpilot: provider={} model={} headless={}",
        config.ai.provider.as_str(),
        config.ai.model,
        config.browser.headless
    );

    let state = Arc::new(AppState::new(config)?);
    api::run_server(state).await
}
