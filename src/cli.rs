use crate::config::AppConfig;
use clap::Parser;
use std::path::PathBuf;

/// Chat with an agent that drives a browser for you
#[derive(Debug, Parser)]
#[command(name = "chatpilot", version, about)]
pub struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(short, long, env = "CHATPILOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address override
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port override
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Write a default config file and exit
    #[arg(long)]
    pub init_config: bool,
}

impl Cli {
    /// Flags win over file and environment
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.headful {
            config.browser.headless = false;
        }
    }
}
