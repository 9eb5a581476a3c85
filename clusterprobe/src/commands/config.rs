//! `clusterprobe config`: inspect the effective configuration.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use clusterprobe_common::HarnessConfig;
use clusterprobe_common::config::default_config_path;

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the configuration after files and environment are applied
    Show {
        /// Emit JSON instead of TOML
        #[arg(long)]
        json: bool,
    },

    /// Print the config file location
    Path,
}

pub fn run(action: ConfigAction, config: &HarnessConfig, explicit: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let rendered = if json {
                serde_json::to_string_pretty(config)?
            } else {
                toml::to_string_pretty(config).context("rendering config as TOML")?
            };
            println!("{rendered}");
        }
        ConfigAction::Path => {
            let path = explicit
                .map(Path::to_path_buf)
                .or_else(default_config_path)
                .context("no config directory on this platform")?;
            let state = if path.is_file() { "" } else { " (not present)" };
            println!("{}{state}", path.display());
        }
    }
    Ok(())
}
