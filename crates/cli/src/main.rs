use std::process::ExitCode;

use anyhow::{anyhow, Result};
use aureus_core::config::{AppConfig, LoadOptions, LoggingConfig};

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    use aureus_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    match logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    }
    .map_err(|error| anyhow!(error))
}

fn main() -> Result<ExitCode> {
    // Commands report config failures themselves; logging falls back to defaults.
    let logging = AppConfig::load(LoadOptions::default())
        .map(|config| config.logging)
        .unwrap_or_else(|_| AppConfig::default().logging);
    init_logging(&logging)?;

    Ok(aureus_cli::run())
}
