use anyhow::{anyhow, Context, Result};
use expensa_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Logs go to stderr; stdout is reserved for command output.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.level.trim())
        .with_context(|| format!("invalid log level `{}`", config.level))?;
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|error| anyhow!("could not install tracing subscriber: {error}"))
}
