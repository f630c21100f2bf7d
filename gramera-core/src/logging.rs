use anyhow::Context;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` takes precedence over the configured level. Without it, the
/// gramera crates and HTTP tracing log at the configured level and all
/// other dependencies at `warn`.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let writer = match &config.file_path {
        Some(file_path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)
                .with_context(|| format!("Failed to open log file {file_path}"))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(config.file_path.is_none())
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_line_number(true);

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.format.as_str() == "json" {
        registry
            .with(layer.json().with_current_span(true).with_span_list(true).with_file(true))
            .try_init()?;
    } else {
        registry.with(layer.pretty().with_file(false)).try_init()?;
    }

    Ok(())
}

/// Filter used when `RUST_LOG` is unset
///
/// Target directives match by prefix, so `gramera` covers every workspace
/// crate.
fn default_directives(level: Level) -> String {
    let level = level.to_string().to_lowercase();
    format!("warn,gramera={level},tower_http={level}")
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
