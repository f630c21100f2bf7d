use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub presence: PresenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Allowed browser origin for the WebSocket endpoint ("*" allows any)
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 4000,
            cors_origin: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Presence relay tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Per-session outbound queue capacity; a full queue drops the event
    pub outbound_buffer: usize,
    /// Largest accepted WebSocket frame
    pub max_message_bytes: usize,
    /// Maximum concurrently open sessions (0 = unlimited)
    pub max_sessions: usize,
    /// Close sessions with no inbound activity for this long (0 = never)
    pub idle_timeout_seconds: u64,
    /// How often the idle sweeper runs when idle eviction is enabled
    pub sweep_interval_seconds: u64,
    /// How long shutdown waits for open sessions to drain
    pub shutdown_drain_seconds: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 1000,
            max_message_bytes: 64 * 1024,
            max_sessions: 0,
            idle_timeout_seconds: 0,
            sweep_interval_seconds: 30,
            shutdown_drain_seconds: 10,
        }
    }
}

impl PresenceConfig {
    /// Idle timeout, `None` when eviction is disabled
    #[must_use]
    pub const fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    #[must_use]
    pub const fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_seconds)
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> crate::Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // GRAMERA_SERVER__HTTP_PORT, GRAMERA_PRESENCE__IDLE_TIMEOUT_SECONDS, ...
        builder = builder.add_source(
            Environment::with_prefix("GRAMERA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> crate::Result<Self> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> crate::Result<Self> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check for misconfigurations, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.host.trim().is_empty() {
            errors.push("server.host must not be empty".to_string());
        }
        if self.server.http_port == 0 {
            errors.push("server.http_port must be greater than 0".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }
        if self.presence.outbound_buffer == 0 {
            errors.push("presence.outbound_buffer must be greater than 0".to_string());
        }
        if self.presence.max_message_bytes == 0 {
            errors.push("presence.max_message_bytes must be greater than 0".to_string());
        }
        if self.presence.idle_timeout_seconds > 0 && self.presence.sweep_interval_seconds == 0 {
            errors.push(
                "presence.sweep_interval_seconds must be greater than 0 when idle eviction is enabled"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
