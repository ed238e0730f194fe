//! Logging initialization
//!
//! Structured logs through `tracing`, JSON by default. `RUST_LOG` overrides
//! the filter; otherwise it follows the debug flag.

use chpro_core::{ClusterConfig, ConfigError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "chpro_pool=info,chpro_core=info,info";
const DEBUG_FILTER: &str = "chpro_pool=debug,chpro_core=debug,info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Console,
}

/// Logging configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoggingConfig {
    /// Raise the crate log levels to debug
    pub debug: bool,
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Create LoggingConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `CHPRO_LOG_FORMAT`: "json" or "console" (default: json)
    /// - `CHPRO_DEBUG`: "true" raises crate levels to debug
    pub fn from_env() -> Self {
        let format = match std::env::var("CHPRO_LOG_FORMAT").as_deref() {
            Ok("console") | Ok("pretty") => LogFormat::Console,
            _ => LogFormat::Json,
        };
        let debug = std::env::var("CHPRO_DEBUG")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);
        Self { debug, format }
    }

    /// Same as [`LoggingConfig::from_env`], with debug also enabled by the
    /// cluster configuration.
    pub fn for_cluster(config: &ClusterConfig) -> Self {
        let mut logging = Self::from_env();
        logging.debug |= config.debug;
        logging
    }

    fn default_filter(&self) -> &'static str {
        if self.debug {
            DEBUG_FILTER
        } else {
            DEFAULT_FILTER
        }
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter()));

    let (json, console) = match config.format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Console => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json)
        .with(console)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            field: "logging".to_string(),
            value: format!("{:?}", config.format),
            reason: format!("Failed to init subscriber: {}", e),
        })?;

    tracing::info!(debug = config.debug, format = ?config.format, "Logging initialized");
    Ok(())
}
