use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The classification backend rejects batches larger than this.
pub const BACKEND_MAX_BATCH_SIZE: usize = 5;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Rocket server port to run the proxy on
    #[arg(long)]
    pub port: Option<u16>,

    /// Classification backend full URL
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Maximum sequences per backend call, capped at the backend's limit of 5
    #[arg(long)]
    pub max_batch_size: Option<usize>,

    /// Backend request timeout in seconds
    #[arg(long)]
    pub backend_timeout_secs: Option<u64>,

    /// Minimum wait after the backend answers 429, in milliseconds
    #[arg(long)]
    pub throttle_backoff_ms: Option<u64>,

    /// Log level filter (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Suppress Rocket startup output. Used in tests
    #[arg(long)]
    pub quiet_mode: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub port: u16,
    pub backend_url: String,
    pub max_batch_size: usize,
    pub backend_timeout_secs: u64,
    pub throttle_backoff_ms: u64,
    pub log_level: String,
    pub quiet_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            backend_url: "http://127.0.0.1:8001/classify".to_string(),
            max_batch_size: BACKEND_MAX_BATCH_SIZE,
            backend_timeout_secs: 30,
            throttle_backoff_ms: 10,
            log_level: "info".to_string(),
            quiet_mode: false,
        }
    }
}

impl AppConfig {
    /// Build config from CLI args and defaults
    pub fn build(args: Option<Args>) -> Result<Self, String> {
        let mut config = Self::default();
        if let Some(args) = args {
            if let Some(port) = args.port {
                config.port = port;
            }
            if let Some(backend_url) = args.backend_url {
                config.backend_url = backend_url;
            }
            if let Some(max_batch_size) = args.max_batch_size {
                if max_batch_size == 0 {
                    return Err("max_batch_size must be > 0".to_string());
                }
                if max_batch_size > BACKEND_MAX_BATCH_SIZE {
                    return Err(format!(
                        "max_batch_size must be <= {BACKEND_MAX_BATCH_SIZE} (backend limit)"
                    ));
                }
                config.max_batch_size = max_batch_size;
            }
            if let Some(backend_timeout_secs) = args.backend_timeout_secs {
                if backend_timeout_secs == 0 {
                    return Err("backend_timeout_secs must be > 0".to_string());
                }
                config.backend_timeout_secs = backend_timeout_secs;
            }
            if let Some(throttle_backoff_ms) = args.throttle_backoff_ms {
                config.throttle_backoff_ms = throttle_backoff_ms;
            }
            if let Some(log_level) = args.log_level {
                config.log_level = log_level;
            }
            if let Some(quiet_mode) = args.quiet_mode {
                config.quiet_mode = quiet_mode;
            }
        }
        Ok(config)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn throttle_backoff(&self) -> Duration {
        Duration::from_millis(self.throttle_backoff_ms)
    }

    /// Initialize logging with env_logger (simpler approach)
    pub fn init_logging(&self) -> String {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(&self.log_level),
        )
        .init();
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.log_level.clone())
    }
}
