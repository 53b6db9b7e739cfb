use std::env;
use std::path::PathBuf;
use std::time::Duration;

use abstractor::ControllerConfig;
use abstractor_client::{AbstractorClient, DEFAULT_BASE_URL};
use anyhow::{Context, Result};
use dotenvy::dotenv;

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub output_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            api_base_url: env::var("ABSTRACTOR_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: env::var("ABSTRACTOR_API_KEY").ok().filter(|k| !k.is_empty()),
            timeout: Duration::from_secs(
                env::var("ABSTRACTOR_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("ABSTRACTOR_TIMEOUT_SECS must be a valid number")?,
            ),
            poll_interval: Duration::from_secs(
                env::var("ABSTRACTOR_POLL_INTERVAL_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("ABSTRACTOR_POLL_INTERVAL_SECS must be a valid number")?,
            ),
            max_poll_attempts: env::var("ABSTRACTOR_MAX_POLL_ATTEMPTS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("ABSTRACTOR_MAX_POLL_ATTEMPTS must be a valid number")?,
            output_dir: env::var("ABSTRACTOR_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        })
    }

    pub fn client(&self) -> AbstractorClient {
        let client = AbstractorClient::new(&self.api_base_url).with_timeout(self.timeout);
        match &self.api_key {
            Some(key) => client.with_api_key(key),
            None => client,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::new()
            .with_poll_interval(self.poll_interval)
            .with_max_poll_attempts(self.max_poll_attempts)
    }
}
