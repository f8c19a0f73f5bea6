use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::kernel::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY};
use crate::kernel::stream_hub::DEFAULT_CHANNEL_CAPACITY;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub database_max_connections: u32,
    pub tx_max_retries: u32,
    pub tx_retry_base_delay: Duration,
    /// Buffered updates per SSE topic before slow subscribers lag
    pub update_channel_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
            tx_max_retries: env::var("TX_MAX_RETRIES")
                .map(|v| v.parse())
                .unwrap_or(Ok(DEFAULT_MAX_RETRIES))
                .context("TX_MAX_RETRIES must be a valid number")?,
            tx_retry_base_delay: env::var("TX_RETRY_BASE_DELAY_MS")
                .map(|v| v.parse().map(Duration::from_millis))
                .unwrap_or(Ok(DEFAULT_RETRY_BASE_DELAY))
                .context("TX_RETRY_BASE_DELAY_MS must be a number of milliseconds")?,
            update_channel_capacity: env::var("UPDATE_CHANNEL_CAPACITY")
                .map(|v| v.parse())
                .unwrap_or(Ok(DEFAULT_CHANNEL_CAPACITY))
                .context("UPDATE_CHANNEL_CAPACITY must be a valid number")?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.tx_max_retries, self.tx_retry_base_delay)
    }
}
