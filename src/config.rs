use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub chain_id: u64,
    pub private_key: String,
    pub database_url: String,
    pub poll_interval_ms: u64,
    pub max_retries: i32,
    pub worker_count: usize,
    pub max_gas_price_multiplier: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            rpc_url: std::env::var("RPC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            chain_id: parse_var("CHAIN_ID", "1")?,
            private_key: std::env::var("PRIVATE_KEY")
                .map_err(|_| ConfigError::MissingVar("PRIVATE_KEY"))?,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/settler".to_string()),
            poll_interval_ms: parse_var("POLL_INTERVAL_MS", "2000")?,
            max_retries: parse_var("MAX_RETRIES", "3")?,
            worker_count: parse_var("WORKER_COUNT", "2")?,
            max_gas_price_multiplier: parse_var("MAX_GAS_PRICE_MULTIPLIER", "3")?,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>().map_err(|_| ConfigError::InvalidVar {
        name,
        value: raw.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_var_falls_back_to_default() {
        let value: u64 = parse_var("SETTLER_TEST_UNSET_VAR", "2000").unwrap();
        assert_eq!(value, 2000);
    }
}
