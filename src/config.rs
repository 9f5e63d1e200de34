use crate::orchestration::{ClosingPolicy, IngestPolicy, SweepPolicy};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub scope_prefix: String,
    pub idempotency_ttl_ms: i64,
    pub pipeline_retry_initial_ms: u64,
    pub pipeline_retry_max_elapsed_ms: u64,
    pub closing_batch_size: i64,
    pub closing_retry_delay_ms: i64,
    pub closing_max_retries: u32,
    pub closing_interval_secs: u64,
    pub sweep_batch_size: i64,
    pub sweep_base_delay_ms: i64,
    pub sweep_backoff_factor: u32,
    pub sweep_max_retries: u32,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let scope_prefix = env_map
            .get("IDEMPOTENCY_SCOPE_PREFIX")
            .cloned()
            .unwrap_or_else(|| "aegmall".to_string());

        Ok(Config {
            database_path,
            scope_prefix,
            idempotency_ttl_ms: parse_int_from_map(&env_map, "IDEMPOTENCY_TTL_MS", "86400000")?,
            pipeline_retry_initial_ms: parse_int_from_map(
                &env_map,
                "PIPELINE_RETRY_INITIAL_MS",
                "1000",
            )?,
            pipeline_retry_max_elapsed_ms: parse_int_from_map(
                &env_map,
                "PIPELINE_RETRY_MAX_ELAPSED_MS",
                "5000",
            )?,
            closing_batch_size: parse_int_from_map(&env_map, "CLOSING_BATCH_SIZE", "500")?,
            closing_retry_delay_ms: parse_int_from_map(&env_map, "CLOSING_RETRY_DELAY_MS", "600000")?,
            closing_max_retries: parse_int_from_map(&env_map, "CLOSING_MAX_RETRIES", "5")?,
            closing_interval_secs: parse_int_from_map(&env_map, "CLOSING_INTERVAL_SECS", "60")?,
            sweep_batch_size: parse_int_from_map(&env_map, "SWEEP_BATCH_SIZE", "100")?,
            sweep_base_delay_ms: parse_int_from_map(&env_map, "SWEEP_BASE_DELAY_MS", "900000")?,
            sweep_backoff_factor: parse_int_from_map(&env_map, "SWEEP_BACKOFF_FACTOR", "2")?,
            sweep_max_retries: parse_int_from_map(&env_map, "SWEEP_MAX_RETRIES", "5")?,
            sweep_interval_secs: parse_int_from_map(&env_map, "SWEEP_INTERVAL_SECS", "30")?,
        })
    }

    pub fn ingest_policy(&self) -> IngestPolicy {
        IngestPolicy {
            scope_prefix: self.scope_prefix.clone(),
            idempotency_ttl_ms: self.idempotency_ttl_ms,
            pipeline_retry_initial_ms: self.pipeline_retry_initial_ms,
            pipeline_retry_max_elapsed_ms: self.pipeline_retry_max_elapsed_ms,
        }
    }

    pub fn closing_policy(&self) -> ClosingPolicy {
        ClosingPolicy {
            batch_size: self.closing_batch_size,
            retry_delay_ms: self.closing_retry_delay_ms,
            max_retries: self.closing_max_retries,
        }
    }

    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            batch_size: self.sweep_batch_size,
            base_delay_ms: self.sweep_base_delay_ms,
            backoff_factor: self.sweep_backoff_factor,
            max_retries: self.sweep_max_retries,
        }
    }
}

fn parse_int_from_map<T>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    env_map
        .get(key)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .parse::<T>()
        .map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), "must be a valid integer".to_string())
        })
}
