//! Serving settings: cache sizes, inference concurrency and external
//! endpoints.

use super::{Lookup, optional, parse_or};
use anyhow::{Result, ensure};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServingEnvConfig {
    pub model_cache_capacity: usize,
    pub inference_permits: usize,
    pub result_cache_ttl: Duration,
    pub market_data_timeout: Duration,
    pub market_data_url: Option<String>,
    /// In-memory result store when absent
    pub redis_url: Option<String>,
    pub preload_symbols: Vec<String>,
}

impl Default for ServingEnvConfig {
    fn default() -> Self {
        Self {
            model_cache_capacity: 50,
            inference_permits: 1,
            result_cache_ttl: Duration::from_secs(300),
            market_data_timeout: Duration::from_secs(30),
            market_data_url: None,
            redis_url: None,
            preload_symbols: Vec::new(),
        }
    }
}

impl ServingEnvConfig {
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let model_cache_capacity = parse_or(lookup, "MODEL_CACHE_CAPACITY", 50usize)?;
        let inference_permits = parse_or(lookup, "INFERENCE_PERMITS", 1usize)?;
        ensure!(model_cache_capacity >= 1, "MODEL_CACHE_CAPACITY must be at least 1");
        ensure!(inference_permits >= 1, "INFERENCE_PERMITS must be at least 1");

        let preload_symbols = optional(lookup, "PRELOAD_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            model_cache_capacity,
            inference_permits,
            result_cache_ttl: Duration::from_secs(parse_or(lookup, "RESULT_CACHE_TTL_SECS", 300u64)?),
            market_data_timeout: Duration::from_secs(parse_or(
                lookup,
                "MARKET_DATA_TIMEOUT_SECS",
                30u64,
            )?),
            market_data_url: optional(lookup, "MARKET_DATA_URL"),
            redis_url: optional(lookup, "REDIS_URL"),
            preload_symbols,
        })
    }
}
