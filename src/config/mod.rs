//! Configuration module for finpredict.
//!
//! Values come from environment variables (after `.env` via dotenvy),
//! grouped into the offline pipeline and the serving layer. Every section
//! can also be built from an arbitrary key lookup, which is how tests feed
//! it without touching the process environment.

mod pipeline_config;
mod serving_config;

pub use pipeline_config::PipelineEnvConfig;
pub use serving_config::ServingEnvConfig;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Key lookup used by every config section.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub(crate) fn parse_or<T>(lookup: Lookup<'_>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Failed to parse {}={:?}", key, raw)),
        _ => Ok(default),
    }
}

pub(crate) fn string_or(lookup: Lookup<'_>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn optional(lookup: Lookup<'_>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineEnvConfig,
    pub serving: ServingEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let lookup = |key: &str| env::var(key).ok();
        Self::from_lookup(&lookup)
    }

    pub fn from_map(values: &HashMap<String, String>) -> Result<Self> {
        let lookup = |key: &str| values.get(key).cloned();
        Self::from_lookup(&lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self> {
        let pipeline =
            PipelineEnvConfig::from_lookup(lookup).context("Failed to load pipeline config")?;
        let serving =
            ServingEnvConfig::from_lookup(lookup).context("Failed to load serving config")?;
        Ok(Self { pipeline, serving })
    }
}
