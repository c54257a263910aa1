use crate::domain::features::{FeatureRow, FeatureTable};
use crate::domain::ports::MarketDataSource;
use crate::infrastructure::http_client_factory::{DEFAULT_MAX_RETRIES, HttpClientFactory, join_url};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct FeaturesResponse {
    feature_names: Vec<String>,
    rows: Vec<FeatureRow>,
}

/// Fetches fresh feature tables from `GET {base}/features/{SYMBOL}`.
pub struct HttpMarketDataSource {
    client: ClientWithMiddleware,
    base_url: String,
}

impl HttpMarketDataSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: HttpClientFactory::create_client(timeout, DEFAULT_MAX_RETRIES),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MarketDataSource for HttpMarketDataSource {
    async fn fetch_features(&self, symbol: &str) -> Result<FeatureTable> {
        let url = join_url(&self.base_url, &["features", symbol]);
        debug!("Fetching live features from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch features for {}", symbol))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Feature fetch for {} failed ({}): {}", symbol, status, error_text);
        }

        let body: FeaturesResponse = response
            .json()
            .await
            .context("Failed to parse features response")?;
        Ok(FeatureTable::new(symbol, body.feature_names, body.rows)?)
    }
}
