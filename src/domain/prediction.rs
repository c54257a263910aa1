//! Final forecast payloads handed to callers and the result cache.

use crate::domain::horizon::Horizon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Trading signal derived from a horizon forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "STRONG BUY")]
    StrongBuy,
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "NEUTRAL")]
    Neutral,
    #[serde(rename = "SELL")]
    Sell,
    #[serde(rename = "STRONG SELL")]
    StrongSell,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Signal::StrongBuy => "STRONG BUY",
            Signal::Buy => "BUY",
            Signal::Neutral => "NEUTRAL",
            Signal::Sell => "SELL",
            Signal::StrongSell => "STRONG SELL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Forecast for a single horizon, rounded for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonForecast {
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub confidence: f64,
    pub signal: Signal,
}

impl HorizonForecast {
    /// Rounds price/change/percent to 2dp and confidence to 3dp.
    pub fn new(price: f64, change: f64, change_percent: f64, confidence: f64, signal: Signal) -> Self {
        Self {
            price: round_to(price, 2),
            change: round_to(change, 2),
            change_percent: round_to(change_percent, 2),
            confidence: round_to(confidence, 3),
            signal,
        }
    }
}

/// Multi-horizon forecast for one symbol. Immutable once built.
///
/// `signal` and `overall_confidence` summarize the whole payload: the 7-day
/// call, or the 1-day call when the week is neutral or missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub symbol: String,
    pub current_price: f64,
    pub timestamp: DateTime<Utc>,
    pub predictions: BTreeMap<Horizon, HorizonForecast>,
    pub signal: Signal,
    pub overall_confidence: f64,
    pub reasoning: String,
}

impl PredictionResult {
    pub fn forecast(&self, horizon: Horizon) -> Option<&HorizonForecast> {
        self.predictions.get(&horizon)
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
