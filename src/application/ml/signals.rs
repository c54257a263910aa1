//! Price, signal and reasoning derivation from ensemble returns.

use crate::domain::horizon::Horizon;
use crate::domain::prediction::{HorizonForecast, Signal};
use std::collections::BTreeMap;

pub const STRONG_MIN_CONFIDENCE: f64 = 0.65;
pub const MIN_CONFIDENCE: f64 = 0.55;

/// Percent-change bands for one horizon. Longer horizons tolerate larger
/// moves before signalling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalThresholds {
    pub strong_percent: f64,
    pub percent: f64,
}

impl SignalThresholds {
    pub fn for_horizon(horizon: Horizon) -> Self {
        match horizon {
            Horizon::OneDay => Self {
                strong_percent: 1.2,
                percent: 0.5,
            },
            Horizon::SevenDay => Self {
                strong_percent: 3.0,
                percent: 1.2,
            },
            Horizon::ThirtyDay => Self {
                strong_percent: 6.0,
                percent: 2.5,
            },
        }
    }

    /// Both the move size and the confidence must clear a band.
    pub fn classify(&self, change_percent: f64, confidence: f64) -> Signal {
        let strong = confidence >= STRONG_MIN_CONFIDENCE;
        let plain = confidence >= MIN_CONFIDENCE;

        if change_percent > self.strong_percent && strong {
            Signal::StrongBuy
        } else if change_percent > self.percent && plain {
            Signal::Buy
        } else if change_percent < -self.strong_percent && strong {
            Signal::StrongSell
        } else if change_percent < -self.percent && plain {
            Signal::Sell
        } else {
            Signal::Neutral
        }
    }
}

/// `current * exp(cumulative_return)` plus the derived signal.
pub fn derive_forecast(
    horizon: Horizon,
    current_price: f64,
    cumulative_return: f64,
    confidence: f64,
) -> HorizonForecast {
    let price = current_price * cumulative_return.exp();
    let change = price - current_price;
    let change_percent = if current_price != 0.0 {
        change / current_price * 100.0
    } else {
        0.0
    };
    let signal = SignalThresholds::for_horizon(horizon).classify(change_percent, confidence);
    HorizonForecast::new(price, change, change_percent, confidence, signal)
}

/// Payload-level call: the 7-day signal, or the 1-day one when the week is
/// neutral or absent. `(Neutral, 0.0)` when neither horizon was forecast.
pub fn headline(forecasts: &BTreeMap<Horizon, HorizonForecast>) -> (Signal, f64) {
    let week = forecasts.get(&Horizon::SevenDay);
    let day = forecasts.get(&Horizon::OneDay);
    let chosen = match (week, day) {
        (Some(w), _) if w.signal != Signal::Neutral => Some(w),
        (_, Some(d)) if d.signal != Signal::Neutral => Some(d),
        (Some(w), _) => Some(w),
        (None, d) => d,
    };
    chosen.map_or((Signal::Neutral, 0.0), |f| (f.signal, f.confidence))
}

pub const INSUFFICIENT_REASONING: &str = "Insufficient data to generate detailed reasoning.";

/// Descriptive summary anchored on the 7-day forecast.
pub fn reasoning(symbol: &str, forecasts: &BTreeMap<Horizon, HorizonForecast>) -> String {
    let Some(week) = forecasts.get(&Horizon::SevenDay) else {
        return INSUFFICIENT_REASONING.to_string();
    };

    let (action, outlook) = match week.signal {
        Signal::StrongBuy => ("accumulate", "positive"),
        Signal::Buy => ("buy", "positive"),
        Signal::StrongSell => ("reduce exposure", "negative"),
        Signal::Sell => ("sell", "negative"),
        Signal::Neutral => ("hold", "neutral"),
    };

    let strength = if week.confidence > 0.75 {
        "high"
    } else if week.confidence > 0.6 {
        "moderate"
    } else {
        "low"
    };

    let mut parts = vec![
        format!(
            "The model suggests to {} {} based on a {} 7-day outlook.",
            action, symbol, outlook
        ),
        format!(
            "It shows {} confidence ({}%) in a projected move of {:+.2}% over the next week.",
            strength,
            (week.confidence * 100.0).round() as i64,
            week.change_percent
        ),
    ];

    if let (Some(day), Some(month)) = (
        forecasts.get(&Horizon::OneDay),
        forecasts.get(&Horizon::ThirtyDay),
    ) {
        let short_agrees = day.signal == week.signal;
        let long_agrees = month.signal == week.signal;
        let confluence = match (short_agrees, long_agrees) {
            (true, true) => {
                "This trend is supported by both short-term momentum and long-term forecasts (full confluence)."
            }
            (false, true) => {
                "While short-term volatility exists, the long-term trend remains aligned with the weekly forecast."
            }
            (true, false) => {
                "Short-term momentum is building, though the monthly trend is yet to confirm."
            }
            (false, false) => {
                "Signals are mixed across horizons, suggesting potential consolidation or volatility."
            }
        };
        parts.push(confluence.to_string());
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seven_day_buy_band() {
        let forecast = derive_forecast(Horizon::SevenDay, 100.0, 0.02, 0.70);
        assert_eq!(forecast.price, 102.02);
        assert_eq!(forecast.change, 2.02);
        assert_eq!(forecast.change_percent, 2.02);
        assert_eq!(forecast.confidence, 0.7);
        assert_eq!(forecast.signal, Signal::Buy);
    }

    #[test]
    fn test_confidence_gates_signal() {
        let one_day = SignalThresholds::for_horizon(Horizon::OneDay);
        assert_eq!(one_day.classify(1.5, 0.70), Signal::StrongBuy);
        assert_eq!(one_day.classify(1.5, 0.60), Signal::Buy);
        assert_eq!(one_day.classify(1.5, 0.50), Signal::Neutral);
        assert_eq!(one_day.classify(-1.5, 0.65), Signal::StrongSell);
        assert_eq!(one_day.classify(-0.6, 0.55), Signal::Sell);
        assert_eq!(one_day.classify(0.4, 0.95), Signal::Neutral);
    }

    #[test]
    fn test_thresholds_loosen_with_horizon() {
        // 2% is strong over one day and noise over thirty
        assert_eq!(
            SignalThresholds::for_horizon(Horizon::OneDay).classify(2.0, 0.8),
            Signal::StrongBuy
        );
        assert_eq!(
            SignalThresholds::for_horizon(Horizon::ThirtyDay).classify(2.0, 0.8),
            Signal::Neutral
        );
        assert_eq!(
            SignalThresholds::for_horizon(Horizon::ThirtyDay).classify(-7.0, 0.8),
            Signal::StrongSell
        );
    }

    #[test]
    fn test_reasoning_confluence() {
        let mut forecasts = BTreeMap::new();
        forecasts.insert(Horizon::SevenDay, derive_forecast(Horizon::SevenDay, 100.0, 0.02, 0.70));
        let text = reasoning("XYZ", &forecasts);
        assert!(text.starts_with("The model suggests to buy XYZ based on a positive 7-day outlook."));
        assert!(text.contains("moderate confidence (70%)"));
        assert!(text.contains("+2.02%"));
        assert!(!text.contains("confluence"));

        forecasts.insert(Horizon::OneDay, derive_forecast(Horizon::OneDay, 100.0, 0.008, 0.70));
        forecasts.insert(Horizon::ThirtyDay, derive_forecast(Horizon::ThirtyDay, 100.0, 0.03, 0.70));
        assert!(reasoning("XYZ", &forecasts).contains("full confluence"));

        forecasts.insert(Horizon::OneDay, derive_forecast(Horizon::OneDay, 100.0, -0.02, 0.70));
        assert!(reasoning("XYZ", &forecasts).contains("long-term trend remains aligned"));
    }

    #[test]
    fn test_headline_prefers_week_then_day() {
        let mut forecasts = BTreeMap::new();
        assert_eq!(headline(&forecasts), (Signal::Neutral, 0.0));

        forecasts.insert(Horizon::ThirtyDay, derive_forecast(Horizon::ThirtyDay, 100.0, 0.2, 0.9));
        assert_eq!(headline(&forecasts), (Signal::Neutral, 0.0));

        forecasts.insert(Horizon::OneDay, derive_forecast(Horizon::OneDay, 100.0, -0.02, 0.70));
        assert_eq!(headline(&forecasts), (Signal::StrongSell, 0.7));

        // A neutral week defers to a decisive day
        forecasts.insert(Horizon::SevenDay, derive_forecast(Horizon::SevenDay, 100.0, 0.0, 0.62));
        assert_eq!(headline(&forecasts), (Signal::StrongSell, 0.7));

        forecasts.insert(Horizon::SevenDay, derive_forecast(Horizon::SevenDay, 100.0, 0.02, 0.70));
        assert_eq!(headline(&forecasts), (Signal::Buy, 0.7));

        // Both quiet: the week's confidence is reported
        forecasts.insert(Horizon::OneDay, derive_forecast(Horizon::OneDay, 100.0, 0.0, 0.9));
        forecasts.insert(Horizon::SevenDay, derive_forecast(Horizon::SevenDay, 100.0, 0.0, 0.62));
        assert_eq!(headline(&forecasts), (Signal::Neutral, 0.62));
    }

    #[test]
    fn test_reasoning_without_week() {
        let mut forecasts = BTreeMap::new();
        forecasts.insert(Horizon::OneDay, derive_forecast(Horizon::OneDay, 50.0, 0.0, 0.9));
        assert_eq!(reasoning("XYZ", &forecasts), INSUFFICIENT_REASONING);
    }
}
