//! Forecast horizons.
//!
//! Horizons are a closed set so that per-horizon maps (weights, models,
//! predictions) can never be keyed by an unknown value.

use crate::domain::errors::PredictionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of days ahead a forecast targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDay,
    #[serde(rename = "30d")]
    ThirtyDay,
}

impl Horizon {
    /// All horizons in evaluation order.
    pub const ALL: [Horizon; 3] = [Horizon::OneDay, Horizon::SevenDay, Horizon::ThirtyDay];

    pub fn days(self) -> usize {
        match self {
            Horizon::OneDay => 1,
            Horizon::SevenDay => 7,
            Horizon::ThirtyDay => 30,
        }
    }

    /// Short label used in artifact file names and serialized payloads.
    pub fn label(self) -> &'static str {
        match self {
            Horizon::OneDay => "1d",
            Horizon::SevenDay => "7d",
            Horizon::ThirtyDay => "30d",
        }
    }

    /// Longest horizon in the set.
    pub fn max_days() -> usize {
        Self::ALL.iter().map(|h| h.days()).max().unwrap_or(0)
    }
}

impl TryFrom<u32> for Horizon {
    type Error = PredictionError;

    fn try_from(days: u32) -> Result<Self, Self::Error> {
        match days {
            1 => Ok(Horizon::OneDay),
            7 => Ok(Horizon::SevenDay),
            30 => Ok(Horizon::ThirtyDay),
            other => Err(PredictionError::InvalidHorizon(other)),
        }
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
