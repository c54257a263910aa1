//! Model inputs produced by the temporal aligner.

use crate::domain::horizon::Horizon;
use chrono::NaiveDate;
use ndarray::Array2;
use std::collections::BTreeMap;

/// `L` consecutive feature rows (`[features..., log_return]`) ending the day
/// before `target_date`.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceWindow {
    /// First forecast day (1-day target). `None` for live inference, where
    /// the next trading date is not yet known.
    pub target_date: Option<NaiveDate>,
    pub values: Array2<f64>,
}

impl SequenceWindow {
    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn width(&self) -> usize {
        self.values.ncols()
    }
}

/// Training/validation windows with their cumulative-return targets.
#[derive(Debug, Clone, Default)]
pub struct SequenceSamples {
    pub windows: Vec<SequenceWindow>,
    pub targets: BTreeMap<Horizon, Vec<f64>>,
    pub target_dates: Vec<NaiveDate>,
}

impl SequenceSamples {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Flat rows for the tabular model at one horizon.
///
/// `rows[k]` holds features of the day before `target_dates[k]`.
#[derive(Debug, Clone, Default)]
pub struct TabularSamples {
    pub horizon: Option<Horizon>,
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    pub target_dates: Vec<NaiveDate>,
}

impl TabularSamples {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
