//! Weighted blend of the sequence and tabular models.
//!
//! The sequence model emits standardized, horizon-summed returns; the tabular
//! model emits real cumulative returns (its target is built from raw returns).
//! Sequence outputs are de-standardized with `inverse_cumulative` before the
//! blend so both terms share units.

use crate::application::ml::scaler::ReturnScaler;
use crate::domain::errors::PredictionError;
use crate::domain::horizon::Horizon;
use crate::domain::ml::{SequenceSamples, SequenceWindow, TabularSamples};
use crate::domain::ports::{SequencePredictor, TabularPredictor};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Guards the agreement ratio against near-zero ensemble moves.
pub const CONFIDENCE_EPSILON: f64 = 1e-8;
pub const CONFIDENCE_FLOOR: f64 = 0.3;
pub const CONFIDENCE_CEILING: f64 = 0.95;

/// Grid step for the sequence-model weight.
pub const WEIGHT_GRID_STEP: f64 = 0.05;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Blend coefficients for one horizon; always sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightPair {
    pub sequence: f64,
    pub tree: f64,
}

impl WeightPair {
    pub const DEFAULT: WeightPair = WeightPair {
        sequence: 0.6,
        tree: 0.4,
    };

    /// Pair from the sequence weight, clamped to [0, 1].
    pub fn from_sequence_weight(sequence: f64) -> Self {
        let sequence = round2(sequence.clamp(0.0, 1.0));
        Self {
            sequence,
            tree: round2(1.0 - sequence),
        }
    }

    /// Both weights finite, within [0, 1] and summing to 1.
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [("sequence", self.sequence), ("tree", self.tree)] {
            anyhow::ensure!(
                w.is_finite() && (0.0..=1.0).contains(&w),
                "{} weight {} outside [0, 1]",
                name,
                w
            );
        }
        let sum = self.sequence + self.tree;
        anyhow::ensure!(
            (sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE,
            "weights sum to {}, expected 1",
            sum
        );
        Ok(())
    }
}

impl Default for WeightPair {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Per-horizon weights learned offline; horizons without an optimized pair
/// use `default`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnsembleWeights {
    #[serde(default)]
    pub default: WeightPair,
    #[serde(default)]
    pub optimized: BTreeMap<Horizon, WeightPair>,
}

impl EnsembleWeights {
    pub fn for_horizon(&self, horizon: Horizon) -> WeightPair {
        self.optimized.get(&horizon).copied().unwrap_or(self.default)
    }

    pub fn validate(&self) -> Result<()> {
        self.default.validate().context("default weights")?;
        for (horizon, pair) in &self.optimized {
            pair.validate()
                .with_context(|| format!("weights for {}", horizon))?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize ensemble weights")?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, content).context("Failed to write weights temp file")?;
        fs::rename(&temp_path, path).context("Failed to rename weights file")?;
        info!("Saved ensemble weights to {:?}", path);
        Ok(())
    }

    /// Weights from disk; a missing file means defaults for every horizon.
    /// A file that parses but holds an invalid pair is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No ensemble weights at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read weights file {:?}", path))?;
        let weights: Self =
            serde_json::from_str(&content).context("Failed to parse ensemble weights JSON")?;
        weights
            .validate()
            .with_context(|| format!("Invalid ensemble weights in {:?}", path))?;
        Ok(weights)
    }
}

/// NaN or infinite model output must not reach the blend or the cache.
fn ensure_finite(model: &str, horizon: Horizon, values: &[f64]) -> Result<(), PredictionError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(PredictionError::InferenceFailed {
            model: model.to_string(),
            reason: format!("non-finite output {} at index {} for {}", values[i], i, horizon),
        }),
        None => Ok(()),
    }
}

/// Agreement-as-confidence heuristic.
///
/// `clip(1 - |seq - tree| / (|ensemble| + eps), 0.3, 0.95)`. This measures how
/// closely the two models agree relative to the size of the predicted move;
/// it is not a calibrated probability.
pub fn agreement_confidence(sequence: f64, tree: f64, ensemble: f64) -> f64 {
    let disagreement = (sequence - tree).abs() / (ensemble.abs() + CONFIDENCE_EPSILON);
    (1.0 - disagreement).clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEILING)
}

fn mean_squared_error(predicted: &[f64], truth: &[f64]) -> f64 {
    let n = predicted.len().min(truth.len());
    if n == 0 {
        return f64::INFINITY;
    }
    predicted
        .iter()
        .zip(truth)
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>()
        / n as f64
}

/// Sequence weights on the 0.05 grid over [0, 1].
pub fn weight_grid() -> Vec<f64> {
    let steps = (1.0 / WEIGHT_GRID_STEP).round() as usize;
    (0..=steps)
        .map(|k| round2(k as f64 * WEIGHT_GRID_STEP))
        .collect()
}

/// Grid search minimizing MSE of `w * seq + (1 - w) * tree` against `truth`.
/// On ties the first (smallest) weight wins.
pub fn grid_search_weight(sequence: &[f64], tree: &[f64], truth: &[f64]) -> (WeightPair, f64) {
    let mut best = (WeightPair { sequence: 0.5, tree: 0.5 }, f64::INFINITY);
    for w in weight_grid() {
        let blended: Vec<f64> = sequence
            .iter()
            .zip(tree)
            .map(|(s, t)| w * s + (1.0 - w) * t)
            .collect();
        let mse = mean_squared_error(&blended, truth);
        if mse < best.1 {
            best = (WeightPair::from_sequence_weight(w), mse);
        }
    }
    best
}

/// Loaded per-horizon predictors.
#[derive(Clone, Default)]
pub struct HorizonModels {
    sequence: BTreeMap<Horizon, Arc<dyn SequencePredictor>>,
    tree: BTreeMap<Horizon, Arc<dyn TabularPredictor>>,
}

impl HorizonModels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        horizon: Horizon,
        sequence: Arc<dyn SequencePredictor>,
        tree: Arc<dyn TabularPredictor>,
    ) {
        self.sequence.insert(horizon, sequence);
        self.tree.insert(horizon, tree);
    }

    pub fn horizons(&self) -> Vec<Horizon> {
        self.sequence
            .keys()
            .filter(|h| self.tree.contains_key(h))
            .copied()
            .collect()
    }

    fn pair(
        &self,
        horizon: Horizon,
    ) -> Result<(&Arc<dyn SequencePredictor>, &Arc<dyn TabularPredictor>), PredictionError> {
        match (self.sequence.get(&horizon), self.tree.get(&horizon)) {
            (Some(seq), Some(tree)) => Ok((seq, tree)),
            _ => Err(PredictionError::InferenceFailed {
                model: "ensemble".to_string(),
                reason: format!("no model pair loaded for {}", horizon),
            }),
        }
    }
}

impl std::fmt::Debug for HorizonModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HorizonModels")
            .field("horizons", &self.horizons())
            .finish()
    }
}

/// Per-horizon blend output, all in real cumulative log-return units.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonEnsemble {
    pub sequence: Vec<f64>,
    pub tree: Vec<f64>,
    pub ensemble: Vec<f64>,
    pub confidence: Vec<f64>,
    pub weights: WeightPair,
}

#[derive(Debug, Clone, Default)]
pub struct EnsembleCombiner {
    weights: EnsembleWeights,
}

impl EnsembleCombiner {
    pub fn new(weights: EnsembleWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &EnsembleWeights {
        &self.weights
    }

    /// Blend one horizon's raw model outputs. Lengths are truncated to the
    /// shorter of the two vectors.
    pub fn combine(
        &self,
        horizon: Horizon,
        sequence_standardized: &[f64],
        tree: &[f64],
        scaler: &ReturnScaler,
    ) -> Result<HorizonEnsemble, PredictionError> {
        let n = sequence_standardized.len().min(tree.len());
        if n == 0 {
            return Err(PredictionError::InferenceFailed {
                model: "ensemble".to_string(),
                reason: format!("empty model output for {}", horizon),
            });
        }

        let sequence = scaler.inverse_cumulative(&sequence_standardized[..n], horizon.days())?;
        let tree = tree[..n].to_vec();
        ensure_finite("sequence", horizon, &sequence)?;
        ensure_finite("tree", horizon, &tree)?;
        let weights = self.weights.for_horizon(horizon);

        let ensemble: Vec<f64> = sequence
            .iter()
            .zip(&tree)
            .map(|(s, t)| weights.sequence * s + weights.tree * t)
            .collect();
        ensure_finite("ensemble", horizon, &ensemble)?;
        let confidence = sequence
            .iter()
            .zip(&tree)
            .zip(&ensemble)
            .map(|((s, t), e)| agreement_confidence(*s, *t, *e))
            .collect();

        Ok(HorizonEnsemble {
            sequence,
            tree,
            ensemble,
            confidence,
            weights,
        })
    }

    /// Run both models for every horizon in `tabular_inputs` and blend.
    pub fn predict(
        &self,
        models: &HorizonModels,
        scaler: &ReturnScaler,
        sequence_input: &[SequenceWindow],
        tabular_inputs: &BTreeMap<Horizon, Vec<Vec<f64>>>,
    ) -> Result<BTreeMap<Horizon, HorizonEnsemble>, PredictionError> {
        let mut out = BTreeMap::new();
        for (horizon, rows) in tabular_inputs {
            let (seq_model, tree_model) = models.pair(*horizon)?;
            let seq_pred = seq_model.predict(sequence_input)?;
            ensure_finite(seq_model.name(), *horizon, &seq_pred)?;
            let tree_pred = tree_model.predict(rows)?;
            ensure_finite(tree_model.name(), *horizon, &tree_pred)?;
            out.insert(*horizon, self.combine(*horizon, &seq_pred, &tree_pred, scaler)?);
        }
        Ok(out)
    }

    /// Learn per-horizon weights on held-out samples.
    ///
    /// Sequence windows are joined to tabular rows by target date; the ground
    /// truth is the tabular (raw, unstandardized) cumulative return.
    pub fn optimize_weights(
        &self,
        models: &HorizonModels,
        scaler: &ReturnScaler,
        sequence: &SequenceSamples,
        tabular: &BTreeMap<Horizon, TabularSamples>,
    ) -> Result<EnsembleWeights, PredictionError> {
        let index: HashMap<_, _> = sequence
            .target_dates
            .iter()
            .enumerate()
            .map(|(i, d)| (*d, i))
            .collect();

        let mut weights = EnsembleWeights {
            default: self.weights.default,
            optimized: self.weights.optimized.clone(),
        };

        for (horizon, samples) in tabular {
            let (seq_model, tree_model) = models.pair(*horizon)?;

            let mut windows = Vec::with_capacity(samples.len());
            let mut rows = Vec::with_capacity(samples.len());
            let mut truth = Vec::with_capacity(samples.len());
            for (k, date) in samples.target_dates.iter().enumerate() {
                if let Some(&i) = index.get(date) {
                    windows.push(sequence.windows[i].clone());
                    rows.push(samples.rows[k].clone());
                    truth.push(samples.targets[k]);
                }
            }
            if windows.is_empty() {
                debug!("No overlapping validation samples for {}, keeping weights", horizon);
                continue;
            }

            let seq_std = seq_model.predict(&windows)?;
            ensure_finite(seq_model.name(), *horizon, &seq_std)?;
            let tree_pred = tree_model.predict(&rows)?;
            ensure_finite(tree_model.name(), *horizon, &tree_pred)?;
            let n = seq_std.len().min(tree_pred.len()).min(truth.len());
            let seq_real = scaler.inverse_cumulative(&seq_std[..n], horizon.days())?;

            let (best, mse) = grid_search_weight(&seq_real, &tree_pred[..n], &truth[..n]);
            info!(
                "{}: sequence={:.2}, tree={:.2} (MSE: {:.6}, n={})",
                horizon, best.sequence, best.tree, mse, n
            );
            weights.optimized.insert(*horizon, best);
        }

        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    struct FixedSequence(Vec<f64>);

    impl SequencePredictor for FixedSequence {
        fn predict(&self, windows: &[SequenceWindow]) -> Result<Vec<f64>, PredictionError> {
            Ok(self.0.iter().copied().cycle().take(windows.len()).collect())
        }

        fn name(&self) -> &str {
            "fixed-sequence"
        }
    }

    struct FixedTree(Vec<f64>);

    impl TabularPredictor for FixedTree {
        fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, PredictionError> {
            Ok(self.0.iter().copied().cycle().take(rows.len()).collect())
        }

        fn name(&self) -> &str {
            "fixed-tree"
        }
    }

    fn unit_scaler() -> ReturnScaler {
        // mean 0, std 1 target statistics: inverse_cumulative is identity
        let mut scaler = ReturnScaler::new();
        scaler.fit_target(&[-1.0, 1.0]).unwrap();
        scaler
    }

    fn window() -> SequenceWindow {
        SequenceWindow {
            target_date: None,
            values: Array2::zeros((3, 2)),
        }
    }

    #[test]
    fn test_confidence_bounds() {
        assert_eq!(agreement_confidence(0.02, 0.02, 0.02), CONFIDENCE_CEILING);
        assert_eq!(agreement_confidence(0.05, -0.05, 0.01), CONFIDENCE_FLOOR);
        // Both near zero: epsilon keeps the ratio finite
        let c = agreement_confidence(0.0, 0.0, 0.0);
        assert!(c.is_finite());
        assert_eq!(c, CONFIDENCE_CEILING);
        let mid = agreement_confidence(0.022, 0.018, 0.02);
        assert!((mid - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_default_weights_fallback() {
        let mut weights = EnsembleWeights::default();
        weights
            .optimized
            .insert(Horizon::SevenDay, WeightPair::from_sequence_weight(0.25));

        assert_eq!(weights.for_horizon(Horizon::OneDay), WeightPair::DEFAULT);
        assert_eq!(weights.for_horizon(Horizon::SevenDay).tree, 0.75);
    }

    #[test]
    fn test_combine_applies_inverse_and_weights() {
        let mut scaler = ReturnScaler::new();
        // mean 0.001, std 0.01
        scaler.fit_target(&[-0.009, 0.011]).unwrap();
        let combiner = EnsembleCombiner::default();

        let out = combiner
            .combine(Horizon::SevenDay, &[1.0, 2.0, 3.0], &[0.02, 0.03], &scaler)
            .unwrap();
        assert_eq!(out.ensemble.len(), 2);
        // 1.0 * 0.01 + 7 * 0.001
        assert!((out.sequence[0] - 0.017).abs() < 1e-12);
        assert!((out.ensemble[0] - (0.6 * 0.017 + 0.4 * 0.02)).abs() < 1e-12);
        assert_eq!(out.weights, WeightPair::DEFAULT);
    }

    #[test]
    fn test_grid_search_finds_known_weight() {
        let seq: Vec<f64> = (0..50).map(|i| ((i as f64) * 0.3).sin() * 0.02).collect();
        let tree: Vec<f64> = (0..50).map(|i| ((i as f64) * 0.7).cos() * 0.02).collect();
        let truth: Vec<f64> = seq
            .iter()
            .zip(&tree)
            .map(|(s, t)| 0.35 * s + 0.65 * t)
            .collect();

        let (best, best_mse) = grid_search_weight(&seq, &tree, &truth);
        assert_eq!(best.sequence, 0.35);
        assert_eq!(best.tree, 0.65);

        for w in weight_grid() {
            let blended: Vec<f64> = seq
                .iter()
                .zip(&tree)
                .map(|(s, t)| w * s + (1.0 - w) * t)
                .collect();
            assert!(best_mse <= mean_squared_error(&blended, &truth));
        }
    }

    #[test]
    fn test_grid_search_ties_keep_first() {
        let flat = vec![0.0, 0.0, 0.0];
        let (best, _) = grid_search_weight(&flat, &flat, &[0.01, 0.02, -0.01]);
        assert_eq!(best.sequence, 0.0);
        assert_eq!(best.tree, 1.0);
    }

    #[test]
    fn test_weight_grid_shape() {
        let grid = weight_grid();
        assert_eq!(grid.len(), 21);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[7], 0.35);
        assert_eq!(grid[20], 1.0);
    }

    #[test]
    fn test_predict_uses_model_pairs() {
        let mut models = HorizonModels::new();
        models.insert(
            Horizon::OneDay,
            Arc::new(FixedSequence(vec![0.01])),
            Arc::new(FixedTree(vec![0.01])),
        );

        let mut inputs = BTreeMap::new();
        inputs.insert(Horizon::OneDay, vec![vec![0.0; 4]]);
        let combiner = EnsembleCombiner::default();
        let out = combiner
            .predict(&models, &unit_scaler(), &[window()], &inputs)
            .unwrap();
        let one = &out[&Horizon::OneDay];
        assert!((one.ensemble[0] - 0.01).abs() < 1e-12);
        assert_eq!(one.confidence[0], CONFIDENCE_CEILING);

        inputs.insert(Horizon::ThirtyDay, vec![vec![0.0; 4]]);
        let missing = combiner.predict(&models, &unit_scaler(), &[window()], &inputs);
        assert!(matches!(missing, Err(PredictionError::InferenceFailed { .. })));
    }

    #[test]
    fn test_non_finite_outputs_fail_inference() {
        let mut models = HorizonModels::new();
        models.insert(
            Horizon::OneDay,
            Arc::new(FixedSequence(vec![f64::NAN])),
            Arc::new(FixedTree(vec![0.01])),
        );
        models.insert(
            Horizon::SevenDay,
            Arc::new(FixedSequence(vec![0.01])),
            Arc::new(FixedTree(vec![f64::INFINITY])),
        );
        let combiner = EnsembleCombiner::default();

        for horizon in [Horizon::OneDay, Horizon::SevenDay] {
            let mut inputs = BTreeMap::new();
            inputs.insert(horizon, vec![vec![0.0; 4]]);
            match combiner.predict(&models, &unit_scaler(), &[window()], &inputs) {
                Err(PredictionError::InferenceFailed { model, reason }) => {
                    let expected = if horizon == Horizon::OneDay {
                        "fixed-sequence"
                    } else {
                        "fixed-tree"
                    };
                    assert_eq!(model, expected);
                    assert!(reason.contains("non-finite"));
                }
                other => panic!("unexpected: {:?}", other.map(|m| m.len())),
            }
        }

        // Raw outputs handed straight to the blend are checked as well
        let direct = combiner.combine(Horizon::OneDay, &[0.01], &[f64::NAN], &unit_scaler());
        assert!(matches!(
            direct,
            Err(PredictionError::InferenceFailed { ref model, .. }) if model == "tree"
        ));
    }

    #[test]
    fn test_weight_validation() {
        assert!(WeightPair::DEFAULT.validate().is_ok());
        assert!(WeightPair::from_sequence_weight(0.35).validate().is_ok());
        for bad in [
            WeightPair { sequence: 0.7, tree: 0.7 },
            WeightPair { sequence: -0.2, tree: 1.2 },
            WeightPair { sequence: f64::NAN, tree: 0.5 },
        ] {
            assert!(bad.validate().is_err(), "{:?} accepted", bad);
        }

        let mut weights = EnsembleWeights::default();
        weights
            .optimized
            .insert(Horizon::SevenDay, WeightPair { sequence: 0.9, tree: 0.9 });
        let err = weights.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("7d"));
    }

    #[test]
    fn test_invalid_weights_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ensemble_weights.json");
        fs::write(
            &path,
            r#"{"default":{"sequence":0.6,"tree":0.4},"optimized":{"1d":{"sequence":0.8,"tree":0.8}}}"#,
        )
        .unwrap();
        assert!(EnsembleWeights::load_or_default(&path).is_err());

        fs::write(&path, r#"{"default":{"sequence":1.5,"tree":-0.5}}"#).unwrap();
        assert!(EnsembleWeights::load_or_default(&path).is_err());

        fs::write(&path, r#"{"optimized":{"1d":{"sequence":0.25,"tree":0.75}}}"#).unwrap();
        let loaded = EnsembleWeights::load_or_default(&path).unwrap();
        assert_eq!(loaded.for_horizon(Horizon::OneDay).sequence, 0.25);
        assert_eq!(loaded.for_horizon(Horizon::SevenDay), WeightPair::DEFAULT);
    }

    #[test]
    fn test_weights_json_keys() {
        let mut weights = EnsembleWeights::default();
        weights
            .optimized
            .insert(Horizon::ThirtyDay, WeightPair::from_sequence_weight(0.8));
        let json = serde_json::to_value(&weights).unwrap();
        assert_eq!(json["optimized"]["30d"]["sequence"], 0.8);

        let back: EnsembleWeights = serde_json::from_value(json).unwrap();
        assert_eq!(back.for_horizon(Horizon::ThirtyDay).sequence, 0.8);
    }
}
