use crate::domain::errors::PredictionError;
use crate::domain::ml::SequenceWindow;
use crate::domain::ports::SequencePredictor;
use ort::session::Session;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Sequence model exported to ONNX.
///
/// Input is a `[batch, sequence_length, width]` f32 tensor; the first output
/// holds one standardized cumulative return per batch entry.
pub struct OnnxSequencePredictor {
    session: Mutex<Session>,
    label: String,
}

impl OnnxSequencePredictor {
    pub fn load(symbol: &str, model_path: &Path) -> Result<Self, PredictionError> {
        if !model_path.exists() {
            return Err(PredictionError::ModelNotFound {
                symbol: symbol.to_string(),
                path: model_path.to_path_buf(),
            });
        }

        let load_error = |e: ort::Error| PredictionError::ModelLoadError {
            symbol: symbol.to_string(),
            reason: format!("{:?}: {}", model_path, e),
        };
        let session = Session::builder()
            .map_err(load_error)?
            .commit_from_file(model_path)
            .map_err(load_error)?;

        info!("Loaded ONNX sequence model from {:?}", model_path);
        Ok(Self {
            session: Mutex::new(session),
            label: format!(
                "onnx:{}",
                model_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("sequence")
            ),
        })
    }

    fn failure(&self, reason: impl Into<String>) -> PredictionError {
        PredictionError::InferenceFailed {
            model: self.label.clone(),
            reason: reason.into(),
        }
    }
}

/// Flatten windows into row-major f32 data plus the `[n, L, W]` shape.
pub(crate) fn batch_tensor(
    windows: &[SequenceWindow],
) -> Result<(Vec<usize>, Vec<f32>), PredictionError> {
    let first = windows.first().ok_or(PredictionError::InferenceFailed {
        model: "onnx".to_string(),
        reason: "empty batch".to_string(),
    })?;
    let (len, width) = (first.len(), first.width());

    let mut flat = Vec::with_capacity(windows.len() * len * width);
    for window in windows {
        if window.len() != len || window.width() != width {
            return Err(PredictionError::FeatureMismatch {
                expected: width,
                actual: window.width(),
            });
        }
        flat.extend(window.values.iter().map(|v| *v as f32));
    }
    Ok((vec![windows.len(), len, width], flat))
}

impl SequencePredictor for OnnxSequencePredictor {
    fn predict(&self, windows: &[SequenceWindow]) -> Result<Vec<f64>, PredictionError> {
        let (shape, flat_data) = batch_tensor(windows)?;
        debug!("{}: running batch {:?}", self.label, shape);

        let input_value = ort::value::Value::from_array((shape.as_slice(), flat_data))
            .map_err(|e| self.failure(format!("Input value creation failed: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| self.failure(format!("Mutex lock failed: {}", e)))?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| self.failure(e.to_string()))?;

        let output_value = outputs
            .iter()
            .next()
            .map(|(_, v)| v)
            .ok_or_else(|| self.failure("No output found"))?;
        let data = output_value
            .try_extract_tensor::<f32>()
            .map_err(|e| self.failure(e.to_string()))?;

        // [n, 1] and [n] outputs flatten identically
        let values: Vec<f64> = data.1.iter().map(|v| *v as f64).collect();
        if values.len() < windows.len() {
            return Err(self.failure(format!(
                "expected {} outputs, got {}",
                windows.len(),
                values.len()
            )));
        }
        Ok(values.into_iter().take(windows.len()).collect())
    }

    fn name(&self) -> &str {
        &self.label
    }
}
