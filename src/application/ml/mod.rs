pub mod aligner;
pub mod bundle;
pub mod ensemble;
pub mod onnx_predictor;
pub mod scaler;
pub mod signals;
pub mod smartcore_predictor;

pub use aligner::TemporalAligner;
pub use bundle::PredictorBundle;
pub use ensemble::{EnsembleCombiner, EnsembleWeights, HorizonEnsemble, HorizonModels, WeightPair};
pub use scaler::{ReturnScaler, ScalerState};
