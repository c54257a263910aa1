pub mod generation;
pub mod inference_gate;
pub mod model_cache;
pub mod prediction_service;

pub use inference_gate::InferenceGate;
pub use model_cache::{BundleLoader, ModelCache};
pub use prediction_service::{PredictionService, ServiceSettings, result_key};
