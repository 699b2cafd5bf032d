//! Ensemble evaluation of lung ultrasound videos: per-frame class
//! probabilities, activation maps for the most decisive frames and optional
//! precision estimates, written back out as an annotated video.

pub mod compose;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod explain;
pub mod input;
pub mod model;
pub mod output;
pub mod predict;
pub mod select;
pub mod uncertainty;

pub use config::{CamOptions, EnsembleConfig, OutputDims, Selection};
pub use error::EvalError;
pub use evaluator::{ActivationMap, CamOutput, EvaluationSession, VideoEvaluator};
pub use model::{ClassifierModel, Ensemble, ExplanationMode};
pub use predict::PredictionMatrix;
pub use uncertainty::{UncertaintyMethod, UncertaintyScore};
