use anyhow::{bail, Result};
use ndarray::{Array2, Array3, ArrayView3, ArrayView4};

/// Layer the gradient explanation reads from when none is configured.
pub const DEFAULT_GRADCAM_LAYER: &str = "block5_conv3";

/// How a registered model's decisions are visualized.
///
/// Supplied when the model is registered; never guessed from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplanationMode {
    /// The model exposes its class activation map directly.
    ClassActivation,
    /// Gradient-weighted activations of the named layer.
    GradCam { layer: String },
}

impl Default for ExplanationMode {
    fn default() -> Self {
        ExplanationMode::GradCam {
            layer: DEFAULT_GRADCAM_LAYER.to_string(),
        }
    }
}

/// Activations of an internal layer for one frame and the gradient of a
/// class score with respect to them. Both are (height, width, channels).
#[derive(Debug, Clone)]
pub struct FeatureGradients {
    pub activations: Array3<f32>,
    pub gradients: Array3<f32>,
}

/// Trait for image classifiers taking part in an ensemble.
/// Allows swapping between different backends (ONNX Runtime, fixed test models, ...)
pub trait ClassifierModel {
    /// Classify a batch of preprocessed frames
    ///
    /// # Arguments
    /// * `batch` - Frames in (count, height, width, 3) layout, values in [0, 1]
    ///
    /// # Returns
    /// * Class probabilities of shape (count, classes)
    fn predict(&mut self, batch: ArrayView4<f32>) -> Result<Array2<f32>>;

    /// Class activation map of `class_idx` for a single frame, at the
    /// resolution of the model's last convolutional block.
    fn class_activation(
        &mut self,
        _frame: ArrayView3<f32>,
        _class_idx: usize,
    ) -> Result<Array2<f32>> {
        bail!("model does not expose class activation maps")
    }

    /// Activations of `layer` and their gradients for `class_idx`.
    fn feature_gradients(
        &mut self,
        _frame: ArrayView3<f32>,
        _class_idx: usize,
        layer: &str,
    ) -> Result<FeatureGradients> {
        bail!("model does not expose gradients for layer '{layer}'")
    }

    /// Build a twin of this model that keeps dropout active at inference.
    ///
    /// Returns `Ok(None)` when no such variant exists.
    fn stochastic_variant(&self) -> Result<Option<Box<dyn ClassifierModel>>> {
        Ok(None)
    }

    /// Get the model's expected input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}
