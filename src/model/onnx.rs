use super::types::{ClassifierModel, FeatureGradients};
use crate::error::EvalError;
use anyhow::{anyhow, Context, Result};
use ndarray::{
    concatenate, s, Array2, Array3, ArrayView3, ArrayView4, ArrayViewD, Axis, Ix2, Ix4, Ix5,
};
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::TensorRef;
use std::path::{Path, PathBuf};

/// Frames per inference call.
const BATCH_SIZE: usize = 32;

/// Output holding per-class activation maps, shape [N, h, w, classes].
const CLASS_ACTIVATIONS: &str = "class_activations";

/// Classifier exported to ONNX
///
/// The first output holds class probabilities with shape [N, classes].
/// Models that support explanations export extra outputs:
/// - `class_activations`: [N, h, w, classes]
/// - `<layer>`: activations of the layer, [N, h, w, channels]
/// - `<layer>_grad`: gradient of every class score w.r.t. the layer, [N, classes, h, w, channels]
pub struct OnnxClassifier {
    session: Session,
    path: PathBuf,
    dropout_path: Option<PathBuf>,
    input_size: u32,
}

impl OnnxClassifier {
    /// Create a new classifier from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `input_size` - Edge length of the square input the model was trained on
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading classifier from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::debug!(
            "Model {} has outputs {:?}",
            path.display(),
            session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            session,
            path: path.to_path_buf(),
            dropout_path: None,
            input_size,
        })
    }

    /// Register the ONNX file of the dropout-enabled twin of this model.
    pub fn with_dropout_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.dropout_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run_single<T>(
        &mut self,
        frame: ArrayView3<f32>,
        extract: impl FnOnce(&SessionOutputs) -> Result<T>,
    ) -> Result<T> {
        let input = frame.insert_axis(Axis(0)).as_standard_layout().into_owned();
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])
            .context("Failed to run inference")?;
        extract(&outputs)
    }
}

fn named_output<'a>(outputs: &'a SessionOutputs, name: &str) -> Result<ArrayViewD<'a, f32>> {
    let value = outputs
        .get(name)
        .ok_or_else(|| anyhow!("model has no output named '{name}'"))?;
    Ok(value.try_extract_array::<f32>()?)
}

impl ClassifierModel for OnnxClassifier {
    fn predict(&mut self, batch: ArrayView4<f32>) -> Result<Array2<f32>> {
        let _span = tracing::debug_span!("onnx_predict", frames = batch.len_of(Axis(0))).entered();

        let mut chunks = Vec::new();
        for chunk in batch.axis_chunks_iter(Axis(0), BATCH_SIZE) {
            let input = chunk.as_standard_layout().into_owned();
            let outputs = self
                .session
                .run(ort::inputs![TensorRef::from_array_view(input.view())?])
                .context("Failed to run inference")?;
            let probabilities = outputs[0]
                .try_extract_array::<f32>()?
                .into_dimensionality::<Ix2>()
                .map_err(|e| EvalError::ShapeMismatch(format!("probabilities output: {e}")))?
                .to_owned();
            chunks.push(probabilities);
        }

        if chunks.is_empty() {
            return Ok(Array2::zeros((0, 0)));
        }
        let views: Vec<_> = chunks.iter().map(|c| c.view()).collect();
        Ok(concatenate(Axis(0), &views)?)
    }

    fn class_activation(
        &mut self,
        frame: ArrayView3<f32>,
        class_idx: usize,
    ) -> Result<Array2<f32>> {
        self.run_single(frame, |outputs| {
            let maps = named_output(outputs, CLASS_ACTIVATIONS)?
                .into_dimensionality::<Ix4>()
                .map_err(|e| EvalError::ShapeMismatch(format!("{CLASS_ACTIVATIONS}: {e}")))?;
            if class_idx >= maps.len_of(Axis(3)) {
                return Err(anyhow!("class {class_idx} outside activation maps"));
            }
            Ok(maps.slice(s![0, .., .., class_idx]).to_owned())
        })
    }

    fn feature_gradients(
        &mut self,
        frame: ArrayView3<f32>,
        class_idx: usize,
        layer: &str,
    ) -> Result<FeatureGradients> {
        let grad_name = format!("{layer}_grad");
        self.run_single(frame, |outputs| {
            let activations: Array3<f32> = named_output(outputs, layer)?
                .into_dimensionality::<Ix4>()
                .map_err(|e| EvalError::ShapeMismatch(format!("{layer}: {e}")))?
                .index_axis(Axis(0), 0)
                .to_owned();
            let all_gradients = named_output(outputs, &grad_name)?
                .into_dimensionality::<Ix5>()
                .map_err(|e| EvalError::ShapeMismatch(format!("{grad_name}: {e}")))?;
            if class_idx >= all_gradients.len_of(Axis(1)) {
                return Err(anyhow!("class {class_idx} outside gradients of '{layer}'"));
            }
            let gradients = all_gradients.slice(s![0, class_idx, .., .., ..]).to_owned();
            Ok(FeatureGradients {
                activations,
                gradients,
            })
        })
    }

    fn stochastic_variant(&self) -> Result<Option<Box<dyn ClassifierModel>>> {
        match &self.dropout_path {
            Some(path) => {
                let model = OnnxClassifier::new(path, self.input_size)?;
                Ok(Some(Box::new(model)))
            }
            None => Ok(None),
        }
    }

    fn input_size(&self) -> (u32, u32) {
        (self.input_size, self.input_size)
    }
}
