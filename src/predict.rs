use crate::error::EvalError;
use crate::input::Frames;
use crate::model::Ensemble;
use anyhow::{Context, Result};
use ndarray::{stack, Array2, Array3, ArrayView2, Axis};

/// Index of the first maximum, as `np.argmax` picks it.
pub fn argmax<I>(values: I) -> Option<usize>
where
    I: IntoIterator<Item = f32>,
{
    let mut best: Option<(usize, f32)> = None;
    for (idx, value) in values.into_iter().enumerate() {
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Per-model, per-frame class probabilities, shape (models, frames, classes).
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionMatrix {
    raw: Array3<f32>,
}

impl PredictionMatrix {
    pub fn new(raw: Array3<f32>) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &Array3<f32> {
        &self.raw
    }

    pub fn model_count(&self) -> usize {
        self.raw.len_of(Axis(0))
    }

    pub fn frame_count(&self) -> usize {
        self.raw.len_of(Axis(1))
    }

    pub fn class_count(&self) -> usize {
        self.raw.len_of(Axis(2))
    }

    /// Mean over the model axis, shape (frames, classes).
    pub fn mean(&self) -> Array2<f32> {
        let (_, frames, classes) = self.raw.dim();
        self.raw
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array2::zeros((frames, classes)))
    }

    /// Ensemble member with the highest raw score for (frame, class).
    pub fn best_model(&self, frame: usize, class_idx: usize) -> Option<usize> {
        if frame >= self.frame_count() || class_idx >= self.class_count() {
            return None;
        }
        argmax(self.raw.axis_iter(Axis(0)).map(|model| model[[frame, class_idx]]))
    }
}

/// Class with the highest mean probability over all frames.
pub fn class_index(mean: ArrayView2<f32>) -> Option<usize> {
    let per_class = mean.mean_axis(Axis(0))?;
    argmax(per_class.iter().copied())
}

/// Run every ensemble member over all frames and stack the results.
pub fn predict_ensemble(ensemble: &mut Ensemble, frames: &Frames) -> Result<PredictionMatrix> {
    if ensemble.is_empty() {
        return Err(EvalError::EmptyEnsemble.into());
    }

    let num_classes = ensemble.num_classes();
    let frame_count = frames.len_of(Axis(0));
    let _span =
        tracing::info_span!("predict", models = ensemble.len(), frames = frame_count).entered();

    let mut per_model = Vec::with_capacity(ensemble.len());
    for (idx, member) in ensemble.members_mut().enumerate() {
        let preds = if frame_count == 0 {
            Array2::zeros((0, num_classes))
        } else {
            member
                .model
                .predict(frames.view())
                .with_context(|| format!("Model {idx} failed to predict"))?
        };

        if preds.dim() != (frame_count, num_classes) {
            return Err(EvalError::ShapeMismatch(format!(
                "model {idx} returned {:?}, expected ({frame_count}, {num_classes})",
                preds.dim()
            ))
            .into());
        }
        tracing::debug!("Model {} done", idx);
        per_model.push(preds);
    }

    let views: Vec<_> = per_model.iter().map(|p| p.view()).collect();
    Ok(PredictionMatrix::new(stack(Axis(0), &views)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixed::marker_frames;
    use crate::model::{ExplanationMode, FixedModel};
    use ndarray::array;

    #[test]
    fn test_argmax_first_wins() {
        assert_eq!(argmax([0.2, 0.7, 0.7, 0.1]), Some(1));
        assert_eq!(argmax(Vec::<f32>::new()), None);
    }

    #[test]
    fn test_mean_over_models() {
        let raw = array![
            [[0.8, 0.2], [0.4, 0.6], [0.5, 0.5]],
            [[0.6, 0.4], [0.2, 0.8], [0.1, 0.9]],
        ];
        let matrix = PredictionMatrix::new(raw);
        let mean = matrix.mean();

        assert_eq!(mean.dim(), (3, 2));
        assert!((mean[[0, 0]] - 0.7).abs() < 1e-6);
        assert!((mean[[1, 1]] - 0.7).abs() < 1e-6);
        assert!((mean[[2, 1]] - 0.7).abs() < 1e-6);
        assert_eq!(class_index(mean.view()), Some(1));
    }

    #[test]
    fn test_best_model_per_frame() {
        let raw = array![[[0.9, 0.1], [0.3, 0.7]], [[0.5, 0.5], [0.1, 0.9]]];
        let matrix = PredictionMatrix::new(raw);

        assert_eq!(matrix.best_model(0, 0), Some(0));
        assert_eq!(matrix.best_model(1, 1), Some(1));
        assert_eq!(matrix.best_model(2, 0), None);
    }

    #[test]
    fn test_predict_ensemble_stacks_models() {
        let mut ensemble = Ensemble::new(2)
            .with_member(
                Box::new(FixedModel::from_table(array![[1.0, 0.0], [0.0, 1.0]])),
                ExplanationMode::ClassActivation,
            )
            .with_member(
                Box::new(FixedModel::from_table(array![[0.5, 0.5], [0.5, 0.5]])),
                ExplanationMode::ClassActivation,
            );

        let matrix = predict_ensemble(&mut ensemble, &marker_frames(2, 4)).unwrap();
        assert_eq!(matrix.raw().dim(), (2, 2, 2));
        assert_eq!(matrix.mean(), array![[0.75, 0.25], [0.25, 0.75]]);
    }

    #[test]
    fn test_class_count_mismatch() {
        let mut ensemble = Ensemble::new(3).with_member(
            Box::new(FixedModel::from_table(array![[1.0, 0.0]])),
            ExplanationMode::ClassActivation,
        );
        let err = predict_ensemble(&mut ensemble, &marker_frames(1, 4)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_empty_video() {
        let mut ensemble = Ensemble::new(2).with_member(
            Box::new(FixedModel::from_table(array![[1.0, 0.0]])),
            ExplanationMode::ClassActivation,
        );
        let matrix = predict_ensemble(&mut ensemble, &marker_frames(0, 4)).unwrap();
        assert_eq!(matrix.raw().dim(), (1, 0, 2));
        assert_eq!(class_index(matrix.mean().view()), None);
    }
}
