//! Deterministic models for tests and dry runs.
//!
//! Frames are identified by their first pixel: `marker_frames` fills frame
//! `i` with the constant `i / 255`, and `FixedModel::from_table` answers
//! with row `i` of its table for such a frame.

use super::types::{ClassifierModel, FeatureGradients};
use anyhow::{anyhow, Result};
use ndarray::{Array2, Array3, Array4, ArrayView3, ArrayView4, Axis};

type ScoreFn = Box<dyn Fn(ArrayView3<f32>) -> Vec<f32>>;

pub struct FixedModel {
    score: ScoreFn,
    num_classes: usize,
    input_size: u32,
    dropout: Option<Array2<f32>>,
}

/// Frame index encoded by `marker_frames`.
pub fn frame_marker(frame: ArrayView3<f32>) -> usize {
    frame.first().map(|v| (v * 255.0).round() as usize).unwrap_or(0)
}

/// `count` constant frames of `size`x`size`, frame `i` filled with `i / 255`.
pub fn marker_frames(count: usize, size: usize) -> Array4<f32> {
    let mut frames = Array4::zeros((count, size, size, 3));
    for (idx, mut frame) in frames.axis_iter_mut(Axis(0)).enumerate() {
        frame.fill(idx as f32 / 255.0);
    }
    frames
}

impl FixedModel {
    /// Answer every frame with `scores(frame)`.
    pub fn new(num_classes: usize, scores: impl Fn(ArrayView3<f32>) -> Vec<f32> + 'static) -> Self {
        Self {
            score: Box::new(scores),
            num_classes,
            input_size: 224,
            dropout: None,
        }
    }

    /// Answer frame `i` of `marker_frames` with row `i` of `table`.
    pub fn from_table(table: Array2<f32>) -> Self {
        let num_classes = table.ncols();
        Self::new(num_classes, move |frame| {
            let row = frame_marker(frame).min(table.nrows().saturating_sub(1));
            table.row(row).to_vec()
        })
    }

    /// Give this model a stochastic twin whose batch outputs are the rows
    /// of `runs`, repeated cyclically over the batch.
    pub fn with_dropout_outputs(mut self, runs: Array2<f32>) -> Self {
        self.dropout = Some(runs);
        self
    }

    pub fn with_input_size(mut self, input_size: u32) -> Self {
        self.input_size = input_size;
        self
    }

    /// Coarse 4x4 map whose value grows with the column index, scaled by
    /// the class score so different classes yield different maps.
    fn coarse_map(&self, frame: ArrayView3<f32>, class_idx: usize) -> Result<Array2<f32>> {
        let scores = (self.score)(frame);
        let weight = scores
            .get(class_idx)
            .copied()
            .ok_or_else(|| anyhow!("class {class_idx} out of range"))?;
        Ok(Array2::from_shape_fn((4, 4), |(_, x)| weight * x as f32))
    }
}

impl ClassifierModel for FixedModel {
    fn predict(&mut self, batch: ArrayView4<f32>) -> Result<Array2<f32>> {
        let mut out = Array2::zeros((batch.len_of(Axis(0)), self.num_classes));
        for (frame, mut row) in batch.axis_iter(Axis(0)).zip(out.rows_mut()) {
            let scores = (self.score)(frame);
            if scores.len() != self.num_classes {
                return Err(anyhow!(
                    "expected {} scores, got {}",
                    self.num_classes,
                    scores.len()
                ));
            }
            row.assign(&ndarray::aview1(&scores));
        }
        Ok(out)
    }

    fn class_activation(
        &mut self,
        frame: ArrayView3<f32>,
        class_idx: usize,
    ) -> Result<Array2<f32>> {
        self.coarse_map(frame, class_idx)
    }

    fn feature_gradients(
        &mut self,
        frame: ArrayView3<f32>,
        class_idx: usize,
        _layer: &str,
    ) -> Result<FeatureGradients> {
        let map = self.coarse_map(frame, class_idx)?;
        let activations = Array3::from_shape_fn((4, 4, 2), |(y, x, c)| map[[y, x]] + c as f32);
        let gradients =
            Array3::from_shape_fn((4, 4, 2), |(_, _, c)| if c == 0 { 1.0 } else { -1.0 });
        Ok(FeatureGradients {
            activations,
            gradients,
        })
    }

    fn stochastic_variant(&self) -> Result<Option<Box<dyn ClassifierModel>>> {
        Ok(self.dropout.clone().map(|runs| {
            let num_classes = runs.ncols();
            let model = RepeatingModel { runs, num_classes };
            Box::new(model) as Box<dyn ClassifierModel>
        }))
    }

    fn input_size(&self) -> (u32, u32) {
        (self.input_size, self.input_size)
    }
}

/// Ignores its input and replays a fixed sequence of outputs.
struct RepeatingModel {
    runs: Array2<f32>,
    num_classes: usize,
}

impl ClassifierModel for RepeatingModel {
    fn predict(&mut self, batch: ArrayView4<f32>) -> Result<Array2<f32>> {
        let count = batch.len_of(Axis(0));
        let rows = self.runs.nrows().max(1);
        Ok(Array2::from_shape_fn((count, self.num_classes), |(i, c)| {
            self.runs.get((i % rows, c)).copied().unwrap_or(0.0)
        }))
    }

    fn input_size(&self) -> (u32, u32) {
        (224, 224)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_table_lookup_by_marker() {
        let mut model = FixedModel::from_table(array![[0.9, 0.1], [0.2, 0.8], [0.5, 0.5]]);
        let frames = marker_frames(3, 8);
        let preds = model.predict(frames.view()).unwrap();
        assert_eq!(preds, array![[0.9, 0.1], [0.2, 0.8], [0.5, 0.5]]);
    }

    #[test]
    fn test_dropout_variant_replays_rows() {
        let model = FixedModel::from_table(array![[1.0, 0.0]])
            .with_dropout_outputs(array![[0.6, 0.4], [0.4, 0.6]]);
        let mut dropout = model.stochastic_variant().unwrap().unwrap();
        let frames = marker_frames(3, 4);
        let preds = dropout.predict(frames.view()).unwrap();
        assert_eq!(preds, array![[0.6, 0.4], [0.4, 0.6], [0.6, 0.4]]);
    }

    #[test]
    fn test_no_dropout_variant_by_default() {
        let model = FixedModel::from_table(array![[1.0, 0.0]]);
        assert!(model.stochastic_variant().unwrap().is_none());
    }
}
