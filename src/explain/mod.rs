//! Class activation maps for selected frames.

pub mod heatmap;

use crate::config::OutputDims;
use crate::error::EvalError;
use crate::model::{ClassifierModel, EnsembleMember, ExplanationMode, FeatureGradients};
use anyhow::Result;
use image::RgbImage;
use ndarray::{Array2, ArrayView3, Axis};

pub const MAP_IMAGE_WEIGHT: f32 = 1.0;
pub const MAP_HEATMAP_WEIGHT: f32 = 0.5;
pub const GRADCAM_IMAGE_WEIGHT: f32 = 1.0;
pub const GRADCAM_HEATMAP_WEIGHT: f32 = 0.25;

/// Explain `class_idx` on one frame with the member's registered method.
pub fn explain_frame(
    member: &mut EnsembleMember,
    frame: ArrayView3<f32>,
    class_idx: usize,
    zeroing: f32,
    dims: OutputDims,
) -> Result<RgbImage> {
    match &member.explanation {
        ExplanationMode::ClassActivation => {
            class_activation_map(member.model.as_mut(), frame, class_idx, zeroing, dims)
        }
        ExplanationMode::GradCam { layer } => {
            grad_cam(member.model.as_mut(), frame, class_idx, layer, zeroing, dims)
        }
    }
}

/// Project the model's own class activation signal onto the frame.
pub fn class_activation_map(
    model: &mut dyn ClassifierModel,
    frame: ArrayView3<f32>,
    class_idx: usize,
    zeroing: f32,
    dims: OutputDims,
) -> Result<RgbImage> {
    let _span = tracing::debug_span!("cam", class_idx).entered();

    let cam = model.class_activation(frame, class_idx)?;
    let heat = heatmap::prepare_heatmap(cam.view(), zeroing, dims);
    Ok(heatmap::overlay(
        frame,
        heat.view(),
        dims,
        MAP_IMAGE_WEIGHT,
        MAP_HEATMAP_WEIGHT,
    ))
}

/// Gradient-weighted class activation map of `layer`.
pub fn grad_cam(
    model: &mut dyn ClassifierModel,
    frame: ArrayView3<f32>,
    class_idx: usize,
    layer: &str,
    zeroing: f32,
    dims: OutputDims,
) -> Result<RgbImage> {
    let _span = tracing::debug_span!("grad_cam", class_idx, layer).entered();

    let features = model.feature_gradients(frame, class_idx, layer)?;
    let cam = gradcam_map(&features)?;
    let heat = heatmap::prepare_heatmap(cam.view(), zeroing, dims);
    Ok(heatmap::overlay(
        frame,
        heat.view(),
        dims,
        GRADCAM_IMAGE_WEIGHT,
        GRADCAM_HEATMAP_WEIGHT,
    ))
}

/// Weighted channel sum of the activations. Each channel weighs the mean of
/// its guided gradients: gradients where both gradient and activation are
/// positive, zero elsewhere.
pub fn gradcam_map(features: &FeatureGradients) -> Result<Array2<f32>> {
    let FeatureGradients {
        activations,
        gradients,
    } = features;
    if activations.dim() != gradients.dim() {
        return Err(EvalError::ShapeMismatch(format!(
            "activations {:?} vs gradients {:?}",
            activations.dim(),
            gradients.dim()
        ))
        .into());
    }

    let (height, width, channels) = activations.dim();
    if height == 0 || width == 0 {
        return Ok(Array2::zeros((height, width)));
    }

    let mut guided = gradients.clone();
    guided.zip_mut_with(activations, |g, a| {
        if *g <= 0.0 || *a <= 0.0 {
            *g = 0.0;
        }
    });
    let weights = guided
        .mean_axis(Axis(0))
        .and_then(|per_column| per_column.mean_axis(Axis(0)))
        .unwrap_or_else(|| ndarray::Array1::zeros(channels));

    Ok(Array2::from_shape_fn((height, width), |(y, x)| {
        activations.index_axis(Axis(0), y).index_axis(Axis(0), x).dot(&weights)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixed::marker_frames;
    use crate::model::FixedModel;
    use image::Rgb;
    use ndarray::{array, Array3};

    fn member(mode: ExplanationMode) -> EnsembleMember {
        EnsembleMember {
            model: Box::new(FixedModel::from_table(array![[0.2, 0.8]]).with_input_size(4)),
            dropout: None,
            explanation: mode,
        }
    }

    #[test]
    fn test_gradcam_weights_use_guided_gradients() {
        let activations = Array3::from_shape_fn((2, 2, 2), |(y, x, c)| {
            if c == 0 {
                (y * 2 + x) as f32
            } else {
                1.0
            }
        });
        let gradients =
            Array3::from_shape_fn((2, 2, 2), |(_, _, c)| if c == 0 { 2.0 } else { -1.0 });
        let cam = gradcam_map(&FeatureGradients {
            activations,
            gradients,
        })
        .unwrap();

        // channel 0 is positive on 3 of 4 cells: weight 1.5; channel 1 never counts
        assert_eq!(cam, array![[0.0, 1.5], [3.0, 4.5]]);
    }

    #[test]
    fn test_gradcam_shape_mismatch() {
        let err = gradcam_map(&FeatureGradients {
            activations: Array3::zeros((2, 2, 3)),
            gradients: Array3::zeros((2, 2, 2)),
        })
        .unwrap_err();
        assert!(err.downcast_ref::<EvalError>().is_some());
    }

    #[test]
    fn test_output_dimensions() {
        let frames = marker_frames(1, 4);
        for mode in [ExplanationMode::ClassActivation, ExplanationMode::default()] {
            let mut member = member(mode);
            let image = explain_frame(
                &mut member,
                frames.index_axis(Axis(0), 0),
                1,
                0.65,
                OutputDims::new(32, 24),
            )
            .unwrap();
            assert_eq!(image.dimensions(), (32, 24));
        }
    }

    #[test]
    fn test_repeated_explanations_match() {
        let frames = marker_frames(1, 4);
        let frame = frames.index_axis(Axis(0), 0);
        let mut member = member(ExplanationMode::default());

        let first = explain_frame(&mut member, frame, 1, 0.65, OutputDims::new(16, 16)).unwrap();
        let second = explain_frame(&mut member, frame, 1, 0.65, OutputDims::new(16, 16)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zeroing_keeps_cold_columns_untouched() {
        let frames = Array3::from_elem((4, 4, 3), 0.2f32);
        let mut member = member(ExplanationMode::ClassActivation);

        // the coarse map grows with the column: 0, 1/3, 2/3, 1 of its peak
        let image =
            explain_frame(&mut member, frames.view(), 1, 0.65, OutputDims::new(4, 4)).unwrap();
        assert_eq!(*image.get_pixel(0, 0), Rgb([51, 51, 51]));
        assert_eq!(*image.get_pixel(1, 2), Rgb([51, 51, 51]));
        assert_ne!(*image.get_pixel(2, 0), Rgb([51, 51, 51]));
        assert_ne!(*image.get_pixel(3, 3), Rgb([51, 51, 51]));
    }

    #[test]
    fn test_unsupported_capability_fails() {
        struct PlainModel;
        impl ClassifierModel for PlainModel {
            fn predict(&mut self, batch: ndarray::ArrayView4<f32>) -> Result<Array2<f32>> {
                Ok(Array2::zeros((batch.len_of(Axis(0)), 2)))
            }
            fn input_size(&self) -> (u32, u32) {
                (4, 4)
            }
        }

        let frames = marker_frames(1, 4);
        let result = class_activation_map(
            &mut PlainModel,
            frames.index_axis(Axis(0), 0),
            0,
            0.65,
            OutputDims::default(),
        );
        assert!(result.is_err());
    }
}
