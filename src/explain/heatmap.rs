use crate::config::OutputDims;
use crate::input::preprocess::{frame_to_rgb, resize_map};
use image::{Rgb, RgbImage};
use ndarray::{Array2, ArrayView2, ArrayView3};

/// JET colormap, v in [0, 1] from blue through green to red.
pub fn jet(v: f32) -> [f32; 3] {
    let channel = |center: f32| (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0) * 255.0;
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Rectify, drop everything below `zeroing` times the peak, scale to [0, 1]
/// and resize to the output dimensions.
pub fn prepare_heatmap(map: ArrayView2<f32>, zeroing: f32, dims: OutputDims) -> Array2<f32> {
    let peak = map.iter().copied().fold(0.0f32, f32::max);
    if peak <= 0.0 {
        return Array2::zeros((dims.height as usize, dims.width as usize));
    }

    let cutoff = zeroing * peak;
    let normalized = map.mapv(|v| if v < cutoff || v <= 0.0 { 0.0 } else { v / peak });

    let mut resized = resize_map(normalized.view(), dims);
    resized.mapv_inplace(|v| v.clamp(0.0, 1.0));
    resized
}

/// Blend a colored heatmap over the frame. Zeroed cells leave the frame
/// untouched.
pub fn overlay(
    frame: ArrayView3<f32>,
    heatmap: ArrayView2<f32>,
    dims: OutputDims,
    image_weight: f32,
    heatmap_weight: f32,
) -> RgbImage {
    let mut image = frame_to_rgb(frame, dims);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let heat = heatmap[[y as usize, x as usize]];
        let color = if heat > 0.0 { jet(heat) } else { [0.0; 3] };
        let blend = |c: usize| {
            (pixel[c] as f32 * image_weight + color[c] * heatmap_weight).clamp(0.0, 255.0) as u8
        };
        *pixel = Rgb([blend(0), blend(1), blend(2)]);
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0.0), [0.0, 0.0, 127.5]);
        assert_eq!(jet(0.5), [127.5, 255.0, 127.5]);
        assert_eq!(jet(1.0), [127.5, 0.0, 0.0]);
    }

    #[test]
    fn test_zeroing_relative_to_peak() {
        let map = array![[0.0, 1.0], [3.0, 4.0]];
        let heat = prepare_heatmap(map.view(), 0.65, OutputDims::new(2, 2));
        assert_eq!(heat, array![[0.0, 0.0], [0.75, 1.0]]);
    }

    #[test]
    fn test_flat_negative_map_is_empty() {
        let map = array![[-1.0, -2.0], [-3.0, 0.0]];
        let heat = prepare_heatmap(map.view(), 0.5, OutputDims::new(3, 3));
        assert!(heat.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_overlay_leaves_cold_pixels() {
        let frame = ndarray::Array3::from_elem((2, 2, 3), 0.2f32);
        let heat = array![[0.0, 1.0], [0.0, 0.0]];
        let image = overlay(frame.view(), heat.view(), OutputDims::new(2, 2), 1.0, 0.5);

        assert_eq!(*image.get_pixel(0, 0), Rgb([51, 51, 51]));
        assert_eq!(*image.get_pixel(1, 0), Rgb([114, 51, 51]));
    }
}
