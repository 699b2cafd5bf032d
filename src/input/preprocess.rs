use crate::config::OutputDims;
use image::{imageops, ImageBuffer, Luma, RgbImage};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

/// Preprocessor for converting decoded RGB frames to model input arrays
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Preprocess an RGB image into a normalized HWC array
    ///
    /// Steps:
    /// 1. Resize to target dimensions (bilinear)
    /// 2. Convert to float and normalize to [0, 1]
    ///
    /// Returns: Array3<f32> with shape [height, width, 3]
    pub fn preprocess(&self, image: &RgbImage) -> Array3<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image.clone()
        };

        let (width, height) = resized.dimensions();
        Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
    }
}

/// Convert a normalized frame back to an RGB image of the given size
pub fn frame_to_rgb(frame: ArrayView3<f32>, dims: OutputDims) -> RgbImage {
    let (height, width, _) = frame.dim();
    let image = RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let px = |c: usize| (frame[[y as usize, x as usize, c]] * 255.0).clamp(0.0, 255.0) as u8;
        image::Rgb([px(0), px(1), px(2)])
    });

    if image.dimensions() == (dims.width, dims.height) {
        image
    } else {
        imageops::resize(&image, dims.width, dims.height, imageops::FilterType::Triangle)
    }
}

/// Bilinear resize of a single-channel float map
pub fn resize_map(map: ArrayView2<f32>, dims: OutputDims) -> Array2<f32> {
    let (height, width) = map.dim();
    if (width as u32, height as u32) == (dims.width, dims.height) {
        return map.to_owned();
    }

    let gray: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            Luma([map[[y as usize, x as usize]]])
        });
    let resized = imageops::resize(&gray, dims.width, dims.height, imageops::FilterType::Triangle);

    Array2::from_shape_fn((dims.height as usize, dims.width as usize), |(y, x)| {
        resized.get_pixel(x as u32, y as u32)[0]
    })
}
