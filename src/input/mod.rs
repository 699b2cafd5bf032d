#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod image_file;
pub mod preprocess;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegSource;
pub use image_file::{GifSource, StillImageSource};
pub use preprocess::Preprocessor;

use crate::error::EvalError;
use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{stack, Array4, Axis};
use std::collections::VecDeque;
use std::path::Path;

/// Preprocessed frames of one video, shape (count, height, width, 3),
/// values in [0, 1].
pub type Frames = Array4<f32>;

/// Trait for decoded video sources
pub trait FrameSource {
    /// Decode the next frame, `None` once the video is exhausted
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Frames held in memory, handed out in order.
pub struct MemorySource {
    frames: VecDeque<RgbImage>,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.pop_front())
    }
}

/// Pick a decoder for the file based on its extension.
pub fn open_source(path: &Path) -> Result<Box<dyn FrameSource>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("gif") => Ok(Box::new(GifSource::open(path)?)),
        Some("png" | "jpg" | "jpeg" | "bmp") => Ok(Box::new(StillImageSource::open(path)?)),
        #[cfg(feature = "ffmpeg")]
        Some(_) => Ok(Box::new(FfmpegSource::open(path)?)),
        _ => Err(EvalError::UnsupportedFormat(path.to_path_buf()).into()),
    }
}

/// Decode and preprocess every frame of the video at `path`.
pub fn read_video(path: &Path, preprocessor: &Preprocessor) -> Result<Frames> {
    if !path.exists() {
        return Err(EvalError::NotFound(path.to_path_buf()).into());
    }

    tracing::info!("Reading video {}", path.display());
    let mut source = open_source(path)
        .with_context(|| format!("Failed to open video {}", path.display()))?;
    read_frames(source.as_mut(), preprocessor)
}

/// Drain a frame source; a decode error ends the video early.
pub fn read_frames(source: &mut dyn FrameSource, preprocessor: &Preprocessor) -> Result<Frames> {
    let mut frames = Vec::new();
    loop {
        match source.next_frame() {
            Ok(Some(image)) => frames.push(preprocessor.preprocess(&image)),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Stopping at frame {}: {:#}", frames.len(), e);
                break;
            }
        }
    }

    tracing::info!("Decoded {} frames", frames.len());

    if frames.is_empty() {
        let (width, height) = preprocessor.target_size();
        return Ok(Array4::zeros((0, height as usize, width as usize, 3)));
    }
    let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FailingSource {
        good: usize,
    }

    impl FrameSource for FailingSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            if self.good == 0 {
                return Err(anyhow!("corrupt packet"));
            }
            self.good -= 1;
            Ok(Some(RgbImage::new(10, 10)))
        }
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err =
            read_video(Path::new("/no/such/video.mp4"), &Preprocessor::new(8, 8)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::NotFound(_))
        ));
    }

    #[test]
    fn test_decode_error_keeps_earlier_frames() {
        let mut source = FailingSource { good: 3 };
        let frames = read_frames(&mut source, &Preprocessor::new(8, 8)).unwrap();
        assert_eq!(frames.dim(), (3, 8, 8, 3));
    }

    #[test]
    fn test_empty_video_is_valid() {
        let mut source = MemorySource::new(Vec::new());
        let frames = read_frames(&mut source, &Preprocessor::new(8, 6)).unwrap();
        assert_eq!(frames.dim(), (0, 6, 8, 3));
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn test_unknown_extension_without_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not a video").unwrap();

        let err = read_video(&path, &Preprocessor::new(8, 8)).unwrap_err();
        assert!(err.chain().any(|cause| matches!(
            cause.downcast_ref::<EvalError>(),
            Some(EvalError::UnsupportedFormat(_))
        )));
    }
}
