#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod gauge;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegWriter;
pub use gauge::{BarGauge, GaugeOverlay};

use anyhow::Result;
use image::RgbImage;
use std::path::Path;

/// Frame rate of written videos.
pub const VIDEO_FPS: i32 = 10;

/// Trait for output destinations
pub trait VideoSink {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush everything and release the destination
    fn finish(&mut self) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}

/// Frames collected in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub frames: Vec<RgbImage>,
    pub width: u32,
    pub height: u32,
    pub finished: bool,
}

impl MemorySink {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }
}

impl VideoSink for MemorySink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Open a video file for writing at `width` x `height`.
#[cfg(feature = "ffmpeg")]
pub fn create_video(path: &Path, width: u32, height: u32) -> Result<Box<dyn VideoSink>> {
    Ok(Box::new(FfmpegWriter::create(path, width, height)?))
}

/// Open a video file for writing at `width` x `height`.
#[cfg(not(feature = "ffmpeg"))]
pub fn create_video(path: &Path, _width: u32, _height: u32) -> Result<Box<dyn VideoSink>> {
    Err(crate::error::EvalError::configuration(format!(
        "cannot write {}: built without the `ffmpeg` feature",
        path.display()
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn test_video_needs_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        let err = create_video(&path, 8, 8).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::Configuration(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_memory_sink_collects_frames() {
        let mut sink = MemorySink::new(2, 2);
        sink.write_frame(&RgbImage::new(2, 2)).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.frames.len(), 1);
        assert!(sink.finished);
        assert_eq!(sink.resolution(), (2, 2));
    }
}
