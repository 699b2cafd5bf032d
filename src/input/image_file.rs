use super::FrameSource;
use anyhow::{Context, Result};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, RgbImage};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Animated GIF, decoded frame by frame
pub struct GifSource {
    frames: image::Frames<'static>,
    decoded: u64,
}

impl GifSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let decoder = GifDecoder::new(BufReader::new(file))
            .with_context(|| format!("Failed to read GIF header of {}", path.display()))?;

        tracing::debug!("Opened GIF {}", path.display());

        Ok(Self {
            frames: decoder.into_frames(),
            decoded: 0,
        })
    }
}

impl FrameSource for GifSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(frame) = self.frames.next() else {
            return Ok(None);
        };
        let frame = frame.with_context(|| format!("Failed to decode GIF frame {}", self.decoded))?;
        self.decoded += 1;

        Ok(Some(DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8()))
    }
}

/// A single still image, read as a one-frame video
pub struct StillImageSource {
    image: Option<RgbImage>,
}

impl StillImageSource {
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("Failed to decode image {}", path.display()))?
            .to_rgb8();
        Ok(Self { image: Some(image) })
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.image.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Frame, Rgba, RgbaImage};

    fn write_gif(path: &Path, colors: &[[u8; 4]]) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        for color in colors {
            let frame = Frame::new(RgbaImage::from_pixel(6, 4, Rgba(*color)));
            encoder.encode_frame(frame).unwrap();
        }
    }

    #[test]
    fn test_gif_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.gif");
        write_gif(&path, &[[255, 0, 0, 255], [0, 0, 255, 255], [0, 255, 0, 255]]);

        let mut source = GifSource::open(&path).unwrap();
        let mut firsts = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!(frame.dimensions(), (6, 4));
            firsts.push(*frame.get_pixel(0, 0));
        }

        assert_eq!(firsts.len(), 3);
        assert_eq!(firsts[0], image::Rgb([255, 0, 0]));
        assert_eq!(firsts[1], image::Rgb([0, 0, 255]));
    }

    #[test]
    fn test_still_image_is_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        RgbImage::from_pixel(5, 5, image::Rgb([10, 20, 30])).save(&path).unwrap();

        let mut source = StillImageSource::open(&path).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }
}
