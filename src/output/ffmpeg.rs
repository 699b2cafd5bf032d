//! Annotated video encoding through FFmpeg: uncompressed BGR24 in an AVI
//! container.

use super::{VideoSink, VIDEO_FPS};
use anyhow::{anyhow, bail, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use image::RgbImage;
use std::path::{Path, PathBuf};

const CONTAINER: &str = "avi";

pub struct FfmpegWriter {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    path: PathBuf,
    width: u32,
    height: u32,
    frame_count: i64,
    finished: bool,
}

impl FfmpegWriter {
    pub fn create<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<Self> {
        let path = path.as_ref();
        ffmpeg::init().context("initialize ffmpeg")?;

        let mut output = ffmpeg::format::output_as(&path, CONTAINER)
            .with_context(|| format!("failed to create '{}'", path.display()))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::RAWVIDEO)
            .ok_or_else(|| anyhow!("ffmpeg has no rawvideo encoder"))?;
        let encoder_time_base = ffmpeg::Rational::new(1, VIDEO_FPS);

        let mut config = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create video encoder")?;
        config.set_width(width);
        config.set_height(height);
        config.set_format(Pixel::BGR24);
        config.set_time_base(encoder_time_base);
        config.set_frame_rate(Some(ffmpeg::Rational::new(VIDEO_FPS, 1)));
        if global_header {
            config.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = config.open_as(codec).context("open rawvideo encoder")?;

        let stream_index = {
            let mut stream = output.add_stream(codec).context("add video stream")?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
            stream.index()
        };
        output
            .write_header()
            .with_context(|| format!("write header of '{}'", path.display()))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| anyhow!("video stream disappeared after header"))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::BGR24,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::POINT,
        )
        .context("create ffmpeg scaler")?;

        tracing::debug!("Writing {}x{} video to {}", width, height, path.display());

        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            path: path.to_path_buf(),
            width,
            height,
            frame_count: 0,
            finished: false,
        })
    }

    pub fn frame_count(&self) -> i64 {
        self.frame_count
    }

    fn write_packets(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write video packet")?;
        }
        Ok(())
    }
}

impl VideoSink for FfmpegWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if self.finished {
            bail!("{} is already finished", self.path.display());
        }
        if frame.dimensions() != (self.width, self.height) {
            bail!(
                "frame is {:?}, video is {}x{}",
                frame.dimensions(),
                self.width,
                self.height
            );
        }

        let rgb = image_to_frame(frame);
        let mut bgr = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut bgr)
            .context("convert frame to BGR")?;
        bgr.set_pts(Some(self.frame_count));

        self.encoder
            .send_frame(&bgr)
            .with_context(|| format!("encode frame {}", self.frame_count))?;
        self.frame_count += 1;
        self.write_packets()
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.encoder.send_eof().context("flush video encoder")?;
        self.write_packets()?;
        self.output
            .write_trailer()
            .with_context(|| format!("finalize {}", self.path.display()))?;
        tracing::info!("Wrote {} frames to {}", self.frame_count, self.path.display());
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::error!("{:#}", e);
        }
    }
}

fn image_to_frame(image: &RgbImage) -> ffmpeg::frame::Video {
    let (width, height) = image.dimensions();
    let mut frame = ffmpeg::frame::Video::new(Pixel::RGB24, width, height);
    let row_bytes = width as usize * 3;
    let stride = frame.stride(0);
    let data = frame.data_mut(0);
    for (row, pixels) in image.as_raw().chunks_exact(row_bytes).enumerate() {
        let start = row * stride;
        data[start..start + row_bytes].copy_from_slice(pixels);
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{FfmpegSource, FrameSource};
    use image::Rgb;

    #[test]
    fn test_frames_survive_the_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");

        let mut writer = FfmpegWriter::create(&path, 6, 4).unwrap();
        for value in [10u8, 120, 250] {
            writer
                .write_frame(&RgbImage::from_pixel(6, 4, Rgb([value, 0, 255 - value])))
                .unwrap();
        }
        writer.finish().unwrap();
        assert_eq!(writer.frame_count(), 3);

        let mut source = FfmpegSource::open(&path).unwrap();
        let mut decoded = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            decoded.push(frame);
        }
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].dimensions(), (6, 4));
        assert_eq!(*decoded[1].get_pixel(5, 3), Rgb([120, 0, 135]));
    }

    #[test]
    fn test_wrong_frame_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FfmpegWriter::create(dir.path().join("clip.avi"), 8, 8).unwrap();
        assert!(writer.write_frame(&RgbImage::new(4, 4)).is_err());
        assert_eq!(writer.frame_count(), 0);
    }

    #[test]
    fn test_dropped_writer_leaves_playable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        {
            let mut writer = FfmpegWriter::create(&path, 4, 4).unwrap();
            writer.write_frame(&RgbImage::new(4, 4)).unwrap();
        }

        let mut source = FfmpegSource::open(&path).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }
}
