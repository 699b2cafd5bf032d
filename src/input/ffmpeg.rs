//! Container/codec decoding through FFmpeg (mp4, mpeg, avi, ...).

use super::FrameSource;
use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::Path;

pub struct FfmpegSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
    frame_count: u64,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        tracing::debug!(
            "Opened {} ({}x{}) with ffmpeg",
            path.display(),
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            eof_sent: false,
            frame_count: 0,
        })
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        self.frame_count += 1;
        frame_to_image(&rgb_frame)
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        if self.eof_sent {
            return Ok(None);
        }

        loop {
            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            let Some((index, packet)) = next else {
                break;
            };
            if index != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .with_context(|| format!("decode packet after frame {}", self.frame_count))?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
        }

        // Flush frames still buffered in the decoder.
        self.decoder.send_eof().context("flush ffmpeg decoder")?;
        self.eof_sent = true;
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        Ok(None)
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    RgbImage::from_raw(width, height, pixels).ok_or_else(|| anyhow!("ffmpeg frame has wrong size"))
}
