use crate::config::OutputDims;
use crate::evaluator::ActivationMap;
use crate::input::preprocess::frame_to_rgb;
use crate::input::Frames;
use crate::output::{GaugeOverlay, VideoSink};
use anyhow::{Context, Result};
use ndarray::Axis;
use std::collections::HashMap;

/// Write every frame of the video at the output size, with selected frames
/// replaced by their activation maps. When `gauge` is given, maps carrying
/// an uncertainty score also get the precision gauge.
pub fn compose_video(
    sink: &mut dyn VideoSink,
    frames: &Frames,
    maps: &[ActivationMap],
    dims: OutputDims,
    gauge: Option<&dyn GaugeOverlay>,
) -> Result<()> {
    let _span = tracing::info_span!("compose", frames = frames.len_of(Axis(0))).entered();

    let by_frame: HashMap<usize, &ActivationMap> =
        maps.iter().map(|m| (m.frame_index, m)).collect();

    for (idx, frame) in frames.axis_iter(Axis(0)).enumerate() {
        let image = match by_frame.get(&idx) {
            Some(map) => {
                let mut image = map.image.clone();
                if let (Some(gauge), Some(score)) = (gauge, map.uncertainty.as_ref()) {
                    if let Err(e) = gauge.overlay(&mut image, score.precision) {
                        tracing::warn!("No gauge on frame {}: {:#}", idx, e);
                    }
                }
                image
            }
            None => frame_to_rgb(frame, dims),
        };

        sink.write_frame(&image)
            .with_context(|| format!("Failed to write frame {idx}"))?;
    }

    sink.finish()
}
