use crate::compose::compose_video;
use crate::config::{CamOptions, EnsembleConfig};
use crate::explain::explain_frame;
use crate::input::{read_frames, read_video, FrameSource, Frames, Preprocessor};
use crate::model::Ensemble;
use crate::output::{create_video, BarGauge, GaugeOverlay, VideoSink};
use crate::predict::{class_index, predict_ensemble, PredictionMatrix};
use crate::select::select_frames;
use crate::uncertainty::{UncertaintyEstimator, UncertaintyScore};
use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{Array2, Array4, Axis};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Extension appended to the output base path.
pub const VIDEO_EXTENSION: &str = ".avi";

/// Everything known about one analysed video. Built once by
/// `VideoEvaluator::evaluate` and never modified afterwards.
#[derive(Debug, Clone)]
pub struct EvaluationSession {
    frames: Frames,
    predictions: PredictionMatrix,
}

impl EvaluationSession {
    pub fn new(frames: Frames, predictions: PredictionMatrix) -> Self {
        Self {
            frames,
            predictions,
        }
    }

    pub fn frames(&self) -> &Frames {
        &self.frames
    }

    pub fn predictions(&self) -> &PredictionMatrix {
        &self.predictions
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len_of(Axis(0))
    }

    /// Class probabilities per frame, averaged over the ensemble.
    pub fn mean_predictions(&self) -> Array2<f32> {
        self.predictions.mean()
    }

    /// Class with the highest probability over the whole video.
    pub fn class_index(&self) -> Option<usize> {
        class_index(self.mean_predictions().view())
    }
}

/// Visual explanation of one selected frame.
#[derive(Debug, Clone)]
pub struct ActivationMap {
    pub frame_index: usize,
    /// Ensemble member whose internals produced the map.
    pub model_index: usize,
    pub image: RgbImage,
    pub uncertainty: Option<UncertaintyScore>,
}

#[derive(Debug, Clone, Default)]
pub struct CamOutput {
    pub class_index: Option<usize>,
    /// Selected frames in processing order.
    pub selected: Vec<usize>,
    /// One map per selected frame whose explanation succeeded.
    pub maps: Vec<ActivationMap>,
    pub video_path: Option<PathBuf>,
}

impl CamOutput {
    /// Maps stacked as (count, height, width, 3).
    pub fn to_array(&self) -> Array4<u8> {
        let (width, height) = self
            .maps
            .first()
            .map(|m| m.image.dimensions())
            .unwrap_or((0, 0));
        let mut stacked = Array4::zeros((self.maps.len(), height as usize, width as usize, 3));
        for (map, mut slot) in self.maps.iter().zip(stacked.axis_iter_mut(Axis(0))) {
            for (x, y, pixel) in map.image.enumerate_pixels() {
                for c in 0..3 {
                    slot[[y as usize, x as usize, c]] = pixel[c];
                }
            }
        }
        stacked
    }
}

/// `<base>.avi`
pub fn video_output_path(base: &Path) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(VIDEO_EXTENSION);
    PathBuf::from(path)
}

/// Predicts class probabilities for videos and explains the most decisive
/// frames.
///
/// One evaluator handles one video at a time; use separate evaluators for
/// concurrent work.
pub struct VideoEvaluator {
    ensemble: Ensemble,
    preprocessor: Preprocessor,
    gauge: Box<dyn GaugeOverlay>,
}

impl VideoEvaluator {
    pub fn new(ensemble: Ensemble, input_size: u32) -> Self {
        Self {
            ensemble,
            preprocessor: Preprocessor::new(input_size, input_size),
            gauge: Box::new(BarGauge::default()),
        }
    }

    /// Load the ONNX ensemble described by `config`.
    pub fn from_config(config: &EnsembleConfig) -> Result<Self> {
        let ensemble = Ensemble::load(config).context("Failed to load ensemble")?;
        Ok(Self::new(ensemble, config.input_size))
    }

    pub fn with_gauge(mut self, gauge: Box<dyn GaugeOverlay>) -> Self {
        self.gauge = gauge;
        self
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    /// Read the video and predict every frame with every model.
    pub fn evaluate(&mut self, video_path: &Path) -> Result<EvaluationSession> {
        let frames = read_video(video_path, &self.preprocessor)?;
        self.evaluate_frames(frames)
    }

    pub fn evaluate_source(&mut self, source: &mut dyn FrameSource) -> Result<EvaluationSession> {
        let frames = read_frames(source, &self.preprocessor)?;
        self.evaluate_frames(frames)
    }

    pub fn evaluate_frames(&mut self, frames: Frames) -> Result<EvaluationSession> {
        let predictions = predict_ensemble(&mut self.ensemble, &frames)?;
        tracing::info!(
            "Predicted {} frames with {} models",
            predictions.frame_count(),
            predictions.model_count()
        );
        Ok(EvaluationSession::new(frames, predictions))
    }

    /// Validate the options, then evaluate the video and explain it.
    pub fn run(
        &mut self,
        video_path: &Path,
        options: &CamOptions,
    ) -> Result<(EvaluationSession, CamOutput)> {
        options.validate()?;
        let session = self.evaluate(video_path)?;
        let output = self.cam_important_frames(&session, options)?;
        Ok((session, output))
    }

    /// Explain the most decisive frames of an evaluated video and, when
    /// `save_video_path` is set, write the annotated video.
    pub fn cam_important_frames(
        &mut self,
        session: &EvaluationSession,
        options: &CamOptions,
    ) -> Result<CamOutput> {
        self.prepare(options)?;

        match &options.save_video_path {
            Some(base) => {
                let path = video_output_path(base);
                let dims = options.cam_dims;
                let mut writer = create_video(&path, dims.width, dims.height)?;
                let sink: &mut dyn VideoSink = writer.as_mut();
                let mut output = self.explain_session(session, options, Some(sink))?;
                output.video_path = Some(path);
                Ok(output)
            }
            None => self.explain_session(session, options, None),
        }
    }

    /// Same as `cam_important_frames`, writing the annotated video to `sink`.
    pub fn cam_important_frames_to(
        &mut self,
        session: &EvaluationSession,
        options: &CamOptions,
        sink: Option<&mut dyn VideoSink>,
    ) -> Result<CamOutput> {
        self.prepare(options)?;
        self.explain_session(session, options, sink)
    }

    fn prepare(&mut self, options: &CamOptions) -> Result<()> {
        options.validate()?;
        if options.uncertainty_method.as_deref() == Some("epistemic") {
            self.ensemble.prepare_dropout()?;
        }
        Ok(())
    }

    fn explain_session(
        &mut self,
        session: &EvaluationSession,
        options: &CamOptions,
        sink: Option<&mut dyn VideoSink>,
    ) -> Result<CamOutput> {
        let method = options.uncertainty_method.as_deref();
        let mean = session.mean_predictions();
        let Some(class_idx) = class_index(mean.view()) else {
            tracing::warn!("Video has no frames, nothing to explain");
            if let Some(sink) = sink {
                sink.finish()?;
            }
            return Ok(CamOutput::default());
        };

        let selected = select_frames(mean.view(), class_idx, options.selection());
        tracing::info!("pred class: {}, frames above threshold {:?}", class_idx, selected);

        let mut estimator = UncertaintyEstimator::new(options.runs, options.seed);
        let mut maps = Vec::with_capacity(selected.len());
        for &frame_index in &selected {
            let best = session.predictions().best_model(frame_index, class_idx);
            let Some(model_index) = best else {
                tracing::warn!("Frame {} has no predictions", frame_index);
                continue;
            };
            let frame = session.frames().index_axis(Axis(0), frame_index);

            let Some(member) = self.ensemble.member_mut(model_index) else {
                continue;
            };
            let explained =
                explain_frame(member, frame, class_idx, options.zeroing, options.cam_dims);
            let image = match explained {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!("No activation map for frame {}: {:#}", frame_index, e);
                    continue;
                }
            };

            let uncertainty = method.and_then(|method| {
                estimator.estimate_named(&mut self.ensemble, model_index, frame, method)
            });

            tracing::debug!("Explained frame {} with model {}", frame_index, model_index);
            maps.push(ActivationMap {
                frame_index,
                model_index,
                image,
                uncertainty,
            });
        }

        if let Some(sink) = sink {
            let gauge: Option<&dyn GaugeOverlay> =
                method.map(|_| self.gauge.as_ref() as &dyn GaugeOverlay);
            compose_video(sink, session.frames(), &maps, options.cam_dims, gauge)?;
        }

        Ok(CamOutput {
            class_index: Some(class_idx),
            selected,
            maps,
            video_path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_appends_extension() {
        assert_eq!(
            video_output_path(Path::new("/tmp/out/clip")),
            PathBuf::from("/tmp/out/clip.avi")
        );
        assert_eq!(
            video_output_path(Path::new("result.v2")),
            PathBuf::from("result.v2.avi")
        );
    }

    #[test]
    fn test_empty_output_array() {
        assert_eq!(CamOutput::default().to_array().dim(), (0, 0, 0, 3));
    }
}
