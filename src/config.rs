use crate::error::EvalError;
use crate::model::ExplanationMode;
use std::path::PathBuf;

/// The only frame size the precision gauge can be drawn on.
pub const GAUGE_DIMS: OutputDims = OutputDims {
    width: 1000,
    height: 1000,
};

pub const DEFAULT_THRESHOLD: f32 = 0.75;
pub const DEFAULT_ZEROING: f32 = 0.65;
pub const DEFAULT_RUNS: usize = 10;

/// Width and height of the activation maps and of the output video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDims {
    pub width: u32,
    pub height: u32,
}

impl OutputDims {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for OutputDims {
    fn default() -> Self {
        Self::new(224, 224)
    }
}

/// How decisive frames are picked out of the mean predictions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection {
    /// Every frame whose score is strictly above the value, in file order.
    Threshold(f32),
    /// The `k` best frames, in ascending score order.
    TopK(usize),
}

/// Options for one `cam_important_frames` call.
#[derive(Debug, Clone)]
pub struct CamOptions {
    pub threshold: f32,
    /// Takes precedence over `threshold` when set.
    pub nr_cams: Option<usize>,
    pub zeroing: f32,
    /// Base path of the output video, without extension.
    pub save_video_path: Option<PathBuf>,
    /// `None` disables uncertainty; otherwise "epistemic" or "aleatoric".
    pub uncertainty_method: Option<String>,
    pub runs: usize,
    pub cam_dims: OutputDims,
    /// Seed for test-time augmentation.
    pub seed: u64,
}

impl Default for CamOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            nr_cams: None,
            zeroing: DEFAULT_ZEROING,
            save_video_path: None,
            uncertainty_method: None,
            runs: DEFAULT_RUNS,
            cam_dims: OutputDims::default(),
            seed: 0,
        }
    }
}

impl CamOptions {
    pub fn selection(&self) -> Selection {
        match self.nr_cams {
            Some(k) => Selection::TopK(k),
            None => Selection::Threshold(self.threshold),
        }
    }

    /// Rejects option combinations before any frame is touched.
    pub fn validate(&self) -> Result<(), EvalError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(EvalError::configuration(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.zeroing) {
            return Err(EvalError::configuration(format!(
                "zeroing must be within [0, 1], got {}",
                self.zeroing
            )));
        }
        if self.cam_dims.width == 0 || self.cam_dims.height == 0 {
            return Err(EvalError::configuration(
                "output dimensions must be positive",
            ));
        }
        if self.runs == 0 {
            return Err(EvalError::configuration("runs must be positive"));
        }
        if self.uncertainty_method.is_some() && self.cam_dims != GAUGE_DIMS {
            return Err(EvalError::configuration(format!(
                "uncertainty estimation requires output size {}x{}, got {}x{}",
                GAUGE_DIMS.width, GAUGE_DIMS.height, self.cam_dims.width, self.cam_dims.height
            )));
        }
        Ok(())
    }
}

/// Where the ensemble comes from and how it explains itself.
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    pub weights_dir: PathBuf,
    pub ensemble: bool,
    /// Fold used when `ensemble` is false.
    pub split: Option<usize>,
    pub num_classes: usize,
    pub explanation: ExplanationMode,
    /// Square model input edge in pixels.
    pub input_size: u32,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            weights_dir: PathBuf::from("trained_models"),
            ensemble: true,
            split: None,
            num_classes: 3,
            explanation: ExplanationMode::default(),
            input_size: 224,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nr_cams_takes_precedence() {
        let options = CamOptions {
            nr_cams: Some(3),
            ..CamOptions::default()
        };
        assert_eq!(options.selection(), Selection::TopK(3));
        assert_eq!(
            CamOptions::default().selection(),
            Selection::Threshold(0.75)
        );
    }

    #[test]
    fn test_uncertainty_requires_gauge_dims() {
        let options = CamOptions {
            uncertainty_method: Some("epistemic".to_string()),
            ..CamOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(EvalError::Configuration(_))
        ));

        let options = CamOptions {
            cam_dims: GAUGE_DIMS,
            ..options
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_unknown_method_still_counts_as_requested() {
        let options = CamOptions {
            uncertainty_method: Some("bayesian".to_string()),
            ..CamOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let bad = [
            CamOptions {
                threshold: 1.5,
                ..CamOptions::default()
            },
            CamOptions {
                zeroing: -0.1,
                ..CamOptions::default()
            },
            CamOptions {
                runs: 0,
                ..CamOptions::default()
            },
            CamOptions {
                cam_dims: OutputDims::new(0, 224),
                ..CamOptions::default()
            },
        ];
        for options in bad {
            assert!(options.validate().is_err(), "{options:?}");
        }
    }
}
