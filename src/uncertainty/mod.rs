//! Precision of a model's decision on a single frame, from the spread of
//! repeated predictions.

mod augment;

pub use augment::Augmentor;

use crate::error::EvalError;
use crate::model::Ensemble;
use crate::predict::argmax;
use anyhow::{anyhow, Context, Result};
use ndarray::{stack, Array4, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Labels of the predicted class, by class index.
pub const CLASS_LABELS: [&str; 4] = ["covid", "pneumonia", "regular", "uninformative"];

/// Largest standard deviation a probability can have.
const MAX_STD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncertaintyMethod {
    /// Repeated inference through the dropout-enabled model
    Epistemic,
    /// Inference on randomly augmented copies of the frame
    Aleatoric,
}

#[derive(Debug, Error)]
#[error("invalid method '{0}', must be 'epistemic' or 'aleatoric'")]
pub struct UnknownMethod(pub String);

impl FromStr for UncertaintyMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "epistemic" => Ok(UncertaintyMethod::Epistemic),
            "aleatoric" => Ok(UncertaintyMethod::Aleatoric),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for UncertaintyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UncertaintyMethod::Epistemic => write!(f, "epistemic"),
            UncertaintyMethod::Aleatoric => write!(f, "aleatoric"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UncertaintyScore {
    pub precision: f32,
    pub label: &'static str,
    pub class_idx: usize,
}

/// Map a standard deviation to a precision in [0, 1]; 1.0 for no spread.
pub fn confidence_to_precision(std: f32) -> f32 {
    (1.0 - std / MAX_STD).clamp(0.0, 1.0)
}

/// Score from stochastic outputs of shape (runs, classes).
pub fn precision_from_runs(outputs: ArrayView2<f32>) -> Result<UncertaintyScore> {
    let mean = outputs
        .mean_axis(Axis(0))
        .ok_or_else(|| anyhow!("no stochastic runs to summarize"))?;
    let std = outputs.std_axis(Axis(0), 0.0);

    let class_idx =
        argmax(mean.iter().copied()).ok_or_else(|| anyhow!("model returned no classes"))?;
    let label = CLASS_LABELS
        .get(class_idx)
        .copied()
        .ok_or_else(|| anyhow!("no label for class {class_idx}"))?;

    Ok(UncertaintyScore {
        precision: confidence_to_precision(std[class_idx]),
        label,
        class_idx,
    })
}

/// Runs repeated stochastic inference for single frames.
pub struct UncertaintyEstimator {
    runs: usize,
    augmentor: Augmentor,
    rng: StdRng,
}

impl UncertaintyEstimator {
    pub fn new(runs: usize, seed: u64) -> Self {
        Self {
            runs,
            augmentor: Augmentor::default(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Precision of ensemble member `model_idx` on `frame`.
    ///
    /// Epistemic estimation needs `Ensemble::prepare_dropout` to have run.
    pub fn estimate(
        &mut self,
        ensemble: &mut Ensemble,
        model_idx: usize,
        frame: ArrayView3<f32>,
        method: UncertaintyMethod,
    ) -> Result<UncertaintyScore> {
        let _span = tracing::debug_span!("uncertainty", %method, model_idx).entered();

        let member = ensemble
            .member_mut(model_idx)
            .ok_or_else(|| anyhow!("no ensemble member {model_idx}"))?;

        let outputs = match method {
            UncertaintyMethod::Epistemic => {
                let model = member
                    .dropout
                    .as_mut()
                    .ok_or(EvalError::MissingDropoutModel { member: model_idx })?;
                model.predict(self.replicate(frame).view())
            }
            UncertaintyMethod::Aleatoric => {
                let batch = self.augmented(frame)?;
                member.model.predict(batch.view())
            }
        }
        .with_context(|| format!("{method} inference failed"))?;

        if outputs.nrows() != self.runs {
            return Err(EvalError::ShapeMismatch(format!(
                "expected {} stochastic outputs, got {}",
                self.runs,
                outputs.nrows()
            ))
            .into());
        }
        precision_from_runs(outputs.view())
    }

    /// Like `estimate`, with the method given by name. Failures, including
    /// an unknown name, are logged and yield no score.
    pub fn estimate_named(
        &mut self,
        ensemble: &mut Ensemble,
        model_idx: usize,
        frame: ArrayView3<f32>,
        method: &str,
    ) -> Option<UncertaintyScore> {
        let method = match method.parse::<UncertaintyMethod>() {
            Ok(method) => method,
            Err(e) => {
                tracing::error!("{}", e);
                return None;
            }
        };

        match self.estimate(ensemble, model_idx, frame, method) {
            Ok(score) => Some(score),
            Err(e) => {
                tracing::warn!("No uncertainty for this frame: {:#}", e);
                None
            }
        }
    }

    fn replicate(&self, frame: ArrayView3<f32>) -> Array4<f32> {
        let (height, width, channels) = frame.dim();
        let mut batch = Array4::zeros((self.runs, height, width, channels));
        for mut copy in batch.axis_iter_mut(Axis(0)) {
            copy.assign(&frame);
        }
        batch
    }

    fn augmented(&mut self, frame: ArrayView3<f32>) -> Result<Array4<f32>> {
        let copies: Vec<_> = (0..self.runs)
            .map(|_| self.augmentor.augment(frame, &mut self.rng))
            .collect();
        let views: Vec<_> = copies.iter().map(|c| c.view()).collect();
        Ok(stack(Axis(0), &views)?)
    }
}
