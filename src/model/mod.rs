pub mod fixed;
mod onnx;
pub mod types;

pub use fixed::FixedModel;
pub use onnx::OnnxClassifier;
pub use types::{ClassifierModel, ExplanationMode, FeatureGradients, DEFAULT_GRADCAM_LAYER};

use crate::config::EnsembleConfig;
use crate::error::EvalError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const MODEL_FILE: &str = "model.onnx";
const DROPOUT_MODEL_FILE: &str = "model_dropout.onnx";

/// One registered classifier and what is needed to explain it.
pub struct EnsembleMember {
    pub model: Box<dyn ClassifierModel>,
    /// Dropout-enabled twin, built on demand for epistemic uncertainty.
    pub dropout: Option<Box<dyn ClassifierModel>>,
    pub explanation: ExplanationMode,
}

/// Independently trained classifiers whose outputs are averaged.
pub struct Ensemble {
    members: Vec<EnsembleMember>,
    num_classes: usize,
}

impl Ensemble {
    pub fn new(num_classes: usize) -> Self {
        Self {
            members: Vec::new(),
            num_classes,
        }
    }

    /// Register a model together with its explanation capability.
    pub fn with_member(
        mut self,
        model: Box<dyn ClassifierModel>,
        explanation: ExplanationMode,
    ) -> Self {
        self.members.push(EnsembleMember {
            model,
            dropout: None,
            explanation,
        });
        self
    }

    /// Load ONNX models from `fold_<i>/model.onnx` under the weights directory.
    ///
    /// Without `ensemble`, only the fold named by `split` (default 0) is used.
    pub fn load(config: &EnsembleConfig) -> Result<Self> {
        let folds = discover_folds(&config.weights_dir)?;
        let folds: Vec<(usize, PathBuf)> = if config.ensemble {
            folds
        } else {
            let split = config.split.unwrap_or(0);
            folds.into_iter().filter(|(fold, _)| *fold == split).collect()
        };

        let mut ensemble = Ensemble::new(config.num_classes);
        for (fold, dir) in folds {
            tracing::info!("Registering fold {} from {}", fold, dir.display());
            let mut model = OnnxClassifier::new(dir.join(MODEL_FILE), config.input_size)
                .with_context(|| format!("Failed to load fold {fold}"))?;
            let dropout_path = dir.join(DROPOUT_MODEL_FILE);
            if dropout_path.exists() {
                model = model.with_dropout_path(dropout_path);
            }
            ensemble = ensemble.with_member(Box::new(model), config.explanation.clone());
        }

        if ensemble.is_empty() {
            return Err(EvalError::EmptyEnsemble.into());
        }
        tracing::info!("Ensemble of {} models loaded", ensemble.len());
        Ok(ensemble)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn members_mut(&mut self) -> impl Iterator<Item = &mut EnsembleMember> {
        self.members.iter_mut()
    }

    pub fn member_mut(&mut self, idx: usize) -> Option<&mut EnsembleMember> {
        self.members.get_mut(idx)
    }

    /// Build the dropout-enabled twin of every member that lacks one.
    pub fn prepare_dropout(&mut self) -> Result<()> {
        for (idx, member) in self.members.iter_mut().enumerate() {
            if member.dropout.is_some() {
                continue;
            }
            let variant = member
                .model
                .stochastic_variant()
                .with_context(|| format!("Failed to build dropout model for member {idx}"))?;
            match variant {
                Some(model) => member.dropout = Some(model),
                None => return Err(EvalError::MissingDropoutModel { member: idx }.into()),
            }
        }
        tracing::debug!("Dropout models ready for {} members", self.members.len());
        Ok(())
    }
}

/// `fold_<i>` sub-directories containing a model file, sorted by fold.
fn discover_folds(weights_dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let entries = std::fs::read_dir(weights_dir)
        .with_context(|| format!("Failed to read weights directory {}", weights_dir.display()))?;

    let mut folds = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let fold = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix("fold_"))
            .and_then(|idx| idx.parse::<usize>().ok());
        if let Some(fold) = fold {
            if path.join(MODEL_FILE).is_file() {
                folds.push((fold, path));
            }
        }
    }
    folds.sort_by_key(|(fold, _)| *fold);
    Ok(folds)
}
