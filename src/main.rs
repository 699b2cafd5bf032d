use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sonocam::config::{DEFAULT_RUNS, DEFAULT_THRESHOLD, DEFAULT_ZEROING};
use sonocam::model::DEFAULT_GRADCAM_LAYER;
use sonocam::{CamOptions, EnsembleConfig, ExplanationMode, OutputDims, VideoEvaluator};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Explanation {
    /// Class activation maps exposed by the models
    Map,
    /// Gradient-weighted activations of an internal layer
    Gradient,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video to evaluate (gif, png/jpeg; mp4 and others with the ffmpeg feature)
    video: PathBuf,

    /// Directory holding fold_<i>/model.onnx for every ensemble member
    #[arg(long, default_value = "trained_models")]
    weights_dir: PathBuf,

    /// Use only one fold instead of the whole ensemble
    #[arg(long)]
    no_ensemble: bool,

    /// Fold to use with --no-ensemble
    #[arg(long)]
    split: Option<usize>,

    /// Number of classes the models predict
    #[arg(long, default_value_t = 3)]
    num_classes: usize,

    /// How the models' decisions are visualized
    #[arg(long, value_enum, default_value_t = Explanation::Gradient)]
    explanation: Explanation,

    /// Layer used by gradient explanations
    #[arg(long, default_value = DEFAULT_GRADCAM_LAYER)]
    layer: String,

    /// Square model input size
    #[arg(long, default_value_t = 224)]
    input_size: u32,

    /// Minimum mean probability for a frame to be explained
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Explain this many best frames instead of using the threshold
    #[arg(long)]
    nr_cams: Option<usize>,

    /// Fraction of the peak activation below which maps are cleared
    #[arg(long, default_value_t = DEFAULT_ZEROING)]
    zeroing: f32,

    /// Output video path without extension (.avi is appended)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output width
    #[arg(long, default_value_t = 224)]
    width: u32,

    /// Output height
    #[arg(long, default_value_t = 224)]
    height: u32,

    /// Uncertainty method: epistemic or aleatoric (requires 1000x1000 output)
    #[arg(long)]
    uncertainty: Option<String>,

    /// Stochastic runs per uncertainty estimate
    #[arg(long, default_value_t = DEFAULT_RUNS)]
    runs: usize,

    /// Seed for test-time augmentation
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("sonocam starting");
    tracing::info!("Video: {}", args.video.display());
    tracing::info!("Output: {}x{}", args.width, args.height);

    let options = CamOptions {
        threshold: args.threshold,
        nr_cams: args.nr_cams,
        zeroing: args.zeroing,
        save_video_path: args.output.clone(),
        uncertainty_method: args.uncertainty.clone(),
        runs: args.runs,
        cam_dims: OutputDims::new(args.width, args.height),
        seed: args.seed,
    };
    options.validate()?;

    let explanation = match args.explanation {
        Explanation::Map => ExplanationMode::ClassActivation,
        Explanation::Gradient => ExplanationMode::GradCam {
            layer: args.layer.clone(),
        },
    };
    let config = EnsembleConfig {
        weights_dir: args.weights_dir.clone(),
        ensemble: !args.no_ensemble,
        split: args.split,
        num_classes: args.num_classes,
        explanation,
        input_size: args.input_size,
    };

    let mut evaluator = VideoEvaluator::from_config(&config)?;
    let (session, output) = evaluator
        .run(&args.video, &options)
        .with_context(|| format!("Failed to evaluate {}", args.video.display()))?;

    let mean = session.mean_predictions();
    if let Some(per_class) = mean.mean_axis(ndarray::Axis(0)) {
        tracing::info!("Mean class probabilities: {:?}", per_class.to_vec());
    }
    tracing::info!(
        "Explained {} of {} frames",
        output.maps.len(),
        session.frame_count()
    );
    for map in &output.maps {
        match &map.uncertainty {
            Some(score) => tracing::info!(
                "Frame {}: model {}, {} with precision {:.3}",
                map.frame_index,
                map.model_index,
                score.label,
                score.precision
            ),
            None => tracing::info!("Frame {}: model {}", map.frame_index, map.model_index),
        }
    }
    if let Some(path) = &output.video_path {
        tracing::info!("Annotated video written to {}", path.display());
    }

    Ok(())
}
