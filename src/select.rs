use crate::config::Selection;
use ndarray::{ArrayView2, Axis};

/// Number of frames `important_frames` returns by default.
pub const DEFAULT_IMPORTANT_FRAMES: usize = 5;

/// Pick the frames that most support `class_idx`.
///
/// Threshold mode keeps file order. Top-k mode returns frames in ascending
/// score order, equal scores keeping their file order. The two orders differ
/// and both are kept as they are, since output videos and callers rely on them.
pub fn select_frames(mean: ArrayView2<f32>, class_idx: usize, selection: Selection) -> Vec<usize> {
    match selection {
        Selection::Threshold(threshold) => above_threshold(mean, class_idx, threshold),
        Selection::TopK(k) => top_k(mean, class_idx, k),
    }
}

/// Frames whose score is strictly above `threshold`, in file order.
pub fn above_threshold(mean: ArrayView2<f32>, class_idx: usize, threshold: f32) -> Vec<usize> {
    mean.index_axis(Axis(1), class_idx)
        .iter()
        .enumerate()
        .filter(|(_, score)| **score > threshold)
        .map(|(frame, _)| frame)
        .collect()
}

/// The `k` highest-scoring frames, lowest score first.
pub fn top_k(mean: ArrayView2<f32>, class_idx: usize, k: usize) -> Vec<usize> {
    let scores = mean.index_axis(Axis(1), class_idx);
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    let skip = order.len().saturating_sub(k);
    order.split_off(skip)
}

/// The `n_return` best frames for `predicted_class` in any prediction table.
pub fn important_frames(
    preds: ArrayView2<f32>,
    predicted_class: usize,
    n_return: usize,
) -> Vec<usize> {
    top_k(preds, predicted_class, n_return)
}
