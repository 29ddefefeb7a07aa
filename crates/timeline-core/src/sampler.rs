//! Temperature reshaping and window-constrained event selection.
//!
//! Selection is deterministic: the reshaped distribution only decides the
//! order in which candidates are tried.

use timeline_backend::Vocabulary;

use crate::window::RecentWindow;

/// Added before the log so zero probabilities stay finite.
pub const PROB_EPSILON: f64 = 1e-7;

/// `softmax(ln(p + eps) / t)`.
///
/// Callers guarantee `temperature > 0`; the decoder checks this at entry.
pub fn apply_temperature(probs: &[f32], temperature: f64) -> Vec<f64> {
    debug_assert!(temperature > 0.0, "temperature must be positive");
    let scaled: Vec<f64> = probs
        .iter()
        .map(|&p| (p as f64 + PROB_EPSILON).ln() / temperature)
        .collect();
    // Shifting by the max leaves the result unchanged and keeps exp() finite
    // for small temperatures.
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut out: Vec<f64> = scaled.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = out.iter().sum();
    if sum > 0.0 {
        out.iter_mut().for_each(|p| *p /= sum);
    }
    out
}

/// Ids ordered by probability, highest first. Ties keep the lower id first.
pub fn rank_descending(dist: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..dist.len()).collect();
    order.sort_by(|&a, &b| dist[b].total_cmp(&dist[a]));
    order
}

/// Picks the most probable event not in `window`.
///
/// Ids without a word are skipped. When every event is excluded the overall
/// argmax wins regardless of the window; `None` means that argmax has no word
/// (or the distribution is empty).
pub fn select_event<'v>(dist: &[f64], vocab: &'v Vocabulary, window: &RecentWindow) -> Option<&'v str> {
    let ranking = rank_descending(dist);
    let best = *ranking.first()?;
    ranking
        .iter()
        .filter_map(|&id| vocab.word(id as u32))
        .find(|word| !window.contains(word))
        .or_else(|| vocab.word(best as u32))
}
