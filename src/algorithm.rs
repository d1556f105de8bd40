//! Taste-learning math for the adaptive queue.
//!
//! Everything here is a pure function over `f32` slices: normalization,
//! cosine similarity, the learning-rate and feedback curves, the taste update
//! itself and the similarity search over candidate tracks.

use rand::Rng;
use rayon::prelude::*;

/// Length of every track embedding.
pub const EMBEDDING_DIM: usize = 512;

/// Magnitudes below this are treated as the zero vector and left unscaled.
const NORM_EPSILON: f32 = 1e-9;

/// Candidate counts below this are scored on the calling thread.
const PARALLEL_THRESHOLD: usize = 2048;

/// Tunable constants of the online taste update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningContext {
    pub min_lr: f32,
    pub max_lr: f32,
    pub decay: f32,
    pub steepness: f32,
    /// Peak magnitude of the feedback score.
    pub feedback_gain: f32,
    /// Number of shuffled tracks averaged into the initial taste.
    pub seed_tracks: usize,
}

impl Default for LearningContext {
    fn default() -> Self {
        Self {
            min_lr: 0.3,
            max_lr: 2.0,
            decay: 5.0,
            steepness: 4.0,
            feedback_gain: 1.5,
            seed_tracks: 3,
        }
    }
}

/// Scale `vec` to unit length in place.
///
/// The all-zero vector (or anything with a vanishing magnitude) is left as is
/// rather than divided by a near-zero norm.
pub fn normalize(vec: &mut [f32]) {
    let magnitude = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude > NORM_EPSILON {
        vec.iter_mut().for_each(|v| *v /= magnitude);
    }
}

/// Euclidean norm.
#[must_use]
pub fn norm(vec: &[f32]) -> f32 {
    vec.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Dot product; cosine similarity when both inputs are unit vectors.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Learning rate for the accumulated `inertia`.
///
/// Starts at `max_lr` and decays as `decay / inertia` toward `min_lr`, so the
/// taste settles over a session instead of swinging on every track.
#[must_use]
pub fn learning_rate(inertia: f32, context: &LearningContext) -> f32 {
    (context.decay / inertia).clamp(context.min_lr, context.max_lr)
}

/// S-curve feedback centered at half the track.
///
/// ```
/// use pod_shuffle::algorithm::{feedback_score, LearningContext};
///
/// let context = LearningContext::default();
/// assert_eq!(feedback_score(0.5, &context), 0.0);
/// assert!(feedback_score(1.0, &context) > 1.4);
/// assert!(feedback_score(0.0, &context) < -1.4);
/// ```
#[must_use]
pub fn feedback_score(playtime: f32, context: &LearningContext) -> f32 {
    let centered = f64::from(playtime) - 0.5;
    let curve = (centered * f64::from(context.steepness)).tanh();
    (curve * f64::from(context.feedback_gain)) as f32
}

/// Move `taste` toward (`rate > 0`) or away from (`rate < 0`) `target`, then
/// re-normalize.
pub fn update_taste(taste: &mut [f32], target: &[f32], rate: f32) {
    for (value, goal) in taste.iter_mut().zip(target) {
        *value += (goal - *value) * rate;
    }
    normalize(taste);
}

/// Initial taste: the mean of `seeds`, jittered by up to ±0.5 per dimension
/// and normalized.
///
/// The jitter keeps two sessions over the same library from starting at the
/// exact same point; it also guarantees a non-degenerate vector when the
/// seeds cancel out.
pub fn seed_taste<'a, R, I>(seeds: I, dim: usize, rng: &mut R) -> Vec<f32>
where
    R: Rng,
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut taste = vec![0.0_f32; dim];
    let mut count = 0_usize;
    for seed in seeds {
        for (acc, value) in taste.iter_mut().zip(seed) {
            *acc += value;
        }
        count += 1;
    }

    let divisor = count.max(1) as f32;
    for value in &mut taste {
        *value = *value / divisor + (rng.gen::<f32>() - 0.5);
    }
    normalize(&mut taste);
    taste
}

/// Index of the candidate most similar to `taste`.
///
/// Ties resolve to the lowest index, so results match a sequential scan in
/// candidate order. Returns `None` for an empty slice.
#[must_use]
pub fn best_match(taste: &[f32], candidates: &[&[f32]]) -> Option<usize> {
    let pick = |best: Option<(usize, f32)>, next: Option<(usize, f32)>| match (best, next) {
        (Some(a), Some(b)) => {
            if b.1 > a.1 || (b.1 == a.1 && b.0 < a.0) {
                Some(b)
            } else {
                Some(a)
            }
        }
        (a, None) => a,
        (None, b) => b,
    };

    let scored = |(index, embedding): (usize, &&[f32])| Some((index, dot(taste, embedding)));

    let best = if candidates.len() < PARALLEL_THRESHOLD {
        candidates.iter().enumerate().map(scored).fold(None, pick)
    } else {
        candidates
            .par_iter()
            .enumerate()
            .map(scored)
            .reduce(|| None, pick)
    };

    best.map(|(index, _)| index)
}
