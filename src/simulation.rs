//! Synthetic keypoint sequences and a stand-in classifier.
//!
//! Used by the demo binary and by tests; neither replaces a real pose model or
//! trained sequence engine.

use rand::Rng;

use crate::detection::classifier::{InferenceError, SequenceClassifier};
use crate::detection::window::WindowTensor;

pub const LANDMARKS: usize = 17;

/// Upright pose, `[y, x]` per COCO landmark.
const STANDING: [(f32, f32); LANDMARKS] = [
    (0.20, 0.50), // nose
    (0.18, 0.52), // left eye
    (0.18, 0.48), // right eye
    (0.19, 0.54), // left ear
    (0.19, 0.46), // right ear
    (0.30, 0.58), // left shoulder
    (0.30, 0.42), // right shoulder
    (0.42, 0.60), // left elbow
    (0.42, 0.40), // right elbow
    (0.52, 0.60), // left wrist
    (0.52, 0.40), // right wrist
    (0.55, 0.55), // left hip
    (0.55, 0.45), // right hip
    (0.70, 0.55), // left knee
    (0.70, 0.45), // right knee
    (0.85, 0.55), // left ankle
    (0.85, 0.45), // right ankle
];

const GROUND_Y: f32 = 0.78;

fn flatten(points: impl Iterator<Item = (f32, f32)>) -> Vec<f32> {
    points
        .flat_map(|(y, x)| [y.clamp(0.0, 1.0), x.clamp(0.0, 1.0)])
        .collect()
}

/// Upright pose shifted diagonally by `shift`.
pub fn standing_frame(shift: f32) -> Vec<f32> {
    flatten(STANDING.iter().map(|&(y, x)| (y + shift, x + shift)))
}

/// The same body rotated flat near the bottom of the image.
pub fn ground_frame(shift: f32) -> Vec<f32> {
    flatten(STANDING.iter().map(|&(y, x)| {
        let lying_x = 0.25 + (y - 0.18) / 0.67 * 0.5;
        let lying_y = GROUND_Y + (x - 0.5) * 0.2;
        (lying_y + shift, lying_x + shift)
    }))
}

/// Forward head with uneven shoulders.
pub fn slouched_frame() -> Vec<f32> {
    flatten(STANDING.iter().enumerate().map(|(i, &(y, x))| match i {
        0..=4 => (y + 0.10, x + 0.15),
        5 => (y + 0.08, x + 0.03),
        6 => (y - 0.02, x + 0.03),
        _ => (y, x),
    }))
}

fn blend(from: &[f32], to: &[f32], t: f32) -> Vec<f32> {
    from.iter().zip(to).map(|(a, b)| a + (b - a) * t).collect()
}

fn jitter<R: Rng>(frame: Vec<f32>, amplitude: f32, rng: &mut R) -> Vec<f32> {
    frame
        .into_iter()
        .map(|v| (v + rng.random_range(-amplitude..=amplitude)).clamp(0.0, 1.0))
        .collect()
}

pub fn normal_sequence<R: Rng>(frames: usize, rng: &mut R) -> Vec<Vec<f32>> {
    (0..frames)
        .map(|_| jitter(standing_frame(0.0), 0.004, rng))
        .collect()
}

/// Standing, falling, then lying still, in roughly equal thirds.
pub fn fall_sequence<R: Rng>(frames: usize, rng: &mut R) -> Vec<Vec<f32>> {
    let standing = standing_frame(0.0);
    let ground = ground_frame(0.0);
    let third = (frames / 3).max(1);

    (0..frames)
        .map(|i| {
            let frame = if i < third {
                standing.clone()
            } else if i < 2 * third {
                let t = (i - third + 1) as f32 / third as f32;
                blend(&standing, &ground, t)
            } else {
                ground.clone()
            };
            jitter(frame, 0.004, rng)
        })
        .collect()
}

/// Scores how far the body dropped between the first and last frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescentClassifier;

const DESCENT_SATURATION: f32 = 0.25;

fn mean_y(frame: &[f32]) -> f32 {
    let ys: Vec<f32> = frame.chunks_exact(2).map(|p| p[0]).collect();
    if ys.is_empty() {
        return 0.0;
    }
    ys.iter().sum::<f32>() / ys.len() as f32
}

impl SequenceClassifier for DescentClassifier {
    fn predict(&self, window: &WindowTensor) -> Result<f32, InferenceError> {
        let rows: Vec<&[f32]> = window
            .rows()
            .filter(|row| row.iter().any(|v| *v != 0.0))
            .collect();
        let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
            return Err(InferenceError::Engine("empty window".into()));
        };
        let drop = (mean_y(last) - mean_y(first)).max(0.0);
        Ok(0.05 + 0.9 * (drop / DESCENT_SATURATION).min(1.0))
    }

    fn name(&self) -> &str {
        "descent-stand-in"
    }
}
