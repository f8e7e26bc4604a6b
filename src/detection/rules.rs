//! Heuristic fall evidence computed directly from keypoints.
//!
//! Frames use COCO ordering with `[y, x]` pairs normalized to `[0, 1]`,
//! `y = 0` at the top of the image.

use super::window::WindowTensor;

const HORIZONTALITY_WEIGHT: f32 = 0.4;
const GROUND_WEIGHT: f32 = 0.35;
const STILLNESS_WEIGHT: f32 = 0.25;

/// Aspect ratio (width / (width + height)) at which a body counts as upright.
const UPRIGHT_RATIO: f32 = 0.3;
const LYING_RATIO: f32 = 0.7;
/// Mean keypoint height below which the body is not considered near the floor.
const GROUND_START_Y: f32 = 0.55;
const GROUND_SPAN_Y: f32 = 0.25;
/// Mean per-coordinate displacement per frame treated as full motion.
const MOTION_SATURATION: f32 = 0.05;
const STILLNESS_FRAMES: usize = 10;

pub trait RuleScorer: Send + Sync {
    /// Fall evidence in `[0, 1]` for a chronological window.
    fn score(&self, window: &WindowTensor) -> f32;
}

/// Scores lying flat, low in the frame and motionless as fall-like.
#[derive(Debug, Clone, Copy, Default)]
pub struct StillnessVerticalityScorer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleBreakdown {
    pub horizontality: f32,
    pub ground_level: f32,
    pub stillness: f32,
    pub total: f32,
}

impl StillnessVerticalityScorer {
    pub fn breakdown(&self, window: &WindowTensor) -> RuleBreakdown {
        // zero rows are padding from a tolerant read
        let frames: Vec<&[f32]> = window
            .rows()
            .filter(|row| row.iter().any(|v| *v != 0.0))
            .collect();

        let Some(latest) = frames.last() else {
            return RuleBreakdown {
                horizontality: 0.0,
                ground_level: 0.0,
                stillness: 0.0,
                total: 0.0,
            };
        };

        let horizontality = horizontality(latest);
        let ground_level = ground_level(latest);
        let stillness = stillness(&frames);
        let total = (HORIZONTALITY_WEIGHT * horizontality
            + GROUND_WEIGHT * ground_level
            + STILLNESS_WEIGHT * stillness)
            .clamp(0.0, 1.0);

        RuleBreakdown {
            horizontality,
            ground_level,
            stillness,
            total,
        }
    }
}

impl RuleScorer for StillnessVerticalityScorer {
    fn score(&self, window: &WindowTensor) -> f32 {
        self.breakdown(window).total
    }
}

fn points(frame: &[f32]) -> impl Iterator<Item = (f32, f32)> + '_ {
    frame.chunks_exact(2).map(|p| (p[0], p[1]))
}

fn horizontality(frame: &[f32]) -> f32 {
    let (mut min_y, mut max_y, mut min_x, mut max_x) = (f32::MAX, f32::MIN, f32::MAX, f32::MIN);
    for (y, x) in points(frame) {
        min_y = min_y.min(y);
        max_y = max_y.max(y);
        min_x = min_x.min(x);
        max_x = max_x.max(x);
    }
    let height = (max_y - min_y).max(0.0);
    let width = (max_x - min_x).max(0.0);
    if width + height <= f32::EPSILON {
        return 0.0;
    }
    let ratio = width / (width + height);
    ((ratio - UPRIGHT_RATIO) / (LYING_RATIO - UPRIGHT_RATIO)).clamp(0.0, 1.0)
}

fn ground_level(frame: &[f32]) -> f32 {
    let (sum, count) = points(frame).fold((0.0f32, 0usize), |(s, n), (y, _)| (s + y, n + 1));
    if count == 0 {
        return 0.0;
    }
    let mean_y = sum / count as f32;
    ((mean_y - GROUND_START_Y) / GROUND_SPAN_Y).clamp(0.0, 1.0)
}

fn stillness(frames: &[&[f32]]) -> f32 {
    let recent = &frames[frames.len().saturating_sub(STILLNESS_FRAMES)..];
    if recent.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0f32;
    let mut steps = 0usize;
    for pair in recent.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let diff: f32 = prev.iter().zip(next).map(|(a, b)| (a - b).abs()).sum();
        total += diff / prev.len().max(1) as f32;
        steps += 1;
    }
    let motion = total / steps as f32;
    1.0 - (motion / MOTION_SATURATION).clamp(0.0, 1.0)
}
