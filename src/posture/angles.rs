use super::score::{BodyAngles, PostureAssessment};

const NOSE: usize = 0;
const LEFT_SHOULDER: usize = 5;
const RIGHT_SHOULDER: usize = 6;
const LEFT_HIP: usize = 11;
const RIGHT_HIP: usize = 12;

pub const IDEAL_NECK_MIN: f32 = 165.0;
pub const IDEAL_NECK_MAX: f32 = 175.0;
pub const IDEAL_SPINE_MIN: f32 = 170.0;
pub const IDEAL_SPINE_MAX: f32 = 180.0;
pub const IDEAL_SHOULDER_ALIGNMENT_MAX: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f32,
    y: f32,
}

fn landmark(frame: &[f32], index: usize) -> Option<Point> {
    let y = *frame.get(index * 2)?;
    let x = *frame.get(index * 2 + 1)?;
    Some(Point { x, y })
}

fn midpoint(a: Point, b: Point) -> Point {
    Point {
        x: (a.x + b.x) / 2.0,
        y: (a.y + b.y) / 2.0,
    }
}

/// Angle at `vertex` between `a` and a point straight below the vertex, in `[0, 180]`.
fn angle_from_vertical(a: Point, vertex: Point) -> f32 {
    let below = Point {
        x: vertex.x,
        y: vertex.y + 0.1,
    };
    let first = (a.y - vertex.y).atan2(a.x - vertex.x);
    let second = (below.y - vertex.y).atan2(below.x - vertex.x);
    let mut degrees = (second - first).to_degrees();
    if degrees < 0.0 {
        degrees += 360.0;
    }
    if degrees > 180.0 {
        degrees = 360.0 - degrees;
    }
    degrees
}

/// Neck, spine and shoulder measurements for one `[y, x]` keypoint frame.
///
/// Returns `None` when the frame is too short to hold the torso landmarks.
pub fn body_angles(frame: &[f32]) -> Option<BodyAngles> {
    let nose = landmark(frame, NOSE)?;
    let left_shoulder = landmark(frame, LEFT_SHOULDER)?;
    let right_shoulder = landmark(frame, RIGHT_SHOULDER)?;
    let left_hip = landmark(frame, LEFT_HIP)?;
    let right_hip = landmark(frame, RIGHT_HIP)?;

    let neck = midpoint(left_shoulder, right_shoulder);
    let hips = midpoint(left_hip, right_hip);

    Some(BodyAngles {
        neck: angle_from_vertical(nose, neck),
        spine: angle_from_vertical(neck, hips),
        shoulder_alignment: (left_shoulder.y - right_shoulder.y).abs() * 100.0,
    })
}

pub fn posture_label(angles: &BodyAngles) -> &'static str {
    if angles.neck < 150.0 {
        "forward_head"
    } else if angles.spine < 160.0 {
        "slouching"
    } else if angles.shoulder_alignment > 15.0 {
        "uneven_shoulders"
    } else {
        "good_posture"
    }
}

/// Deterministic angle-threshold scoring used whenever the analysis service
/// cannot answer.
pub fn fallback_assessment(angles: &BodyAngles) -> PostureAssessment {
    let mut score: i32 = 100;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if angles.neck < IDEAL_NECK_MIN {
        score -= ((IDEAL_NECK_MIN - angles.neck) / 2.0) as i32;
        issues.push("Forward head posture".to_string());
        recommendations.push("Lift your chin up and pull your head back".to_string());
    }

    if angles.spine < IDEAL_SPINE_MIN {
        score -= ((IDEAL_SPINE_MIN - angles.spine) / 2.0) as i32;
        issues.push("Slouching detected".to_string());
        recommendations.push("Straighten your back and sit upright".to_string());
    }

    if angles.shoulder_alignment > IDEAL_SHOULDER_ALIGNMENT_MAX {
        score -= (angles.shoulder_alignment - IDEAL_SHOULDER_ALIGNMENT_MAX) as i32;
        issues.push("Uneven shoulders".to_string());
        recommendations.push("Level your shoulders and relax".to_string());
    }

    if issues.is_empty() {
        issues.push("Good posture".to_string());
        recommendations.push("Keep maintaining this posture!".to_string());
    }

    PostureAssessment {
        score: score.clamp(0, 100) as u8,
        issues,
        recommendations,
    }
}
