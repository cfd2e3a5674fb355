//! Constant-velocity pose seeding between keyframes.

use crate::error::{Result, TrackError};
use crate::geometry::SE3;

/// Added to keyframe time gaps so coincident timestamps never divide by zero.
const TIME_EPSILON: f64 = 1e-3;

/// Seed pose of one frame and the keyframes it was interpolated from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Seed {
    /// Newest keyframe at or before the frame.
    pub before: usize,
    /// Keyframe after `before`, or `before` itself at the end of history.
    pub after: usize,
    pub pose: SE3,
}

/// Interpolate a seed pose for each of `frames`.
///
/// `keyframe_timestamps` must be sorted ascending, with `keyframe_poses`
/// aligned to them. A frame at time `t` uses
/// `exp(log(P₁ ∘ P₀⁻¹) · (t − t₀) / (t₁ − t₀ + 1e-3)) ∘ P₀`. Frames older than
/// the first keyframe take the first keyframe's pose.
pub fn interpolate_seed_poses(
    keyframe_timestamps: &[u64],
    keyframe_poses: &[Option<SE3>],
    frames: &[u64],
) -> Result<Vec<Seed>> {
    let n = keyframe_timestamps.len();
    if n == 0 {
        return Err(TrackError::EmptyHistory);
    }
    if keyframe_poses.len() != n {
        return Err(TrackError::ShapeMismatch {
            what: "keyframe poses",
            expected: (n, 1),
            actual: (keyframe_poses.len(), 1),
        });
    }

    let pose_of = |k: usize| keyframe_poses[k].ok_or(TrackError::UnsetPose { index: k });

    frames
        .iter()
        .map(|&t| {
            let (before, after) = match keyframe_timestamps.partition_point(|&ts| ts <= t) {
                0 => (0, 0),
                count => (count - 1, count.min(n - 1)),
            };

            let (p0, p1) = (pose_of(before)?, pose_of(after)?);
            let t0 = keyframe_timestamps[before] as f64;
            let dt = keyframe_timestamps[after] as f64 - t0 + TIME_EPSILON;
            let fraction = (t as f64 - t0) / dt;

            Ok(Seed {
                before,
                after,
                pose: SE3::interpolate(&p0, &p1, fraction),
            })
        })
        .collect()
}
