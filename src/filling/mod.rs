//! Trajectory filling: poses for every frame, not just keyframes.
//!
//! Non-keyframe poses are seeded by interpolating between the bracketing
//! keyframes on SE3, then refined against those keyframes in windows that
//! temporarily extend the pose buffer.

pub mod interpolation;
pub mod trajectory_filler;

pub use interpolation::{Seed, interpolate_seed_poses};
pub use trajectory_filler::{FillFrame, TrajectoryFiller};
