//! Pose buffer - the shared store of keyframe records.
//!
//! This module contains:
//! - [`KeyframeRecord`] - one stored frame (pose, features, context, depth)
//! - [`PoseBuffer`] - capacity-bounded store with an atomic live counter
//! - [`TailExtension`] - scoped, self-reverting growth used while filling

mod pose_buffer;
mod record;

pub use pose_buffer::{PoseBuffer, SlotUpdate, TailExtension};
pub use record::{DEFAULT_DISPARITY, KeyframeRecord};
