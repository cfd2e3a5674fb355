//! Tracking: online keyframe selection.
//!
//! This module contains:
//! - [`MotionFilter`] - correlates each frame against the last keyframe and
//!   stores it when the mean flow exceeds the threshold
//! - [`KeyFrameDecision`] - the threshold test and skip counter
//! - [`FilterState`] / [`FilterDecision`] - filter state and per-frame outcome

pub mod keyframe_decision;
pub mod motion_filter;
pub mod result;
pub mod state;

pub use keyframe_decision::KeyFrameDecision;
pub use motion_filter::{FrameInput, MotionFilter};
pub use result::FilterDecision;
pub use state::FilterState;
