//! Session orchestration.
//!
//! This module contains the top-level `TrackingSession` that owns the shared
//! pose buffer, runs the motion filter over a stream and the trajectory
//! filler afterwards.

mod session;

pub use session::{FrameFailure, TrackingSession, TrackingSummary};
