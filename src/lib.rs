pub mod buffer;
pub mod config;
pub mod error;
pub mod filling;
pub mod geometry;
pub mod optimizer;
pub mod oracle;
pub mod system;
pub mod tracking;

#[cfg(test)]
mod test_helpers;

pub use buffer::{KeyframeRecord, PoseBuffer, SlotUpdate, TailExtension};
pub use config::{FactorGraphConfig, TrackerConfig};
pub use error::{Result, TrackError};
pub use filling::{FillFrame, TrajectoryFiller, interpolate_seed_poses};
pub use geometry::SE3;
pub use optimizer::{FactorGraph, IterationOutcome, RefineReport};
pub use oracle::{CorrelationBackend, CorrelationOracle};
pub use system::{TrackingSession, TrackingSummary};
pub use tracking::{FilterDecision, FrameInput, MotionFilter};
