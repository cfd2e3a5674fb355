//! Tracking session - main entry point.
//!
//! The `TrackingSession` owns the shared pose buffer and the oracle, runs the
//! motion filter over the live stream and then the trajectory filler as an
//! exclusive batch phase.

use std::sync::Arc;

use crate::buffer::PoseBuffer;
use crate::config::TrackerConfig;
use crate::error::{Result, TrackError};
use crate::filling::{FillFrame, TrajectoryFiller};
use crate::geometry::SE3;
use crate::oracle::{CorrelationBackend, CorrelationOracle};
use crate::tracking::{FilterDecision, FrameInput, MotionFilter};

/// A frame dropped from a stream because the oracle failed on it.
#[derive(Debug)]
pub struct FrameFailure {
    pub timestamp: u64,
    pub error: TrackError,
}

/// Outcome of [`TrackingSession::track_stream`].
#[derive(Debug, Default)]
pub struct TrackingSummary {
    /// Frames consumed from the stream.
    pub frames: usize,

    /// Buffer slots of the keyframes stored, in order.
    pub keyframes: Vec<usize>,

    /// Frames below the motion threshold.
    pub skipped: usize,

    /// Frames whose extraction failed; the stream continued past them.
    pub failures: Vec<FrameFailure>,
}

/// Keyframe tracking over a single video stream.
pub struct TrackingSession<B> {
    config: TrackerConfig,

    /// Shared keyframe store, also handed to the filler.
    buffer: Arc<PoseBuffer>,

    oracle: Arc<CorrelationOracle<B>>,

    filter: MotionFilter<B>,
}

impl<B: CorrelationBackend> TrackingSession<B> {
    /// Create a session with a fresh buffer sized by `config`.
    pub fn new(backend: B, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let buffer = PoseBuffer::shared(config.buffer_capacity)?;
        let oracle = Arc::new(CorrelationOracle::new(backend));
        let filter = MotionFilter::new(Arc::clone(&buffer), Arc::clone(&oracle), config.threshold);

        tracing::info!(
            "Tracking session ready: threshold {}, capacity {}, window {}",
            config.threshold,
            config.buffer_capacity,
            config.window_size
        );

        Ok(Self {
            config,
            buffer,
            oracle,
            filter,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn buffer(&self) -> &Arc<PoseBuffer> {
        &self.buffer
    }

    pub fn filter(&self) -> &MotionFilter<B> {
        &self.filter
    }

    /// Feed one frame to the motion filter.
    pub fn process_frame(&mut self, frame: FrameInput) -> Result<FilterDecision> {
        self.filter.track(frame)
    }

    /// Feed a whole stream.
    ///
    /// Oracle failures are recorded per frame and skipped; any other error
    /// (capacity, ordering, shape) aborts the stream.
    pub fn track_stream<I>(&mut self, frames: I) -> Result<TrackingSummary>
    where
        I: IntoIterator<Item = FrameInput>,
    {
        let mut summary = TrackingSummary::default();

        for frame in frames {
            let timestamp = frame.timestamp;
            summary.frames += 1;

            match self.filter.track(frame) {
                Ok(decision) => match decision.index() {
                    Some(index) => summary.keyframes.push(index),
                    None => summary.skipped += 1,
                },
                Err(error) if error.is_frame_local() => {
                    tracing::warn!("Frame {} dropped: {}", timestamp, error);
                    summary.failures.push(FrameFailure { timestamp, error });
                }
                Err(error) => return Err(error),
            }
        }

        tracing::info!(
            "Tracked {} frames: {} keyframes, {} skipped, {} failed",
            summary.frames,
            summary.keyframes.len(),
            summary.skipped,
            summary.failures.len()
        );
        Ok(summary)
    }

    /// Poses for every frame of `frames`, refined against the keyframes.
    ///
    /// Takes `&mut self` so no frame can be tracked while the fill runs.
    pub fn fill_trajectory<I>(&mut self, frames: I) -> Result<Vec<SE3>>
    where
        I: IntoIterator<Item = FillFrame>,
    {
        TrajectoryFiller::new(Arc::clone(&self.buffer), Arc::clone(&self.oracle), &self.config)
            .fill(frames)
    }
}
