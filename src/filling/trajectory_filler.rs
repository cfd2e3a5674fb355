//! Windowed pose filling for non-keyframes.
//!
//! Each window of input frames is seeded by interpolation, written past the
//! live end of the buffer through a scoped tail extension, refined against
//! its two bracketing keyframes with motion-only updates and read back. The
//! extension is rolled back on every exit path, so the keyframe history is
//! never changed by a fill.

use std::sync::Arc;

use crate::buffer::{DEFAULT_DISPARITY, KeyframeRecord, PoseBuffer};
use crate::config::{FactorGraphConfig, TrackerConfig};
use crate::error::{Result, TrackError};
use crate::geometry::SE3;
use crate::oracle::{CorrelationBackend, CorrelationOracle, Image, Intrinsics};
use crate::optimizer::FactorGraph;

use super::interpolation::interpolate_seed_poses;

/// One frame to be given a pose.
#[derive(Debug, Clone)]
pub struct FillFrame {
    pub timestamp: u64,

    pub image: Arc<Image>,

    /// Intrinsics at image resolution. Defaults to the first keyframe's.
    pub intrinsics: Option<Intrinsics>,
}

impl FillFrame {
    pub fn new(timestamp: u64, image: Arc<Image>) -> Self {
        Self {
            timestamp,
            image,
            intrinsics: None,
        }
    }

    pub fn with_intrinsics(mut self, intrinsics: Intrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }
}

/// Recovers a pose for every frame of a stream after tracking.
pub struct TrajectoryFiller<B> {
    buffer: Arc<PoseBuffer>,
    oracle: Arc<CorrelationOracle<B>>,
    window_size: usize,
    iterations: usize,
    graph: FactorGraphConfig,
}

impl<B: CorrelationBackend> TrajectoryFiller<B> {
    pub fn new(
        buffer: Arc<PoseBuffer>,
        oracle: Arc<CorrelationOracle<B>>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            buffer,
            oracle,
            window_size: config.window_size.max(1),
            iterations: config.refine_iterations,
            graph: config.graph.clone(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// One pose per input frame, in input order.
    ///
    /// Frames are processed in windows of `window_size`; the last window may
    /// be shorter. Any failure aborts the whole call with the buffer rolled
    /// back to its keyframes.
    pub fn fill<I>(&self, frames: I) -> Result<Vec<SE3>>
    where
        I: IntoIterator<Item = FillFrame>,
    {
        let mut poses = Vec::new();
        let mut window = Vec::with_capacity(self.window_size);
        let mut windows = 0;

        for frame in frames {
            window.push(frame);
            if window.len() == self.window_size {
                poses.extend(self.fill_window(&window)?);
                window.clear();
                windows += 1;
            }
        }
        if !window.is_empty() {
            poses.extend(self.fill_window(&window)?);
            windows += 1;
        }

        if windows > 0 {
            tracing::info!(
                "Filled {} poses in {} windows against {} keyframes",
                poses.len(),
                windows,
                self.buffer.len()
            );
        }
        Ok(poses)
    }

    fn fill_window(&self, frames: &[FillFrame]) -> Result<Vec<SE3>> {
        // =====================================================================
        // PHASE 1: COLLECT keyframe history and seed the window
        // =====================================================================
        let (timestamps, poses, default_intrinsics) = {
            let live = self.buffer.len();
            if live == 0 {
                return Err(TrackError::EmptyHistory);
            }
            let history = self.buffer.slice(0, live)?;
            (
                history.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
                history.iter().map(|r| r.pose).collect::<Vec<_>>(),
                history[0].intrinsics.to_image(),
            )
        };

        let frame_times: Vec<u64> = frames.iter().map(|f| f.timestamp).collect();
        let seeds = interpolate_seed_poses(&timestamps, &poses, &frame_times)?;

        let mut records = Vec::with_capacity(frames.len());
        for (frame, seed) in frames.iter().zip(&seeds) {
            let features = self.oracle.features(&frame.image)?;
            let record = KeyframeRecord::new(
                frame.timestamp,
                Arc::clone(&frame.image),
                frame.intrinsics.unwrap_or(default_intrinsics),
                Arc::new(features),
            )?
            .with_pose(seed.pose)
            .with_disparity(DEFAULT_DISPARITY);
            records.push(record);
        }

        // =====================================================================
        // PHASE 2: SOLVE against the bracketing keyframes
        // =====================================================================
        let extension = self.buffer.extend_tail(records)?;
        let range = extension.range();
        let slots: Vec<usize> = range.clone().collect();
        let before: Vec<usize> = seeds.iter().map(|s| s.before).collect();
        let after: Vec<usize> = seeds.iter().map(|s| s.after).collect();

        let mut graph = FactorGraph::new(&*self.buffer, &*self.oracle, self.graph.clone());
        graph.add_factors(&before, &slots)?;
        graph.add_factors(&after, &slots)?;
        let report = graph.refine(range.start, range.end, self.iterations, true)?;

        // =====================================================================
        // PHASE 3: APPLY - read back; dropping the extension restores the buffer
        // =====================================================================
        let refined = extension
            .poses()?
            .into_iter()
            .zip(range.clone())
            .map(|(pose, index)| pose.ok_or(TrackError::UnsetPose { index }))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "Window at slot {} ({} frames): {} iterations applied, {} singular",
            extension.base(),
            extension.len(),
            report.applied,
            report.singular
        );
        Ok(refined)
    }
}
