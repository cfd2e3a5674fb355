//! Online keyframe filter.
//!
//! Each incoming frame is correlated against the most recent keyframe on the
//! un-displaced feature grid. One application of the update operator yields
//! a flow revision; its mean magnitude decides whether the frame is stored.

use std::sync::Arc;

use crate::buffer::{DEFAULT_DISPARITY, KeyframeRecord, PoseBuffer};
use crate::error::{Result, TrackError};
use crate::geometry::SE3;
use crate::oracle::{
    ContextState, CoordGrid, CorrelationBackend, CorrelationOracle, DepthMap, FeatureMap, Image,
    InputState, Intrinsics, MotionMask,
};
use crate::tracking::keyframe_decision::KeyFrameDecision;
use crate::tracking::result::FilterDecision;
use crate::tracking::state::FilterState;

/// One frame of the input stream.
#[derive(Debug, Clone)]
pub struct FrameInput {
    /// Index of the frame in the stream.
    pub timestamp: u64,

    pub image: Arc<Image>,

    /// Optional metric depth at image resolution.
    pub depth: Option<Arc<DepthMap>>,

    /// Intrinsics at image resolution.
    pub intrinsics: Intrinsics,

    /// Optional mask at image or grid resolution.
    pub mask: Option<MotionMask>,
}

impl FrameInput {
    pub fn new(timestamp: u64, image: Arc<Image>, intrinsics: Intrinsics) -> Self {
        Self {
            timestamp,
            image,
            depth: None,
            intrinsics,
            mask: None,
        }
    }

    pub fn with_depth(mut self, depth: Arc<DepthMap>) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_mask(mut self, mask: MotionMask) -> Self {
        self.mask = Some(mask);
        self
    }
}

/// Features and update-operator state of the current reference keyframe.
#[derive(Clone)]
struct Reference {
    features: Arc<FeatureMap>,
    context: Arc<ContextState>,
    input: Arc<InputState>,
}

/// Decides which frames become keyframes and appends them to the buffer.
pub struct MotionFilter<B> {
    buffer: Arc<PoseBuffer>,
    oracle: Arc<CorrelationOracle<B>>,
    decision: KeyFrameDecision,
    reference: Option<Reference>,
}

impl<B: CorrelationBackend> MotionFilter<B> {
    /// Create a filter over `buffer`.
    ///
    /// If the buffer already holds keyframes, the newest one becomes the
    /// reference.
    pub fn new(buffer: Arc<PoseBuffer>, oracle: Arc<CorrelationOracle<B>>, threshold: f64) -> Self {
        let reference = buffer
            .len()
            .checked_sub(1)
            .and_then(|newest| buffer.record(newest))
            .and_then(|record| reference_of(&record));

        Self {
            buffer,
            oracle,
            decision: KeyFrameDecision::new(threshold),
            reference,
        }
    }

    /// `Tracking` once a keyframe is stored and the filter holds its reference.
    pub fn state(&self) -> FilterState {
        if self.reference.is_some() && !self.buffer.is_empty() {
            FilterState::Tracking
        } else {
            FilterState::AwaitingFirstFrame
        }
    }

    pub fn threshold(&self) -> f64 {
        self.decision.threshold()
    }

    /// Frames dropped since the last keyframe. Advisory only.
    pub fn frames_skipped(&self) -> usize {
        self.decision.frames_since_kf()
    }

    pub fn buffer(&self) -> &Arc<PoseBuffer> {
        &self.buffer
    }

    pub fn oracle(&self) -> &Arc<CorrelationOracle<B>> {
        &self.oracle
    }

    /// Process one frame.
    ///
    /// On any error the buffer and the filter are left unchanged.
    pub fn track(&mut self, frame: FrameInput) -> Result<FilterDecision> {
        if self.buffer.is_empty() {
            return self.bootstrap(frame);
        }

        let reference = self.reference()?;
        let features = self.oracle.features(&frame.image)?;
        let magnitude = self.magnitude(&reference, &features)?;

        if !self.decision.should_create_keyframe(magnitude, None) {
            let frames_skipped = self.decision.record_skip();
            tracing::debug!(
                "Frame {} skipped: motion {:.3} <= {:.3} ({} since last keyframe)",
                frame.timestamp,
                magnitude,
                self.threshold(),
                frames_skipped
            );
            return Ok(FilterDecision::Skipped {
                magnitude,
                frames_skipped,
            });
        }

        let (context, input) = self.oracle.context(&frame.image)?;
        let next = Reference {
            features: Arc::new(features),
            context: Arc::new(context),
            input: Arc::new(input),
        };
        let record = self.build_record(&frame, &next)?;
        let index = self.buffer.append(record)?;

        self.reference = Some(next);
        self.decision.record_keyframe();
        tracing::debug!(
            "Frame {} accepted as keyframe {}: motion {:.3} > {:.3}",
            frame.timestamp,
            index,
            magnitude,
            self.threshold()
        );

        Ok(FilterDecision::Accepted { index, magnitude })
    }

    /// Test `image` against the reference without storing anything.
    ///
    /// With no reference yet, `image` becomes the reference and the frame
    /// counts as moving.
    pub fn has_motion(&mut self, image: &Image, threshold: Option<f64>) -> Result<bool> {
        let features = self.oracle.features(image)?;

        if self.reference.is_none() && self.buffer.is_empty() {
            let (context, input) = self.oracle.context(image)?;
            self.reference = Some(Reference {
                features: Arc::new(features),
                context: Arc::new(context),
                input: Arc::new(input),
            });
            return Ok(true);
        }

        let reference = self.reference()?;
        let magnitude = self.magnitude(&reference, &features)?;
        Ok(self.decision.should_create_keyframe(magnitude, threshold))
    }

    fn bootstrap(&mut self, frame: FrameInput) -> Result<FilterDecision> {
        let features = self.oracle.features(&frame.image)?;
        let (context, input) = self.oracle.context(&frame.image)?;
        let reference = Reference {
            features: Arc::new(features),
            context: Arc::new(context),
            input: Arc::new(input),
        };

        let record = self
            .build_record(&frame, &reference)?
            .with_pose(SE3::identity())
            .with_disparity(DEFAULT_DISPARITY);
        let index = self.buffer.append(record)?;

        self.reference = Some(reference);
        self.decision.record_keyframe();
        tracing::info!(
            "Tracking bootstrapped from frame {} (keyframe {})",
            frame.timestamp,
            index
        );

        Ok(FilterDecision::Bootstrapped { index })
    }

    fn build_record(&self, frame: &FrameInput, reference: &Reference) -> Result<KeyframeRecord> {
        KeyframeRecord::new(
            frame.timestamp,
            Arc::clone(&frame.image),
            frame.intrinsics,
            Arc::clone(&reference.features),
        )?
        .with_depth(frame.depth.clone())?
        .with_context(Arc::clone(&reference.context), Arc::clone(&reference.input))
        .with_mask(frame.mask.as_ref())
    }

    /// Current reference, loaded from the newest buffered keyframe if the
    /// filter has not seen one yet.
    fn reference(&mut self) -> Result<Reference> {
        if let Some(reference) = &self.reference {
            return Ok(reference.clone());
        }

        let newest = self
            .buffer
            .len()
            .checked_sub(1)
            .ok_or(TrackError::EmptyHistory)?;
        let reference = self
            .buffer
            .record(newest)
            .as_ref()
            .and_then(reference_of)
            .ok_or(TrackError::MissingContext { index: newest })?;

        self.reference = Some(reference.clone());
        Ok(reference)
    }

    fn magnitude(&self, reference: &Reference, features: &FeatureMap) -> Result<f64> {
        let (rows, cols) = reference.features.shape();
        let coords = CoordGrid::identity(rows, cols);
        let (_, motion) = self.oracle.motion(
            &reference.features,
            features,
            &reference.context,
            &reference.input,
            &coords,
        )?;
        Ok(motion.mean_magnitude())
    }
}

fn reference_of(record: &KeyframeRecord) -> Option<Reference> {
    Some(Reference {
        features: Arc::clone(&record.features),
        context: Arc::clone(record.context.as_ref()?),
        input: Arc::clone(record.input.as_ref()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{BrightnessBackend, ConstantMotionBackend, solid_image};
    use approx::assert_relative_eq;

    fn frame(timestamp: u64, brightness: u8) -> FrameInput {
        FrameInput::new(
            timestamp,
            Arc::new(solid_image(32, 32, brightness)),
            Intrinsics::new(40.0, 40.0, 16.0, 16.0),
        )
    }

    fn filter<B: CorrelationBackend>(backend: B, capacity: usize) -> MotionFilter<B> {
        let buffer = PoseBuffer::shared(capacity).unwrap();
        MotionFilter::new(buffer, Arc::new(CorrelationOracle::new(backend)), 2.5)
    }

    #[test]
    fn test_first_frame_is_identity_keyframe() {
        let mut filter = filter(ConstantMotionBackend::new(0.0), 8);
        assert_eq!(filter.state(), FilterState::AwaitingFirstFrame);

        let decision = filter.track(frame(0, 0)).unwrap();
        assert_eq!(decision, FilterDecision::Bootstrapped { index: 0 });
        assert_eq!(filter.state(), FilterState::Tracking);

        let record = filter.buffer().record(0).unwrap();
        assert_eq!(record.pose, Some(SE3::identity()));
        assert_eq!(record.disparity, Some(1.0));
        assert!(record.context.is_some());
        assert_relative_eq!(record.intrinsics.fx, 5.0);
        assert_eq!(record.mask.masked_count(), 0);
    }

    #[test]
    fn test_zero_motion_keeps_only_first_frame() {
        let mut filter = filter(ConstantMotionBackend::new(0.0), 8);

        for t in 0..5 {
            filter.track(frame(t, 0)).unwrap();
        }

        assert_eq!(filter.buffer().len(), 1);
        assert_eq!(filter.frames_skipped(), 4);
    }

    #[test]
    fn test_motion_at_threshold_is_skipped() {
        let mut filter = filter(ConstantMotionBackend::new(2.5), 8);
        filter.track(frame(0, 0)).unwrap();

        let decision = filter.track(frame(1, 0)).unwrap();
        assert!(matches!(decision, FilterDecision::Skipped { frames_skipped: 1, .. }));
    }

    #[test]
    fn test_accepts_only_above_threshold() {
        let mut filter = filter(BrightnessBackend::new(), 8);

        let decisions: Vec<_> = [0u8, 1, 5, 6, 10, 12]
            .iter()
            .enumerate()
            .map(|(t, &b)| filter.track(frame(t as u64, b)).unwrap())
            .collect();

        let keyframes: Vec<_> = decisions.iter().filter_map(|d| d.index()).collect();
        assert_eq!(keyframes, vec![0, 1, 2]);
        assert_eq!(filter.buffer().timestamps(), vec![0, 2, 4]);
        assert!(matches!(decisions[5], FilterDecision::Skipped { frames_skipped: 1, .. }));

        if let FilterDecision::Accepted { magnitude, .. } = decisions[2] {
            assert_relative_eq!(magnitude, 5.0, epsilon = 1e-6);
        } else {
            panic!("frame 2 should be a keyframe");
        }

        let accepted = filter.buffer().record(1).unwrap();
        assert!(accepted.pose.is_none());
        assert!(accepted.disparity.is_none());
    }

    #[test]
    fn test_counter_matches_accepted_until_capacity() {
        let mut filter = filter(ConstantMotionBackend::new(5.0), 2);
        filter.track(frame(0, 0)).unwrap();
        filter.track(frame(1, 0)).unwrap();

        let err = filter.track(frame(2, 0)).unwrap_err();
        assert!(matches!(err, TrackError::CapacityExceeded { .. }));
        assert_eq!(filter.buffer().len(), 2);
    }

    #[test]
    fn test_extraction_failure_leaves_buffer_untouched() {
        let mut filter = filter(BrightnessBackend::failing_on(7), 8);
        filter.track(frame(0, 0)).unwrap();

        let err = filter.track(frame(1, 7)).unwrap_err();
        assert!(err.is_frame_local());
        assert_eq!(filter.buffer().len(), 1);
        assert_eq!(filter.frames_skipped(), 0);

        assert!(filter.track(frame(2, 9)).unwrap().is_keyframe());
    }

    #[test]
    fn test_has_motion_does_not_store() {
        let mut filter = filter(BrightnessBackend::new(), 8);

        assert!(filter.has_motion(&solid_image(32, 32, 0), None).unwrap());
        assert!(!filter.has_motion(&solid_image(32, 32, 1), None).unwrap());
        assert!(filter.has_motion(&solid_image(32, 32, 1), Some(0.5)).unwrap());

        assert!(filter.buffer().is_empty());
        assert_eq!(filter.frames_skipped(), 0);
        assert_eq!(filter.state(), FilterState::AwaitingFirstFrame);
    }

    #[test]
    fn test_depth_of_wrong_size_rejected() {
        let mut filter = filter(ConstantMotionBackend::new(0.0), 8);

        for (width, height) in [(64, 64), (16, 16)] {
            let depth = Arc::new(DepthMap::new(width, height, vec![1.0; width * height]).unwrap());
            let err = filter.track(frame(0, 0).with_depth(depth)).unwrap_err();

            assert!(matches!(err, TrackError::ShapeMismatch { what: "depth map", .. }));
            assert!(filter.buffer().is_empty());
            assert_eq!(filter.state(), FilterState::AwaitingFirstFrame);
        }

        let depth = Arc::new(DepthMap::new(32, 32, vec![2.0; 32 * 32]).unwrap());
        filter.track(frame(0, 0).with_depth(depth)).unwrap();
        let record = filter.buffer().record(0).unwrap();
        assert_eq!(record.cell_inverse_depths(), vec![(0.5, true); 16]);
    }

    #[test]
    fn test_reference_loaded_from_existing_buffer() {
        let buffer = PoseBuffer::shared(8).unwrap();
        let oracle = Arc::new(CorrelationOracle::new(BrightnessBackend::new()));

        let mut first = MotionFilter::new(Arc::clone(&buffer), Arc::clone(&oracle), 2.5);
        first.track(frame(0, 0)).unwrap();
        first.track(frame(1, 20)).unwrap();

        let mut second = MotionFilter::new(buffer, oracle, 2.5);
        assert_eq!(second.state(), FilterState::Tracking);
        assert!(matches!(
            second.track(frame(2, 21)).unwrap(),
            FilterDecision::Skipped { .. }
        ));
    }

    #[test]
    fn test_grid_mask_is_attached() {
        let mut filter = filter(ConstantMotionBackend::new(0.0), 8);
        let mut cells = vec![false; 16];
        cells[5] = true;
        let mask = MotionMask::new(4, 4, cells).unwrap();

        filter.track(frame(0, 0).with_mask(mask)).unwrap();
        let record = filter.buffer().record(0).unwrap();
        assert!(record.mask.is_masked(5));
    }
}
