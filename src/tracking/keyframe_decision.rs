//! Keyframe decision by mean flow magnitude.

/// Threshold test plus the count of frames dropped since the last keyframe.
///
/// The skip counter is advisory. It is reported to callers but never forces
/// a keyframe.
#[derive(Debug, Clone)]
pub struct KeyFrameDecision {
    /// Mean flow magnitude a frame must exceed.
    threshold: f64,
    /// Frames skipped since the last keyframe.
    frames_since_kf: usize,
}

impl KeyFrameDecision {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            frames_since_kf: 0,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn frames_since_kf(&self) -> usize {
        self.frames_since_kf
    }

    /// Whether a frame with `magnitude` should become a keyframe, optionally
    /// against a one-off threshold.
    pub fn should_create_keyframe(&self, magnitude: f64, threshold: Option<f64>) -> bool {
        magnitude > threshold.unwrap_or(self.threshold)
    }

    /// A keyframe was stored.
    pub fn record_keyframe(&mut self) {
        self.frames_since_kf = 0;
    }

    /// A frame was dropped. Returns the updated skip count.
    pub fn record_skip(&mut self) -> usize {
        self.frames_since_kf += 1;
        self.frames_since_kf
    }
}
