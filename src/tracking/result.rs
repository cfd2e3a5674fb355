//! Outcome of feeding one frame to the motion filter.

/// What the filter did with a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterDecision {
    /// First frame: stored with identity pose as the reference keyframe.
    Bootstrapped { index: usize },
    /// Motion exceeded the threshold; stored as a new keyframe.
    Accepted { index: usize, magnitude: f64 },
    /// Motion below threshold; nothing stored.
    Skipped { magnitude: f64, frames_skipped: usize },
}

impl FilterDecision {
    /// Whether the frame was written to the buffer.
    pub fn is_keyframe(&self) -> bool {
        !matches!(self, FilterDecision::Skipped { .. })
    }

    /// Buffer slot of the stored frame.
    pub fn index(&self) -> Option<usize> {
        match *self {
            FilterDecision::Bootstrapped { index } | FilterDecision::Accepted { index, .. } => {
                Some(index)
            }
            FilterDecision::Skipped { .. } => None,
        }
    }
}
