//! Motion filter state machine.

/// State of the keyframe filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterState {
    /// No keyframe yet; the next frame bootstraps the buffer.
    #[default]
    AwaitingFirstFrame,
    /// A reference keyframe exists; frames are tested for motion.
    Tracking,
}
