//! Error taxonomy for tracking, optimization and filling.

use thiserror::Error;

/// Boxed error returned by an external backend.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Oracle call that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleStage {
    Features,
    Context,
    Correlation,
    Update,
}

impl std::fmt::Display for OracleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OracleStage::Features => "feature extraction",
            OracleStage::Context => "context extraction",
            OracleStage::Correlation => "correlation lookup",
            OracleStage::Update => "update operator",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("pose buffer full: capacity {capacity}, requested {requested} slots")]
    CapacityExceeded { capacity: usize, requested: usize },

    #[error("{stage} failed")]
    ExtractionFailed {
        stage: OracleStage,
        #[source]
        source: BackendError,
    },

    #[error("invalid edge {from}->{to}: buffer holds {live} live slots")]
    InvalidEdge { from: usize, to: usize, live: usize },

    #[error("slot {index} has no context state to drive an edge")]
    MissingContext { index: usize },

    #[error("singular linear system at iteration {iteration}")]
    SingularSystem { iteration: usize },

    #[error("invalid slot range [{lo}, {hi}) for {len} live slots")]
    InvalidRange { lo: usize, hi: usize, len: usize },

    #[error("{what} shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("timestamp {got} does not follow previous keyframe timestamp {previous}")]
    TimestampOrder { previous: u64, got: u64 },

    #[error("slot {index} has no pose estimate")]
    UnsetPose { index: usize },

    #[error("no keyframes in buffer")]
    EmptyHistory,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TrackError {
    pub(crate) fn extraction(stage: OracleStage, err: anyhow::Error) -> Self {
        TrackError::ExtractionFailed {
            stage,
            source: err.into(),
        }
    }

    /// Whether the error only affects the frame that produced it.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, TrackError::ExtractionFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, TrackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_error_keeps_source() {
        let err = TrackError::extraction(OracleStage::Features, anyhow::anyhow!("device lost"));

        assert_eq!(err.to_string(), "feature extraction failed");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("device lost"));
        assert!(err.is_frame_local());
    }

    #[test]
    fn test_capacity_is_not_frame_local() {
        let err = TrackError::CapacityExceeded {
            capacity: 4,
            requested: 5,
        };
        assert!(!err.is_frame_local());
    }
}
