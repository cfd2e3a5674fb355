//! Boundary to the learned feature, correlation and update networks.
//!
//! The networks are external collaborators. The core only sees them through
//! [`CorrelationBackend`], and always calls them through the shape-checking
//! [`CorrelationOracle`] adapter.

mod adapter;
pub mod types;

pub use adapter::{CorrelationOracle, normalize_image};
pub use types::{
    ContextState, CoordGrid, CorrelationVolume, DepthMap, FEATURE_STRIDE, FeatureMap,
    GridTensor, Image, InputState, Intrinsics, MotionField, MotionMask, NormalizedImage,
    UpdateOutput, grid_shape,
};

/// Caller-provided learned components.
///
/// Implementations are pure from the core's point of view: the same inputs
/// must produce the same outputs, and no call may depend on a previous one.
pub trait CorrelationBackend {
    /// Correlation features on the 1/8 grid.
    fn extract_features(&self, image: &NormalizedImage) -> anyhow::Result<FeatureMap>;

    /// Recurrent context state and static input on the 1/8 grid.
    fn extract_context(
        &self,
        image: &NormalizedImage,
    ) -> anyhow::Result<(ContextState, InputState)>;

    /// Correlation of `source` against `target`, sampled around `coords`.
    fn correlate(
        &self,
        source: &FeatureMap,
        target: &FeatureMap,
        coords: &CoordGrid,
    ) -> anyhow::Result<CorrelationVolume>;

    /// One step of the update operator.
    fn update(
        &self,
        context: &ContextState,
        input: &InputState,
        corr: &CorrelationVolume,
    ) -> anyhow::Result<UpdateOutput>;
}
