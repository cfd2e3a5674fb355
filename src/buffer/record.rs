//! KeyframeRecord - one slot of the pose buffer.
//!
//! Records are created by the motion filter (keyframes) and by the trajectory
//! filler (temporary window frames). After creation only the pose and
//! disparity fields change, and only through `PoseBuffer::assign`.

use std::sync::Arc;

use crate::error::{Result, TrackError};
use crate::geometry::SE3;
use crate::oracle::{ContextState, DepthMap, FeatureMap, Image, InputState, Intrinsics, MotionMask};

/// Inverse depth used when a cell has neither a sensor depth nor a solved
/// disparity.
pub const DEFAULT_DISPARITY: f64 = 1.0;

/// A frame stored in the pose buffer.
#[derive(Debug, Clone)]
pub struct KeyframeRecord {
    /// Index of the frame in the source stream.
    pub timestamp: u64,

    /// Raw frame, shared with the caller.
    pub image: Arc<Image>,

    /// World-to-camera pose. `None` until a solver has estimated it.
    pub pose: Option<SE3>,

    /// Scalar inverse-depth/confidence. `None` until solved.
    pub disparity: Option<f64>,

    /// Optional sensor depth at image resolution.
    pub depth: Option<Arc<DepthMap>>,

    /// Intrinsics in feature-grid units (image intrinsics / 8).
    pub intrinsics: Intrinsics,

    /// Correlation features.
    pub features: Arc<FeatureMap>,

    /// Update-operator hidden state. Only keyframes carry it.
    pub context: Option<Arc<ContextState>>,

    /// Update-operator static input. Only keyframes carry it.
    pub input: Option<Arc<InputState>>,

    /// Cells excluded from motion estimation, at feature-grid resolution.
    pub mask: Arc<MotionMask>,
}

impl KeyframeRecord {
    /// Create a record with unset pose/disparity and an empty mask.
    ///
    /// `intrinsics` are given at image resolution and stored at grid
    /// resolution. Fails if `features` is not on the image's 1/8 grid.
    pub fn new(
        timestamp: u64,
        image: Arc<Image>,
        intrinsics: Intrinsics,
        features: Arc<FeatureMap>,
    ) -> Result<Self> {
        let grid = image.grid_shape();
        if features.shape() != grid {
            return Err(TrackError::ShapeMismatch {
                what: "feature map",
                expected: grid,
                actual: features.shape(),
            });
        }

        Ok(Self {
            timestamp,
            image,
            pose: None,
            disparity: None,
            depth: None,
            intrinsics: intrinsics.to_grid(),
            features,
            context: None,
            input: None,
            mask: Arc::new(MotionMask::empty(grid.0, grid.1)),
        })
    }

    pub fn with_pose(mut self, pose: SE3) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn with_disparity(mut self, disparity: f64) -> Self {
        self.disparity = Some(disparity);
        self
    }

    /// Attach sensor depth. It must match the image resolution.
    pub fn with_depth(mut self, depth: Option<Arc<DepthMap>>) -> Result<Self> {
        if let Some(depth) = &depth {
            let expected = (self.image.height(), self.image.width());
            if depth.shape() != expected {
                return Err(TrackError::ShapeMismatch {
                    what: "depth map",
                    expected,
                    actual: depth.shape(),
                });
            }
        }
        self.depth = depth;
        Ok(self)
    }

    pub fn with_context(mut self, context: Arc<ContextState>, input: Arc<InputState>) -> Self {
        self.context = Some(context);
        self.input = Some(input);
        self
    }

    /// Attach a mask given at image or grid resolution.
    pub fn with_mask(mut self, mask: Option<&MotionMask>) -> Result<Self> {
        if let Some(mask) = mask {
            let (rows, cols) = self.grid_shape();
            self.mask = Arc::new(mask.to_grid(rows, cols)?);
        }
        Ok(self)
    }

    pub fn grid_shape(&self) -> (usize, usize) {
        self.features.shape()
    }

    /// Per-cell inverse depth and whether it came from the depth sensor.
    ///
    /// Cells without a sensor sample fall back to the scalar disparity, then
    /// to [`DEFAULT_DISPARITY`].
    pub fn cell_inverse_depths(&self) -> Vec<(f64, bool)> {
        let (rows, cols) = self.grid_shape();
        let scalar = self.disparity.unwrap_or(DEFAULT_DISPARITY);
        match &self.depth {
            Some(depth) => depth
                .grid_inverse_depth()
                .into_iter()
                .map(|d| d.map_or((scalar, false), |d| (d, true)))
                .collect(),
            None => vec![(scalar, false); rows * cols],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::GridTensor;
    use crate::test_helpers::solid_image;

    fn record(width: usize, height: usize) -> KeyframeRecord {
        let image = Arc::new(solid_image(width, height, 0));
        let (rows, cols) = image.grid_shape();
        let fmap = Arc::new(GridTensor::zeros(rows, cols, 4));
        KeyframeRecord::new(7, image, Intrinsics::new(80.0, 80.0, 16.0, 16.0), fmap).unwrap()
    }

    #[test]
    fn test_intrinsics_stored_at_grid_scale() {
        let rec = record(32, 32);

        assert_eq!(rec.intrinsics, Intrinsics::new(10.0, 10.0, 2.0, 2.0));
        assert!(rec.pose.is_none());
        assert_eq!(rec.mask.masked_count(), 0);
    }

    #[test]
    fn test_feature_grid_must_match_image() {
        let image = Arc::new(solid_image(32, 32, 0));
        let fmap = Arc::new(GridTensor::zeros(2, 4, 4));
        let err = KeyframeRecord::new(0, image, Intrinsics::new(1.0, 1.0, 0.0, 0.0), fmap);

        assert!(matches!(err, Err(TrackError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_inverse_depth_fallbacks() {
        let rec = record(16, 16).with_disparity(0.25);
        assert_eq!(rec.cell_inverse_depths(), vec![(0.25, false); 4]);

        let mut data = vec![0.0f32; 16 * 16];
        data[3 * 16 + 3] = 2.0;
        let depth = Arc::new(DepthMap::new(16, 16, data).unwrap());
        let rec = rec.with_depth(Some(depth)).unwrap();
        let cells = rec.cell_inverse_depths();

        assert_eq!(cells[0], (0.5, true));
        assert_eq!(cells[1], (0.25, false));
    }

    #[test]
    fn test_depth_must_match_image() {
        for (width, height) in [(32, 32), (8, 8), (16, 32)] {
            let depth = Arc::new(DepthMap::new(width, height, vec![1.0; width * height]).unwrap());
            let err = record(16, 16).with_depth(Some(depth)).unwrap_err();

            assert!(matches!(
                err,
                TrackError::ShapeMismatch { what: "depth map", expected: (16, 16), actual } if actual == (height, width)
            ));
        }

        assert!(record(16, 16).with_depth(None).unwrap().depth.is_none());
    }
}
