//! Data exchanged with the learned feature/correlation/update backend.
//!
//! Everything the network produces lives on the feature grid, which is the
//! input image downsampled by [`FEATURE_STRIDE`] in each axis.

use std::sync::Arc;

use nalgebra::Vector2;

use crate::error::{Result, TrackError};

/// Downsampling between image pixels and feature-grid cells.
pub const FEATURE_STRIDE: usize = 8;

/// Offset of the pixel sampled for each feature cell when reducing
/// full-resolution maps (depth, masks) to the grid.
const GRID_SAMPLE_OFFSET: usize = 3;

/// Feature-grid dimensions `(rows, cols)` for an image of the given size.
pub fn grid_shape(width: usize, height: usize) -> (usize, usize) {
    (height / FEATURE_STRIDE, width / FEATURE_STRIDE)
}

/// Raw 3-channel BGR frame, shared between the stream and buffer records.
#[derive(Debug, Clone)]
pub struct Image {
    width: usize,
    height: usize,
    data: Arc<[u8]>,
}

impl Image {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        let expected = width * height * 3;
        if data.len() != expected {
            return Err(TrackError::ShapeMismatch {
                what: "image buffer",
                expected: (expected, 1),
                actual: (data.len(), 1),
            });
        }
        Ok(Self {
            width,
            height,
            data: Arc::from(data.into_boxed_slice()),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Interleaved BGR bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Feature-grid `(rows, cols)` for this image.
    pub fn grid_shape(&self) -> (usize, usize) {
        grid_shape(self.width, self.height)
    }
}

/// Pinhole intrinsics `(fx, fy, cx, cy)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Multiply every parameter by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            fx: self.fx * factor,
            fy: self.fy * factor,
            cx: self.cx * factor,
            cy: self.cy * factor,
        }
    }

    /// Intrinsics expressed in feature-grid units.
    pub fn to_grid(&self) -> Self {
        self.scaled(1.0 / FEATURE_STRIDE as f64)
    }

    /// Inverse of [`Intrinsics::to_grid`].
    pub fn to_image(&self) -> Self {
        self.scaled(FEATURE_STRIDE as f64)
    }
}

/// Dense per-cell tensor, row-major with channels innermost.
#[derive(Debug, Clone, PartialEq)]
pub struct GridTensor {
    rows: usize,
    cols: usize,
    channels: usize,
    data: Vec<f32>,
}

/// Correlation features for one frame.
pub type FeatureMap = GridTensor;
/// Recurrent hidden state of the update operator.
pub type ContextState = GridTensor;
/// Static context input of the update operator.
pub type InputState = GridTensor;
/// Correlation responses sampled around a coordinate grid.
pub type CorrelationVolume = GridTensor;
/// Normalized RGB image handed to the encoders.
pub type NormalizedImage = GridTensor;

impl GridTensor {
    pub fn new(rows: usize, cols: usize, channels: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols * channels {
            return Err(TrackError::ShapeMismatch {
                what: "grid tensor",
                expected: (rows * cols, channels),
                actual: (data.len(), 1),
            });
        }
        Ok(Self {
            rows,
            cols,
            channels,
            data,
        })
    }

    pub fn zeros(rows: usize, cols: usize, channels: usize) -> Self {
        Self {
            rows,
            cols,
            channels,
            data: vec![0.0; rows * cols * channels],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Channel values of cell `(row, col)`.
    pub fn cell(&self, row: usize, col: usize) -> &[f32] {
        let start = (row * self.cols + col) * self.channels;
        &self.data[start..start + self.channels]
    }
}

/// Per-cell pixel coordinates on the feature grid (x = column, y = row).
#[derive(Debug, Clone, PartialEq)]
pub struct CoordGrid {
    rows: usize,
    cols: usize,
    coords: Vec<Vector2<f64>>,
}

impl CoordGrid {
    /// Un-displaced grid: cell `(r, c)` maps to `(c, r)`.
    pub fn identity(rows: usize, cols: usize) -> Self {
        let coords = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| Vector2::new(c as f64, r as f64)))
            .collect();
        Self { rows, cols, coords }
    }

    pub fn from_coords(rows: usize, cols: usize, coords: Vec<Vector2<f64>>) -> Result<Self> {
        if coords.len() != rows * cols {
            return Err(TrackError::ShapeMismatch {
                what: "coordinate grid",
                expected: (rows, cols),
                actual: (coords.len(), 1),
            });
        }
        Ok(Self { rows, cols, coords })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn coords(&self) -> &[Vector2<f64>] {
        &self.coords
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

/// Flow revision and confidence emitted by one application of the update
/// operator.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionField {
    rows: usize,
    cols: usize,
    delta: Vec<Vector2<f64>>,
    weight: Vec<Vector2<f64>>,
}

impl MotionField {
    pub fn new(
        rows: usize,
        cols: usize,
        delta: Vec<Vector2<f64>>,
        weight: Vec<Vector2<f64>>,
    ) -> Result<Self> {
        let cells = rows * cols;
        if delta.len() != cells || weight.len() != cells {
            return Err(TrackError::ShapeMismatch {
                what: "motion field",
                expected: (cells, cells),
                actual: (delta.len(), weight.len()),
            });
        }
        Ok(Self {
            rows,
            cols,
            delta,
            weight,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn delta(&self) -> &[Vector2<f64>] {
        &self.delta
    }

    pub fn weight(&self) -> &[Vector2<f64>] {
        &self.weight
    }

    /// Mean per-cell delta norm; the motion magnitude used for keyframe
    /// selection.
    pub fn mean_magnitude(&self) -> f64 {
        if self.delta.is_empty() {
            return 0.0;
        }
        self.delta.iter().map(|d| d.norm()).sum::<f64>() / self.delta.len() as f64
    }
}

/// Output of the update operator.
#[derive(Debug, Clone)]
pub struct UpdateOutput {
    pub context: ContextState,
    pub motion: MotionField,
}

/// Full-resolution metric depth, `<= 0` marks missing measurements.
#[derive(Debug, Clone)]
pub struct DepthMap {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl DepthMap {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != width * height {
            return Err(TrackError::ShapeMismatch {
                what: "depth map",
                expected: (height, width),
                actual: (data.len(), 1),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// `(height, width)` in pixels.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Inverse depth for each feature cell, `None` where no valid sample exists.
    pub fn grid_inverse_depth(&self) -> Vec<Option<f64>> {
        let (rows, cols) = grid_shape(self.width, self.height);
        let mut out = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            let y = r * FEATURE_STRIDE + GRID_SAMPLE_OFFSET;
            for c in 0..cols {
                let x = c * FEATURE_STRIDE + GRID_SAMPLE_OFFSET;
                let depth = self.data[y * self.width + x] as f64;
                out.push((depth > 0.0).then(|| 1.0 / depth));
            }
        }
        out
    }
}

/// Cells excluded from motion estimation (e.g. moving people).
#[derive(Debug, Clone, PartialEq)]
pub struct MotionMask {
    rows: usize,
    cols: usize,
    data: Vec<bool>,
}

impl MotionMask {
    /// All-zero mask on a `rows x cols` grid.
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![false; rows * cols],
        }
    }

    pub fn new(rows: usize, cols: usize, data: Vec<bool>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(TrackError::ShapeMismatch {
                what: "motion mask",
                expected: (rows, cols),
                actual: (data.len(), 1),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Bring the mask onto a `rows x cols` feature grid.
    ///
    /// Masks already at grid resolution pass through; image-resolution masks
    /// are sub-sampled one pixel per cell.
    pub fn to_grid(&self, rows: usize, cols: usize) -> Result<Self> {
        if (self.rows, self.cols) == (rows, cols) {
            return Ok(self.clone());
        }
        if self.rows / FEATURE_STRIDE != rows || self.cols / FEATURE_STRIDE != cols {
            return Err(TrackError::ShapeMismatch {
                what: "motion mask",
                expected: (rows, cols),
                actual: (self.rows, self.cols),
            });
        }
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            let y = r * FEATURE_STRIDE + GRID_SAMPLE_OFFSET;
            for c in 0..cols {
                let x = c * FEATURE_STRIDE + GRID_SAMPLE_OFFSET;
                data.push(self.data[y * self.cols + x]);
            }
        }
        Ok(Self { rows, cols, data })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_masked(&self, index: usize) -> bool {
        self.data.get(index).copied().unwrap_or(false)
    }

    pub fn masked_count(&self) -> usize {
        self.data.iter().filter(|&&m| m).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_grid_shape_floors() {
        assert_eq!(grid_shape(70, 45), (5, 8));
    }

    #[test]
    fn test_image_rejects_wrong_length() {
        assert!(Image::new(4, 4, vec![0; 47]).is_err());
        assert!(Image::new(4, 4, vec![0; 48]).is_ok());
    }

    #[test]
    fn test_intrinsics_grid_roundtrip() {
        let k = Intrinsics::new(400.0, 420.0, 320.0, 240.0);
        let grid = k.to_grid();

        assert_relative_eq!(grid.fx, 50.0);
        assert_relative_eq!(grid.cy, 30.0);
        assert_eq!(grid.to_image(), k);
    }

    #[test]
    fn test_identity_grid_layout() {
        let grid = CoordGrid::identity(2, 3);

        assert_eq!(grid.len(), 6);
        assert_eq!(grid.coords()[4], Vector2::new(1.0, 1.0));
    }

    #[test]
    fn test_mean_magnitude() {
        let field = MotionField::new(
            1,
            2,
            vec![Vector2::new(3.0, 4.0), Vector2::new(0.0, 1.0)],
            vec![Vector2::new(1.0, 1.0); 2],
        )
        .unwrap();

        assert_relative_eq!(field.mean_magnitude(), 3.0);
    }

    #[test]
    fn test_depth_sampling() {
        let mut data = vec![0.0f32; 16 * 16];
        data[3 * 16 + 3] = 2.0;
        let depth = DepthMap::new(16, 16, data).unwrap();
        let inv = depth.grid_inverse_depth();

        assert_eq!(inv.len(), 4);
        assert_eq!(inv[0], Some(0.5));
        assert_eq!(inv[1], None);
    }

    #[test]
    fn test_mask_downsample() {
        let mut data = vec![false; 16 * 16];
        data[11 * 16 + 11] = true;
        let mask = MotionMask::new(16, 16, data).unwrap().to_grid(2, 2).unwrap();

        assert_eq!(mask.masked_count(), 1);
        assert!(mask.is_masked(3));
        assert!(MotionMask::empty(3, 3).to_grid(2, 2).is_err());
    }
}
