#![allow(dead_code)]

use std::sync::Arc;

use anyhow::bail;
use nalgebra::Vector2;

use crate::buffer::KeyframeRecord;
use crate::geometry::SE3;
use crate::oracle::{
    ContextState, CoordGrid, CorrelationBackend, CorrelationVolume, FEATURE_STRIDE, FeatureMap,
    GridTensor, Image, InputState, Intrinsics, MotionField, NormalizedImage, UpdateOutput,
};

const FEATURE_CHANNELS: usize = 4;

pub(crate) fn solid_image(width: usize, height: usize, value: u8) -> Image {
    match Image::new(width, height, vec![value; width * height * 3]) {
        Ok(image) => image,
        Err(err) => panic!("solid image {width}x{height}: {err}"),
    }
}

/// Intrinsics used by the 64x48 test frames.
pub(crate) fn test_intrinsics() -> Intrinsics {
    Intrinsics::new(50.0, 50.0, 32.0, 24.0)
}

/// 16x16 record with zero features and no context.
pub(crate) fn blank_record(timestamp: u64) -> KeyframeRecord {
    let image = Arc::new(solid_image(16, 16, 0));
    let fmap = Arc::new(GridTensor::zeros(2, 2, FEATURE_CHANNELS));
    KeyframeRecord::new(timestamp, image, Intrinsics::new(16.0, 16.0, 8.0, 8.0), fmap)
        .unwrap_or_else(|err| panic!("blank record: {err}"))
}

/// 64x48 keyframe with the given pose, zero features and zero context.
pub(crate) fn keyframe(timestamp: u64, pose: SE3) -> KeyframeRecord {
    let image = Arc::new(solid_image(64, 48, 0));
    let (rows, cols) = image.grid_shape();
    let fmap = Arc::new(GridTensor::zeros(rows, cols, FEATURE_CHANNELS));
    let ctx = Arc::new(GridTensor::zeros(rows, cols, FEATURE_CHANNELS));
    let inp = Arc::new(GridTensor::zeros(rows, cols, FEATURE_CHANNELS));
    KeyframeRecord::new(timestamp, image, test_intrinsics(), fmap)
        .unwrap_or_else(|err| panic!("keyframe: {err}"))
        .with_pose(pose)
        .with_disparity(1.0)
        .with_context(ctx, inp)
}

fn grid_of(image: &NormalizedImage) -> (usize, usize) {
    (image.rows() / FEATURE_STRIDE, image.cols() / FEATURE_STRIDE)
}

/// Reports the same flow everywhere, regardless of input.
pub(crate) struct ConstantMotionBackend {
    magnitude: f64,
    weight: f64,
    grid_override: Option<(usize, usize)>,
    fail_correlation: bool,
}

impl ConstantMotionBackend {
    pub(crate) fn new(magnitude: f64) -> Self {
        Self {
            magnitude,
            weight: 1.0,
            grid_override: None,
            fail_correlation: false,
        }
    }

    /// Extraction succeeds but every correlation lookup fails.
    pub(crate) fn failing_correlation(mut self) -> Self {
        self.fail_correlation = true;
        self
    }

    pub(crate) fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Emit feature maps of a fixed, possibly wrong, shape.
    pub(crate) fn with_grid_override(mut self, rows: usize, cols: usize) -> Self {
        self.grid_override = Some((rows, cols));
        self
    }

    fn grid(&self, image: &NormalizedImage) -> (usize, usize) {
        self.grid_override.unwrap_or_else(|| grid_of(image))
    }
}

impl CorrelationBackend for ConstantMotionBackend {
    fn extract_features(&self, image: &NormalizedImage) -> anyhow::Result<FeatureMap> {
        let (rows, cols) = self.grid(image);
        Ok(GridTensor::zeros(rows, cols, FEATURE_CHANNELS))
    }

    fn extract_context(
        &self,
        image: &NormalizedImage,
    ) -> anyhow::Result<(ContextState, InputState)> {
        let (rows, cols) = self.grid(image);
        Ok((
            GridTensor::zeros(rows, cols, FEATURE_CHANNELS),
            GridTensor::zeros(rows, cols, FEATURE_CHANNELS),
        ))
    }

    fn correlate(
        &self,
        _source: &FeatureMap,
        _target: &FeatureMap,
        coords: &CoordGrid,
    ) -> anyhow::Result<CorrelationVolume> {
        if self.fail_correlation {
            bail!("correlation lookup failed");
        }
        Ok(GridTensor::zeros(coords.rows(), coords.cols(), 1))
    }

    fn update(
        &self,
        context: &ContextState,
        _input: &InputState,
        corr: &CorrelationVolume,
    ) -> anyhow::Result<UpdateOutput> {
        let (rows, cols) = corr.shape();
        let cells = rows * cols;
        let motion = MotionField::new(
            rows,
            cols,
            vec![Vector2::new(self.magnitude, 0.0); cells],
            vec![Vector2::new(self.weight, self.weight); cells],
        )?;
        Ok(UpdateOutput {
            context: context.clone(),
            motion,
        })
    }
}

/// Flow magnitude equals the brightness difference between two solid frames.
///
/// Features carry the frame's byte value, so a stream of solid images scripts
/// the per-frame motion magnitude.
pub(crate) struct BrightnessBackend {
    failing_on: Option<u8>,
}

impl BrightnessBackend {
    pub(crate) fn new() -> Self {
        Self { failing_on: None }
    }

    /// Fail feature extraction for frames of the given brightness.
    pub(crate) fn failing_on(value: u8) -> Self {
        Self {
            failing_on: Some(value),
        }
    }

    fn brightness(image: &NormalizedImage) -> u8 {
        let red = image.cell(0, 0)[0] as f64;
        ((red * 0.229 + 0.485) * 255.0).round() as u8
    }
}

impl CorrelationBackend for BrightnessBackend {
    fn extract_features(&self, image: &NormalizedImage) -> anyhow::Result<FeatureMap> {
        let value = Self::brightness(image);
        if self.failing_on == Some(value) {
            bail!("encoder rejected frame with brightness {value}");
        }
        let (rows, cols) = grid_of(image);
        Ok(GridTensor::new(rows, cols, 1, vec![value as f32; rows * cols])?)
    }

    fn extract_context(
        &self,
        image: &NormalizedImage,
    ) -> anyhow::Result<(ContextState, InputState)> {
        let (rows, cols) = grid_of(image);
        Ok((
            GridTensor::zeros(rows, cols, 1),
            GridTensor::zeros(rows, cols, 1),
        ))
    }

    fn correlate(
        &self,
        source: &FeatureMap,
        target: &FeatureMap,
        coords: &CoordGrid,
    ) -> anyhow::Result<CorrelationVolume> {
        let diff = target.cell(0, 0)[0] - source.cell(0, 0)[0];
        Ok(GridTensor::new(
            coords.rows(),
            coords.cols(),
            1,
            vec![diff; coords.len()],
        )?)
    }

    fn update(
        &self,
        context: &ContextState,
        _input: &InputState,
        corr: &CorrelationVolume,
    ) -> anyhow::Result<UpdateOutput> {
        let (rows, cols) = corr.shape();
        let delta = corr
            .data()
            .iter()
            .map(|&d| Vector2::new(d as f64, 0.0))
            .collect();
        Ok(UpdateOutput {
            context: context.clone(),
            motion: MotionField::new(rows, cols, delta, vec![Vector2::new(1.0, 1.0); rows * cols])?,
        })
    }
}

/// Every call fails.
pub(crate) struct FailingBackend;

impl CorrelationBackend for FailingBackend {
    fn extract_features(&self, _image: &NormalizedImage) -> anyhow::Result<FeatureMap> {
        bail!("feature encoder unavailable")
    }

    fn extract_context(
        &self,
        _image: &NormalizedImage,
    ) -> anyhow::Result<(ContextState, InputState)> {
        bail!("context encoder unavailable")
    }

    fn correlate(
        &self,
        _source: &FeatureMap,
        _target: &FeatureMap,
        _coords: &CoordGrid,
    ) -> anyhow::Result<CorrelationVolume> {
        bail!("correlation unavailable")
    }

    fn update(
        &self,
        _context: &ContextState,
        _input: &InputState,
        _corr: &CorrelationVolume,
    ) -> anyhow::Result<UpdateOutput> {
        bail!("update operator unavailable")
    }
}

/// Revises every projected coordinate back onto the un-displaced grid.
///
/// The correlation volume carries the lookup coordinates so the update can
/// emit `identity - coords` as its flow revision. Refinement under this
/// backend drives each edge towards an identity relative pose.
pub(crate) struct PullToGridBackend;

impl CorrelationBackend for PullToGridBackend {
    fn extract_features(&self, image: &NormalizedImage) -> anyhow::Result<FeatureMap> {
        let (rows, cols) = grid_of(image);
        Ok(GridTensor::zeros(rows, cols, FEATURE_CHANNELS))
    }

    fn extract_context(
        &self,
        image: &NormalizedImage,
    ) -> anyhow::Result<(ContextState, InputState)> {
        let (rows, cols) = grid_of(image);
        Ok((
            GridTensor::zeros(rows, cols, FEATURE_CHANNELS),
            GridTensor::zeros(rows, cols, FEATURE_CHANNELS),
        ))
    }

    fn correlate(
        &self,
        _source: &FeatureMap,
        _target: &FeatureMap,
        coords: &CoordGrid,
    ) -> anyhow::Result<CorrelationVolume> {
        let data = coords
            .coords()
            .iter()
            .flat_map(|p| [p.x as f32, p.y as f32])
            .collect();
        Ok(GridTensor::new(coords.rows(), coords.cols(), 2, data)?)
    }

    fn update(
        &self,
        context: &ContextState,
        _input: &InputState,
        corr: &CorrelationVolume,
    ) -> anyhow::Result<UpdateOutput> {
        let (rows, cols) = corr.shape();
        let identity = CoordGrid::identity(rows, cols);
        let delta = identity
            .coords()
            .iter()
            .zip(corr.data().chunks_exact(2))
            .map(|(grid, c)| grid - Vector2::new(c[0] as f64, c[1] as f64))
            .collect();
        Ok(UpdateOutput {
            context: context.clone(),
            motion: MotionField::new(rows, cols, delta, vec![Vector2::new(1.0, 1.0); rows * cols])?,
        })
    }
}
