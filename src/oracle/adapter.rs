//! Shape-checking adapter around a [`CorrelationBackend`].
//!
//! The adapter owns image normalization, enforces the 1/8 feature-grid
//! invariant on every backend output and converts backend failures into
//! [`TrackError::ExtractionFailed`].

use crate::error::{OracleStage, Result, TrackError};

use super::CorrelationBackend;
use super::types::{
    ContextState, CoordGrid, CorrelationVolume, FeatureMap, Image, InputState, MotionField,
    NormalizedImage, UpdateOutput,
};

/// ImageNet channel statistics (RGB order) used by the encoders.
const RGB_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const RGB_STD: [f32; 3] = [0.229, 0.224, 0.225];

// u8 -> [0, 1] lookup, built at compile time.
const fn build_unit_lut() -> [f32; 256] {
    let mut table = [0.0f32; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = i as f32 / 255.0;
        i += 1;
    }
    table
}

static UNIT_LUT: [f32; 256] = build_unit_lut();

/// Convert a BGR frame into the normalized RGB tensor the encoders expect.
pub fn normalize_image(image: &Image) -> Result<NormalizedImage> {
    let mut data = Vec::with_capacity(image.data().len());
    for px in image.data().chunks_exact(3) {
        // BGR -> RGB
        for (c, &byte) in [px[2], px[1], px[0]].iter().enumerate() {
            data.push((UNIT_LUT[byte as usize] - RGB_MEAN[c]) / RGB_STD[c]);
        }
    }
    NormalizedImage::new(image.height(), image.width(), 3, data)
}

/// Stateless adapter shared by the motion filter, factor graph and filler.
pub struct CorrelationOracle<B> {
    backend: B,
}

impl<B: CorrelationBackend> CorrelationOracle<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Correlation features for `image`, checked against the 1/8 grid.
    pub fn features(&self, image: &Image) -> Result<FeatureMap> {
        let input = normalize_image(image)?;
        let fmap = self
            .backend
            .extract_features(&input)
            .map_err(|e| TrackError::extraction(OracleStage::Features, e))?;
        check_shape("feature map", image.grid_shape(), fmap.shape())?;
        Ok(fmap)
    }

    /// Context state and input for `image`.
    pub fn context(&self, image: &Image) -> Result<(ContextState, InputState)> {
        let input = normalize_image(image)?;
        let (context, inp) = self
            .backend
            .extract_context(&input)
            .map_err(|e| TrackError::extraction(OracleStage::Context, e))?;
        check_shape("context state", image.grid_shape(), context.shape())?;
        check_shape("context input", image.grid_shape(), inp.shape())?;
        Ok((context, inp))
    }

    /// Look up correlation between `source` and `target` at `coords`.
    pub fn correlate(
        &self,
        source: &FeatureMap,
        target: &FeatureMap,
        coords: &CoordGrid,
    ) -> Result<CorrelationVolume> {
        check_shape("correlation grid", source.shape(), coords.shape())?;
        let corr = self
            .backend
            .correlate(source, target, coords)
            .map_err(|e| TrackError::extraction(OracleStage::Correlation, e))?;
        check_shape("correlation volume", coords.shape(), corr.shape())?;
        Ok(corr)
    }

    /// One application of the update operator.
    pub fn update(
        &self,
        context: &ContextState,
        input: &InputState,
        corr: &CorrelationVolume,
    ) -> Result<UpdateOutput> {
        let out = self
            .backend
            .update(context, input, corr)
            .map_err(|e| TrackError::extraction(OracleStage::Update, e))?;
        check_shape("update context", context.shape(), out.context.shape())?;
        check_shape("motion field", corr.shape(), out.motion.shape())?;
        Ok(out)
    }

    /// Correlate `source` against `target` at `coords` and run one update.
    pub fn motion(
        &self,
        source: &FeatureMap,
        target: &FeatureMap,
        context: &ContextState,
        input: &InputState,
        coords: &CoordGrid,
    ) -> Result<(ContextState, MotionField)> {
        let corr = self.correlate(source, target, coords)?;
        let out = self.update(context, input, &corr)?;
        Ok((out.context, out.motion))
    }
}

fn check_shape(what: &'static str, expected: (usize, usize), actual: (usize, usize)) -> Result<()> {
    if expected != actual {
        return Err(TrackError::ShapeMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}
