//! Tracker configuration.
//!
//! All fields have defaults, so a partial document deserializes into a
//! complete configuration. Loading the document is up to the caller.

use serde::Deserialize;

use crate::error::{Result, TrackError};

/// Top-level configuration for tracking and trajectory filling.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Mean flow magnitude (feature-grid pixels) a frame must exceed to
    /// become a keyframe.
    pub threshold: f64,

    /// Maximum number of live buffer slots, keyframes plus one fill window.
    pub buffer_capacity: usize,

    /// Frames per trajectory-filling window.
    pub window_size: usize,

    /// Refinement iterations per window.
    pub refine_iterations: usize,

    /// Factor-graph solver parameters.
    pub graph: FactorGraphConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            threshold: 2.5,
            buffer_capacity: 512,
            window_size: 16,
            refine_iterations: 6,
            graph: FactorGraphConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Reject values the tracker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(invalid(format!(
                "threshold must be finite and >= 0, got {}",
                self.threshold
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity must be > 0".to_string()));
        }
        if self.window_size == 0 {
            return Err(invalid("window_size must be > 0".to_string()));
        }
        if self.window_size > self.buffer_capacity {
            return Err(invalid(format!(
                "window_size {} exceeds buffer_capacity {}",
                self.window_size, self.buffer_capacity
            )));
        }
        if self.refine_iterations == 0 {
            return Err(invalid("refine_iterations must be > 0".to_string()));
        }
        self.graph.validate()
    }
}

/// Gauss-Newton parameters for windowed refinement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FactorGraphConfig {
    /// Multiplicative Levenberg term on the Hessian diagonal.
    pub damping: f64,

    /// Additive term on the Hessian diagonal.
    pub epsilon: f64,

    /// Projected points closer than this get zero weight.
    pub min_depth: f64,
}

impl Default for FactorGraphConfig {
    fn default() -> Self {
        Self {
            damping: 1e-4,
            epsilon: 0.1,
            min_depth: 0.2,
        }
    }
}

impl FactorGraphConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("damping", self.damping),
            ("epsilon", self.epsilon),
            ("min_depth", self.min_depth),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{name} must be finite and >= 0, got {value}")));
            }
        }
        Ok(())
    }
}

fn invalid(msg: String) -> TrackError {
    TrackError::InvalidConfig(msg)
}
