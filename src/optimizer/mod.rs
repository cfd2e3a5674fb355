//! Optimization module for windowed pose refinement.
//!
//! Implements damped Gauss-Newton over buffer poses, driven by the flow
//! revisions of the correlation oracle:
//! - [`FactorGraph`] - edges between buffer slots, `update` and `refine`
//! - [`projective`] - inverse-depth reprojection and its Jacobians

pub mod factor_graph;
pub mod projective;

pub use crate::config::FactorGraphConfig;
pub use factor_graph::{Factor, FactorGraph, IterationOutcome, RefineReport};
