//! Geometry utilities: SO(3) Jacobians and the SE(3) Lie group.

pub mod se3;
pub mod so3;

pub use se3::SE3;
