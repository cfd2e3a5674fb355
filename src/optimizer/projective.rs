//! Inverse-depth reprojection between two keyframes and its Jacobians.
//!
//! A source cell at pixel `(u, v)` with inverse depth `d` is the homogeneous
//! point `(X, d)` with `X = K_i⁻¹ (u, v, 1)`. The relative pose
//! `G_ij = G_j ∘ G_i⁻¹` maps it to `p = R X + t d`, which projects through
//! `K_j`. Pose Jacobians are taken for left increments `G ← exp(ξ) ∘ G` with
//! `ξ = [τ; φ]`.

use nalgebra::{Matrix2x3, Matrix2x6, Matrix3x6, Matrix6, Vector2, Vector3};

use crate::geometry::SE3;
use crate::geometry::so3::skew;
use crate::oracle::Intrinsics;

/// Reprojected cell with its linearization.
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    /// Pixel in the target frame.
    pub coords: Vector2<f64>,

    /// Homogeneous depth `p.z` in the target frame.
    pub depth: f64,

    /// d(coords) / d(target pose increment).
    pub jac_target: Matrix2x6<f64>,

    /// d(coords) / d(source pose increment).
    pub jac_source: Matrix2x6<f64>,

    /// d(coords) / d(source inverse depth).
    pub jac_disparity: Vector2<f64>,
}

/// Bearing of `pixel` at unit depth.
pub fn back_project(intrinsics: &Intrinsics, pixel: &Vector2<f64>) -> Vector3<f64> {
    Vector3::new(
        (pixel.x - intrinsics.cx) / intrinsics.fx,
        (pixel.y - intrinsics.cy) / intrinsics.fy,
        1.0,
    )
}

/// Reproject one source cell into the target frame.
///
/// `adjoint` must be `relative.adjoint()`; it is shared by every cell of an
/// edge. Returns `None` when the point lands at or behind `min_depth`.
pub fn project_cell(
    relative: &SE3,
    adjoint: &Matrix6<f64>,
    source: &Intrinsics,
    target: &Intrinsics,
    pixel: &Vector2<f64>,
    inv_depth: f64,
    min_depth: f64,
) -> Option<Projection> {
    let ray = back_project(source, pixel);
    let p = relative.rotation * ray + relative.translation * inv_depth;
    if p.z <= min_depth {
        return None;
    }

    let inv_z = 1.0 / p.z;
    let coords = Vector2::new(
        target.fx * p.x * inv_z + target.cx,
        target.fy * p.y * inv_z + target.cy,
    );

    #[rustfmt::skip]
    let jac_proj = Matrix2x3::new(
        target.fx * inv_z, 0.0,               -target.fx * p.x * inv_z * inv_z,
        0.0,               target.fy * inv_z, -target.fy * p.y * inv_z * inv_z,
    );

    let mut jac_point = Matrix3x6::zeros();
    jac_point
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&(nalgebra::Matrix3::identity() * inv_depth));
    jac_point.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-skew(&p)));

    let jac_target = jac_proj * jac_point;
    let jac_source = -(jac_target * adjoint);
    let jac_disparity = jac_proj * relative.translation;

    Some(Projection {
        coords,
        depth: p.z,
        jac_target,
        jac_source,
        jac_disparity,
    })
}
