//! SO(3) Lie group utilities.
//!
//! Provides skew-symmetric matrix construction and the left/right Jacobians
//! used by the SE(3) exponential and logarithm maps.

use nalgebra::{Matrix3, Vector3};

/// Below this rotation angle the series expansions are used.
const SMALL_ANGLE: f64 = 1e-6;

/// Cross-product matrix: `skew(v) * u == v.cross(&u)`.
#[inline]
#[rustfmt::skip]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Right Jacobian of SO(3).
///
/// ```text
/// Jr(φ) = I - (1 - cos|φ|)/|φ|² [φ]× + (|φ| - sin|φ|)/|φ|³ [φ]×²
/// ```
pub fn right_jacobian_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let skew_phi = skew(phi);

    if theta < SMALL_ANGLE {
        return Matrix3::identity() - 0.5 * skew_phi;
    }

    let theta_sq = theta * theta;
    let theta_cu = theta_sq * theta;

    Matrix3::identity() - ((1.0 - theta.cos()) / theta_sq) * skew_phi
        + ((theta - theta.sin()) / theta_cu) * skew_phi * skew_phi
}

/// Inverse right Jacobian.
///
/// ```text
/// Jr⁻¹(φ) = I + 0.5 [φ]× + (1/|φ|² - cos(|φ|/2) / (2|φ| sin(|φ|/2))) [φ]×²
/// ```
///
/// The half-angle form stays finite at |φ| = π.
pub fn right_jacobian_so3_inv(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let skew_phi = skew(phi);
    let skew_phi_sq = skew_phi * skew_phi;

    if theta < SMALL_ANGLE {
        return Matrix3::identity() + 0.5 * skew_phi + (1.0 / 12.0) * skew_phi_sq;
    }

    let half = 0.5 * theta;
    let coeff = 1.0 / (theta * theta) - half.cos() / (2.0 * theta * half.sin());

    Matrix3::identity() + 0.5 * skew_phi + coeff * skew_phi_sq
}

/// Left Jacobian Jl(φ) = Jr(-φ).
///
/// This is the `V` matrix of the SE(3) exponential: t = Jl(φ) τ.
pub fn left_jacobian_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    right_jacobian_so3(&(-phi))
}

/// Inverse of the left Jacobian, Jl⁻¹(φ) = Jr⁻¹(-φ).
pub fn left_jacobian_so3_inv(phi: &Vector3<f64>) -> Matrix3<f64> {
    right_jacobian_so3_inv(&(-phi))
}
