//! SE3: 6-DOF rigid body transformation (rotation + translation).
//!
//! Tangent vectors are ordered `[τ; φ]` (translation part first, then the
//! rotation vector), and increments are applied on the left:
//! `T ← exp(δ) ∘ T`.

use nalgebra::{Matrix3, Matrix6, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use super::so3::{left_jacobian_so3, left_jacobian_so3_inv, skew};

/// Rigid transformation acting on points as p' = R * p + t.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Pure translation.
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation,
        }
    }

    /// Construct from quaternion (w, x, y, z) and translation.
    pub fn from_quaternion(qw: f64, qx: f64, qy: f64, qz: f64, translation: Vector3<f64>) -> Self {
        let rotation =
            UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(qw, qx, qy, qz));
        Self {
            rotation,
            translation,
        }
    }

    /// Inverse transformation: [R | t]⁻¹ = [Rᵀ | -Rᵀ t].
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Compose two transforms: self ∘ other.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Transform a single point.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Rotation as a 3x3 matrix.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Exponential map from the tangent vector `[τ; φ]`.
    ///
    /// ```text
    /// exp([τ; φ]) = [ Exp(φ) | Jl(φ) τ ]
    /// ```
    pub fn exp(tangent: &Vector6<f64>) -> Self {
        let tau = tangent.fixed_rows::<3>(0).into_owned();
        let phi = tangent.fixed_rows::<3>(3).into_owned();

        Self {
            rotation: UnitQuaternion::from_scaled_axis(phi),
            translation: left_jacobian_so3(&phi) * tau,
        }
    }

    /// Logarithm map to the tangent vector `[τ; φ]`.
    pub fn log(&self) -> Vector6<f64> {
        let phi = self.rotation.scaled_axis();
        let tau = left_jacobian_so3_inv(&phi) * self.translation;

        let mut out = Vector6::zeros();
        out.fixed_rows_mut::<3>(0).copy_from(&tau);
        out.fixed_rows_mut::<3>(3).copy_from(&phi);
        out
    }

    /// Apply a tangent-space increment on the left: exp(δ) ∘ self.
    pub fn retract(&self, delta: &Vector6<f64>) -> Self {
        Self::exp(delta).compose(self)
    }

    /// Adjoint matrix, so that T exp(ξ) T⁻¹ = exp(Adj(T) ξ).
    ///
    /// ```text
    /// Adj(T) = | R  [t]× R |
    ///          | 0     R   |
    /// ```
    pub fn adjoint(&self) -> Matrix6<f64> {
        let r = self.rotation_matrix();
        let mut adj = Matrix6::zeros();
        adj.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        adj.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(skew(&self.translation) * r));
        adj.fixed_view_mut::<3, 3>(3, 3).copy_from(&r);
        adj
    }

    /// Geodesic interpolation between `from` and `to`.
    ///
    /// `fraction = 0` returns `from` exactly; `fraction = 1` returns `to` up to
    /// round-off. Fractions outside `[0, 1]` extrapolate along the same
    /// one-parameter subgroup.
    pub fn interpolate(from: &SE3, to: &SE3, fraction: f64) -> Self {
        let delta = to.compose(&from.inverse()).log();
        Self::exp(&(delta * fraction)).compose(from)
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}
