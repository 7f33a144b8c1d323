//! Rigid body displacement (rotation and translation).
//!
//! A [`Displacement`] stores the rotation as a 3x3 orthonormal matrix and the translation
//! as a vector. Displacements compose in the moving frame: `a.compose(&b)` is "apply `a`,
//! then apply `b` expressed in the frame `a` leaves behind". This is the same convention
//! nalgebra uses for `Isometry3` multiplication, so `a * b` reads naturally when walking
//! down a kinematic chain from the root towards the tip:
//!
//! ```
//! use nalgebra::Vector3;
//! use rs_multipod_kinematics::displacement::Displacement;
//! use rs_multipod_kinematics::utils::TAU;
//!
//! // Turn a quarter around Z, then step one unit forward along the (now turned) X axis.
//! let turn = Displacement::from_axis_angle(&Vector3::z(), TAU / 4.0).unwrap();
//! let step = Displacement::from_translation(Vector3::new(1.0, 0.0, 0.0));
//! let moved = turn.compose(&step);
//! assert!((moved.translation() - Vector3::new(0.0, 1.0, 0.0)).norm() < 1E-12);
//! ```
//!
//! No re-orthonormalization is performed after composition. The drift accumulated over
//! the few dozen compositions of a tree evaluation is far below the solver tolerances.

extern crate nalgebra as na;

use std::ops::Mul;
use na::{Isometry3, Matrix3, Rotation3, Translation3, Unit, UnitQuaternion, Vector3};
use crate::error::{KinematicsError, Result};

/// Axes shorter than this are rejected as rotation axes.
const MIN_AXIS_NORM: f64 = 1E-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Displacement {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl Displacement {
    /// Zero translation, identity rotation.
    pub fn identity() -> Self {
        Displacement {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Pure translation.
    pub fn from_translation(vector: Vector3<f64>) -> Self {
        Displacement {
            rotation: Matrix3::identity(),
            translation: vector,
        }
    }

    /// Pure rotation around the given axis. The axis does not need to be normalized but
    /// must not be zero.
    ///
    /// # Arguments
    ///
    /// * `axis` - rotation axis, any non-zero length
    /// * `angle` - rotation angle in radians, positive is counter-clockwise when looking
    ///   against the axis (right hand rule)
    ///
    /// # Returns
    ///
    /// The rotation, or [`KinematicsError::ZeroAxis`] if the axis has no direction.
    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Result<Self> {
        let axis = Unit::try_new(*axis, MIN_AXIS_NORM).ok_or(KinematicsError::ZeroAxis)?;
        Ok(Self::from_unit_axis_angle(&axis, angle))
    }

    /// Pure rotation around an already normalized axis. The matrix is derived from the
    /// half-angle unit quaternion, which is the standard axis-angle conversion.
    pub fn from_unit_axis_angle(axis: &Unit<Vector3<f64>>, angle: f64) -> Self {
        let quaternion = UnitQuaternion::from_axis_angle(axis, angle);
        Displacement {
            rotation: quaternion.to_rotation_matrix().into_inner(),
            translation: Vector3::zeros(),
        }
    }

    /// Builds the displacement directly from its parts. The rotation matrix is trusted
    /// to be orthonormal.
    pub fn from_parts(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Displacement { rotation, translation }
    }

    /// Equivalent displacement to `self` then `other`, with `other` expressed in the
    /// frame produced by `self`.
    pub fn compose(&self, other: &Displacement) -> Displacement {
        Displacement {
            rotation: self.rotation * other.rotation,
            translation: self.translation + self.rotation * other.translation,
        }
    }

    /// The displacement that undoes this one: `a.compose(&a.inverse())` is the identity.
    pub fn inverse(&self) -> Displacement {
        // Orthonormal matrix, transpose is the inverse.
        let rotation = self.rotation.transpose();
        Displacement {
            translation: -(rotation * self.translation),
            rotation,
        }
    }

    /// Position of the origin after the displacement.
    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    /// Applies only the rotation part to the vector.
    pub fn rotate_vector(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * vector
    }

    /// Applies the full displacement to the point.
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }

    /// Checks that `RᵀR` is within `tolerance` of the identity (element-wise).
    pub fn is_orthonormal(&self, tolerance: f64) -> bool {
        let deviation = self.rotation.transpose() * self.rotation - Matrix3::identity();
        deviation.iter().all(|x| x.abs() <= tolerance)
    }

    /// Converts into nalgebra isometry. The rotation is re-normalized into a quaternion
    /// on the way, so this is also a way to remove accumulated drift.
    pub fn to_isometry(&self) -> Isometry3<f64> {
        let rotation = Rotation3::from_matrix(&self.rotation);
        Isometry3::from_parts(
            Translation3::from(self.translation),
            UnitQuaternion::from_rotation_matrix(&rotation),
        )
    }
}

impl Default for Displacement {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<Isometry3<f64>> for Displacement {
    fn from(isometry: Isometry3<f64>) -> Self {
        Displacement {
            rotation: isometry.rotation.to_rotation_matrix().into_inner(),
            translation: isometry.translation.vector,
        }
    }
}

impl Mul for Displacement {
    type Output = Displacement;

    fn mul(self, other: Displacement) -> Displacement {
        self.compose(&other)
    }
}

impl<'a> Mul<&'a Displacement> for &'a Displacement {
    type Output = Displacement;

    fn mul(self, other: &'a Displacement) -> Displacement {
        self.compose(other)
    }
}
