//! Helper functions

use nalgebra::{DVector, Vector3};

/// Full turn in radians. Joint geometry reads more naturally in fractions of a turn.
pub const TAU: f64 = std::f64::consts::TAU;

/// Checks if all elements in the vector are finite
pub fn is_valid(values: &DVector<f64>) -> bool {
    values.iter().all(|q| q.is_finite())
}

/// Format joint values, converting radians to degrees.
pub fn format_joints(joints: &DVector<f64>) -> String {
    let row: Vec<String> = joints.iter().map(|q| format!("{:7.2}", q.to_degrees())).collect();
    format!("[{}]", row.join(" "))
}

/// Format a position as x, y, z with fixed precision
pub fn format_point(point: &Vector3<f64>) -> String {
    format!("x: {:.5}, y: {:.5}, z: {:.5}", point.x, point.y, point.z)
}

/// Dynamic vector from a fixed 3D vector
pub fn vector3_to_dvector(v: &Vector3<f64>) -> DVector<f64> {
    DVector::from_column_slice(v.as_slice())
}
