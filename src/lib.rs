//! Rust implementation of forward and inverse kinematics for multi-legged robots (hexapods
//! and other multipods).
//!
//! A mechanism is described as a [kinematic tree](kinematic_tree) of rigid links and revolute
//! joints. Forward kinematics walks the tree composing [displacements](displacement). Inverse
//! kinematics is numeric: the [Jacobian solvers](jacobian) estimate the Jacobian with finite
//! differences and step the joint angles towards the target, one step per control tick.
//! Where solving at control rate is too expensive, solutions can be cached in an
//! N-dimensional [lookup table](lookup) and interpolated.
//!
//! # Features
//!
//! - Displacement algebra (rotation + translation), interoperable with `nalgebra::Isometry3`.
//! - Kinematic trees with breadth-first evaluation into reusable buffers.
//! - Jacobian inverse (pseudo-inverse) and damped least squares solvers, with limits on the
//!   joint correction per step and on the chased output error.
//! - Lookup tables with nearest neighbour and multilinear interpolation, saved in the
//!   NumPy `.npy` format. Population runs in parallel with the `parallel` feature.
//! - Three joint [legs](leg) and radially arranged [multipods](multipod) with direct body
//!   control, optional joint limits and body level lookup tables.
//! - An [input device seam](control) mapping joystick-like axes to body targets.
//! - YAML configuration (feature `allow_filesystem`), with `deg(angle)` support.
//!
//! ## Binary
//!
//! The `multipod` binary (feature `allow_filesystem`) generates lookup tables, inspects them
//! and simulates direct control from the command line.

pub mod error;
pub mod displacement;
pub mod kinematic_tree;
pub mod jacobian;
pub mod npy;
pub mod lookup;
pub mod leg;
pub mod multipod;
pub mod control;
pub mod utils;

#[cfg(feature = "allow_filesystem")]
pub mod config;

#[cfg(test)]
#[cfg(feature = "allow_filesystem")]
mod tests;
