//! Input device seam: turns named axis readings into body targets.
//!
//! Devices (joysticks, network remotes, scripted inputs) implement [`AxisSource`]. The
//! control loop polls it once per tick, maps the readings through an [`AxisMapping`] and
//! feeds the resulting [`BodyTarget`] to [`Multipod::direct_control`](crate::multipod::Multipod::direct_control).

use std::collections::HashMap;
use crate::displacement::Displacement;
use crate::multipod::body_target;
use crate::utils::TAU;

/// Source of axis readings in `[-1, 1]`.
pub trait AxisSource {
    /// Reading of the named axis. Unknown axes read as zero.
    fn axis(&self, name: &str) -> f64;
}

impl AxisSource for HashMap<String, f64> {
    fn axis(&self, name: &str) -> f64 {
        self.get(name).copied().unwrap_or(0.0)
    }
}

/// Reading clamped to `[-1, 1]`; non finite readings count as zero.
pub fn read_axis(source: &impl AxisSource, name: &str) -> f64 {
    let value = source.axis(name);
    if value.is_finite() { value.clamp(-1.0, 1.0) } else { 0.0 }
}

/// One target component: the named axis times a scale.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisTerm {
    pub axis: String,
    pub scale: f64,
}

impl AxisTerm {
    pub fn new(axis: &str, scale: f64) -> Self {
        AxisTerm { axis: axis.to_string(), scale }
    }

    fn value(&self, source: &impl AxisSource) -> f64 {
        self.scale * read_axis(source, &self.axis)
    }
}

/// Body displacement requested for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyTarget {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
}

impl BodyTarget {
    pub fn new(x: f64, y: f64, z: f64, yaw: f64) -> Self {
        BodyTarget { x, y, z, yaw }
    }

    /// `translation(x, y, z) ∘ rotation(Z, yaw)`
    pub fn to_displacement(&self) -> Displacement {
        body_target(self.x, self.y, self.z, self.yaw)
    }
}

/// Which axis drives which body target component.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisMapping {
    pub x: AxisTerm,
    pub y: AxisTerm,
    pub z: AxisTerm,
    pub yaw: AxisTerm,
}

impl Default for AxisMapping {
    /// Gamepad layout: right stick moves the body in the horizontal plane, left stick
    /// vertical raises or lowers it, left stick horizontal turns it.
    fn default() -> Self {
        AxisMapping {
            x: AxisTerm::new("ry", -1.5),
            y: AxisTerm::new("rx", 1.5),
            z: AxisTerm::new("y", 1.8),
            yaw: AxisTerm::new("x", TAU / 8.0),
        }
    }
}

impl AxisMapping {
    pub fn target(&self, source: &impl AxisSource) -> BodyTarget {
        BodyTarget {
            x: self.x.value(source),
            y: self.y.value(source),
            z: self.z.value(source),
            yaw: self.yaw.value(source),
        }
    }
}
