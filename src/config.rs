//! Multipod configuration from YAML file (optional)

use std::path::Path;
use nalgebra::Vector3;
use serde::Deserialize;
use serde_saphyr::Options;
use crate::error::{KinematicsError, Result};
use crate::leg::{
    DEFAULT_DAMPING, DEFAULT_MAX_INPUT_FIX, DEFAULT_POPULATE_ITERATIONS, JointGeometry, LEG_JOINTS,
    LegGeometry, SolverKind, SolverSettings,
};
use crate::jacobian::DEFAULT_INPUT_DELTA;
use crate::lookup::{InputAxis, LookupTable};
use crate::multipod::{BODY_TABLE_INPUTS, DEFAULT_BODY_ITERATIONS, MultipodSettings, default_body_axes};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    JacobianInverse,
    DampedLeastSquares,
    Lookup,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JointConfig {
    pub axis: [f64; 3],
    #[serde(default)]
    pub mount_angle: f64,
    pub amplitude: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LegConfig {
    pub coxa: f64,
    pub femur: f64,
    pub tibia: f64,
    pub decoration: Option<f64>,
    pub joints: Vec<JointConfig>,
}

impl Default for LegConfig {
    fn default() -> Self {
        let geometry = LegGeometry::default();
        LegConfig {
            coxa: geometry.coxa,
            femur: geometry.femur,
            tibia: geometry.tibia,
            decoration: geometry.decoration,
            joints: geometry.joints.iter()
                .map(|j| JointConfig {
                    axis: [j.axis.x, j.axis.y, j.axis.z],
                    mount_angle: j.mount_angle,
                    amplitude: j.amplitude,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    pub method: Method,
    pub damping: f64,
    /// Applies to both Jacobian methods, `null` lifts the limit.
    pub max_input_fix: Option<f64>,
    pub max_output_error: Option<f64>,
    pub input_delta: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            method: Method::JacobianInverse,
            damping: DEFAULT_DAMPING,
            max_input_fix: Some(DEFAULT_MAX_INPUT_FIX),
            max_output_error: None,
            input_delta: DEFAULT_INPUT_DELTA,
        }
    }
}

/// Grid and solver effort of a lookup table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupConfig {
    pub axes: Vec<InputAxis>,
    pub iterations: usize,
}

fn default_leg_lookup() -> LookupConfig {
    LookupConfig {
        axes: vec![InputAxis::new(-2.0, 2.0, 9); 3],
        iterations: DEFAULT_POPULATE_ITERATIONS,
    }
}

fn default_body_lookup() -> LookupConfig {
    LookupConfig {
        axes: default_body_axes(),
        iterations: DEFAULT_BODY_ITERATIONS,
    }
}

impl LookupConfig {
    /// Empty table over the configured grid.
    pub fn table(&self, output_size: usize) -> Result<LookupTable> {
        LookupTable::new(self.axes.clone(), output_size)
    }
}

/// Complete multipod set up. Every field is optional and defaults to the six legged
/// hexapod.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MultipodConfig {
    pub legs: usize,
    pub radius: f64,
    pub limited_joints: bool,
    pub leg: LegConfig,
    pub solver: SolverConfig,
    #[serde(default = "default_leg_lookup")]
    pub lookup: LookupConfig,
    #[serde(default = "default_body_lookup")]
    pub body_lookup: LookupConfig,
}

impl Default for MultipodConfig {
    fn default() -> Self {
        MultipodConfig {
            legs: 6,
            radius: 1.0,
            limited_joints: false,
            leg: LegConfig::default(),
            solver: SolverConfig::default(),
            lookup: default_leg_lookup(),
            body_lookup: default_body_lookup(),
        }
    }
}

impl MultipodConfig {
    /// Read the multipod configuration from YAML file. YAML file like this is supported:
    /// ```yaml
    /// legs: 6
    /// radius: 1.0
    /// limited_joints: true
    /// leg:
    ///   coxa: 0.25
    ///   femur: 1.0
    ///   tibia: 2.0
    ///   joints:
    ///     - { axis: [0.0, 0.0, 1.0], mount_angle: 0.0, amplitude: deg(45) }
    ///     - { axis: [0.0, 1.0, 0.0], mount_angle: deg(45), amplitude: deg(90) }
    ///     - { axis: [0.0, 1.0, 0.0], mount_angle: deg(-90), amplitude: deg(90) }
    /// solver:
    ///   method: damped_least_squares
    ///   damping: 0.8
    /// ```
    /// All fields are optional.
    ///
    /// YAML extension to parse the deg(angle) function is supported (serde_saphyr).
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Same as [`MultipodConfig::from_yaml_file`] for YAML text.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: MultipodConfig = serde_saphyr::from_str_with_options(
            contents,
            Options { angle_conversions: true, ..Default::default() },
        ).map_err(|e| KinematicsError::Config(format!("{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.legs == 0 {
            return Err(config_error("legs must be at least 1".to_string()));
        }
        positive("radius", self.radius)?;

        let leg = &self.leg;
        positive("leg.coxa", leg.coxa)?;
        positive("leg.femur", leg.femur)?;
        positive("leg.tibia", leg.tibia)?;
        if let Some(decoration) = leg.decoration {
            positive("leg.decoration", decoration)?;
        }
        if leg.joints.len() != LEG_JOINTS {
            return Err(config_error(format!(
                "leg.joints must list {} joints (got {})", LEG_JOINTS, leg.joints.len())));
        }
        for (i, joint) in leg.joints.iter().enumerate() {
            if joint.axis.iter().any(|c| !c.is_finite()) || Vector3::from(joint.axis).norm() == 0.0 {
                return Err(config_error(format!("leg.joints[{}].axis must be a finite non zero vector", i)));
            }
            finite(&format!("leg.joints[{}].mount_angle", i), joint.mount_angle)?;
            positive(&format!("leg.joints[{}].amplitude", i), joint.amplitude)?;
        }

        let solver = &self.solver;
        if !solver.damping.is_finite() || solver.damping < 0.0 {
            return Err(config_error(format!("solver.damping must be finite and not negative (got {})", solver.damping)));
        }
        if let Some(max_input_fix) = solver.max_input_fix {
            positive("solver.max_input_fix", max_input_fix)?;
        }
        positive("solver.input_delta", solver.input_delta)?;
        if let Some(max_output_error) = solver.max_output_error {
            positive("solver.max_output_error", max_output_error)?;
        }

        // Grid problems are reported by the table itself
        if self.lookup.axes.len() != 3 {
            return Err(config_error(format!("lookup.axes must list 3 axes (got {})", self.lookup.axes.len())));
        }
        self.lookup.table(LEG_JOINTS).map_err(|e| config_error(format!("lookup: {}", e)))?;
        if self.body_lookup.axes.len() != BODY_TABLE_INPUTS {
            return Err(config_error(format!(
                "body_lookup.axes must list {} axes (got {})", BODY_TABLE_INPUTS, self.body_lookup.axes.len())));
        }
        self.body_lookup.table(self.legs * LEG_JOINTS).map_err(|e| config_error(format!("body_lookup: {}", e)))?;
        Ok(())
    }

    pub fn leg_geometry(&self) -> LegGeometry {
        let joint = |j: &JointConfig| JointGeometry::new(Vector3::from(j.axis), j.mount_angle, j.amplitude);
        let joints = &self.leg.joints;
        LegGeometry {
            coxa: self.leg.coxa,
            femur: self.leg.femur,
            tibia: self.leg.tibia,
            decoration: self.leg.decoration,
            joints: [joint(&joints[0]), joint(&joints[1]), joint(&joints[2])],
        }
    }

    pub fn solver_settings(&self) -> SolverSettings {
        let kind = match self.solver.method {
            Method::JacobianInverse => SolverKind::JacobianInverse,
            Method::DampedLeastSquares => SolverKind::DampedLeastSquares { damping: self.solver.damping },
            Method::Lookup => SolverKind::Lookup,
        };
        SolverSettings {
            kind,
            input_delta: self.solver.input_delta,
            max_input_fix: self.solver.max_input_fix,
            max_output_error: self.solver.max_output_error,
        }
    }

    /// Settings to build a [`Multipod`](crate::multipod::Multipod) from.
    pub fn multipod_settings(&self) -> MultipodSettings {
        MultipodSettings {
            legs: self.legs,
            radius: self.radius,
            geometry: self.leg_geometry(),
            solver: self.solver_settings(),
            limited_joints: self.limited_joints,
        }
    }
}

fn config_error(message: String) -> KinematicsError {
    KinematicsError::Config(message)
}

fn finite(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(config_error(format!("{} must be finite (got {})", name, value)));
    }
    Ok(())
}

fn positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(config_error(format!("{} must be positive (got {})", name, value)));
    }
    Ok(())
}
