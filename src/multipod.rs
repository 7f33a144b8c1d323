//! Multipod: identical legs mounted radially around a body, driven together.

use std::sync::Arc;
use nalgebra::{DVector, Vector3};
use tracing::debug;
use crate::displacement::Displacement;
use crate::error::{KinematicsError, Result};
use crate::kinematic_tree::Renderer;
use crate::leg::{DEFAULT_DAMPING, LEG_JOINTS, Leg, LegGeometry, SolverKind, SolverSettings};
use crate::lookup::{InputAxis, LookupTable};
use crate::utils::TAU;

/// Inputs of a body table: x, y, z and yaw of the body target.
pub const BODY_TABLE_INPUTS: usize = 4;

/// Solver steps made for every grid point when populating a body table.
pub const DEFAULT_BODY_ITERATIONS: usize = 5;

/// How the multipod is assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipodSettings {
    pub legs: usize,
    /// Distance from the body center to each leg base.
    pub radius: f64,
    pub geometry: LegGeometry,
    pub solver: SolverSettings,
    pub limited_joints: bool,
}

impl Default for MultipodSettings {
    fn default() -> Self {
        MultipodSettings {
            legs: 6,
            radius: 1.0,
            geometry: LegGeometry::default(),
            solver: SolverSettings::default(),
            limited_joints: false,
        }
    }
}

impl MultipodSettings {
    /// Mounting displacement of leg `index` relative to the body. Legs are spread evenly,
    /// the first one half a sector off the X axis.
    pub fn leg_mount(&self, index: usize) -> Displacement {
        let n = self.legs as f64;
        let angle = TAU / (2.0 * n) + index as f64 * TAU / n;
        Displacement::from_unit_axis_angle(&Vector3::z_axis(), angle)
            .compose(&Displacement::from_translation(Vector3::new(self.radius, 0.0, 0.0)))
    }
}

/// Default body table grid: ±1.5 on x, y, z and ±τ/8 of yaw, 5 points each.
pub fn default_body_axes() -> Vec<InputAxis> {
    vec![
        InputAxis::new(-1.5, 1.5, 5),
        InputAxis::new(-1.5, 1.5, 5),
        InputAxis::new(-1.5, 1.5, 5),
        InputAxis::new(-TAU / 8.0, TAU / 8.0, 5),
    ]
}

#[derive(Debug, Clone)]
pub struct Multipod {
    body: Displacement,
    legs: Vec<Leg>,
}

impl Multipod {
    /// Builds a multipod whose legs solve with a Jacobian based method.
    pub fn new(settings: &MultipodSettings, body: Displacement) -> Result<Self> {
        Self::build(settings, body, |base| {
            Leg::new(&settings.geometry, base, &settings.solver, settings.limited_joints)
        })
    }

    /// Builds a multipod whose legs all read the same leg table.
    pub fn with_leg_table(settings: &MultipodSettings, body: Displacement, table: Arc<LookupTable>) -> Result<Self> {
        Self::build(settings, body, |base| {
            Leg::with_lookup_table(&settings.geometry, base, table.clone(), settings.limited_joints)
        })
    }

    fn build<F>(settings: &MultipodSettings, body: Displacement, mut make_leg: F) -> Result<Self>
    where
        F: FnMut(Displacement) -> Result<Leg>,
    {
        if settings.legs == 0 {
            return Err(KinematicsError::Config("a multipod needs at least one leg".to_string()));
        }
        let legs = (0..settings.legs)
            .map(|i| make_leg(body.compose(&settings.leg_mount(i))))
            .collect::<Result<Vec<_>>>()?;
        debug!(legs = legs.len(), radius = settings.radius, "multipod assembled");
        Ok(Multipod { body, legs })
    }

    /// Moves every leg toward the pose that displaces the body by `target`.
    pub fn direct_control(&mut self, target: &Displacement) {
        for leg in &mut self.legs {
            leg.displacement_inverse_kinematics(target);
        }
    }

    /// Direct control with the target built as a translation followed by a yaw rotation.
    pub fn direct_control_xyz(&mut self, x: f64, y: f64, z: f64, yaw: f64) {
        self.direct_control(&body_target(x, y, z, yaw));
    }

    /// Fills a body table mapping `(x, y, z, yaw)` to the joint angles of all the legs.
    /// Each grid point starts a fresh damped least squares multipod at rest and runs
    /// `iterations` direct control steps.
    ///
    /// # Returns
    ///
    /// [`KinematicsError::ShapeMismatch`] unless the table has 4 inputs and 3 outputs per leg.
    pub fn populate_body_table(settings: &MultipodSettings, table: &mut LookupTable, iterations: usize) -> Result<()> {
        check_body_table(settings.legs, table)?;
        let mut settings = settings.clone();
        if !matches!(settings.solver.kind, SolverKind::DampedLeastSquares { .. }) {
            settings.solver = SolverSettings::damped_least_squares(DEFAULT_DAMPING);
        }
        let template = Multipod::new(&settings, Displacement::identity())?;
        debug!(shape = ?table.shape(), iterations, "populating body table");
        let solve = |input: &[f64]| {
            let mut multipod = template.clone();
            for _ in 0..iterations {
                multipod.direct_control_xyz(input[0], input[1], input[2], input[3]);
            }
            multipod.joint_angles().as_slice().to_vec()
        };

        #[cfg(feature = "parallel")]
        return table.par_populate(solve);
        #[cfg(not(feature = "parallel"))]
        return table.populate(solve);
    }

    /// Sets all the joint angles from a body table populated with
    /// [`Multipod::populate_body_table`].
    pub fn apply_body_table(&mut self, table: &LookupTable, x: f64, y: f64, z: f64, yaw: f64) -> Result<()> {
        check_body_table(self.legs.len(), table)?;
        let angles = table.get_lerp(&[x, y, z, yaw]);
        for (leg, leg_angles) in self.legs.iter_mut().zip(angles.chunks_exact(LEG_JOINTS)) {
            leg.set_joint_angles(leg_angles)?;
        }
        Ok(())
    }

    /// Joint angles of all the legs, leg after leg.
    pub fn joint_angles(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.legs.len() * LEG_JOINTS,
            self.legs.iter().flat_map(|leg| leg.joint_angles().iter().copied()),
        )
    }

    pub fn endpoints(&self) -> Vec<Vector3<f64>> {
        self.legs.iter().map(Leg::current_endpoint).collect()
    }

    pub fn reset(&mut self) {
        self.legs.iter_mut().for_each(Leg::reset);
    }

    pub fn body(&self) -> &Displacement {
        &self.body
    }

    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    pub fn leg(&self, index: usize) -> Option<&Leg> {
        self.legs.get(index)
    }

    pub fn legs_count(&self) -> usize {
        self.legs.len()
    }

    pub fn draw(&self, renderer: &mut impl Renderer) {
        for leg in &self.legs {
            leg.draw(renderer);
        }
    }
}

/// `translation(x, y, z) ∘ rotation(Z, yaw)`
pub fn body_target(x: f64, y: f64, z: f64, yaw: f64) -> Displacement {
    Displacement::from_translation(Vector3::new(x, y, z))
        .compose(&Displacement::from_unit_axis_angle(&Vector3::z_axis(), yaw))
}

fn check_body_table(legs: usize, table: &LookupTable) -> Result<()> {
    let outputs = legs * LEG_JOINTS;
    if table.input_size() != BODY_TABLE_INPUTS || table.output_size() != outputs {
        return Err(KinematicsError::ShapeMismatch {
            expected: vec![BODY_TABLE_INPUTS, outputs],
            found: vec![table.input_size(), table.output_size()],
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematic_tree::Segment;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_leg_mounts() {
        let settings = MultipodSettings::default();
        let hexapod = Multipod::new(&settings, Displacement::identity()).unwrap();
        assert_eq!(hexapod.legs_count(), 6);

        // First leg half a sector (30°) off the X axis, at radius 1
        let first = settings.leg_mount(0).translation();
        assert_abs_diff_eq!(first, Vector3::new(0.75_f64.sqrt(), 0.5, 0.0), epsilon = 1e-12);
        for i in 0..6 {
            assert_abs_diff_eq!(settings.leg_mount(i).translation().norm(), 1.0, epsilon = 1e-12);
        }
        // Opposite legs are mirrored through the center
        let a = settings.leg_mount(1).translation();
        let b = settings.leg_mount(4).translation();
        assert_abs_diff_eq!(a + b, Vector3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_legs_follow_body() {
        let body = Displacement::from_translation(Vector3::new(0.0, 0.0, -1.0));
        let hexapod = Multipod::new(&MultipodSettings::default(), body).unwrap();
        let reference = Multipod::new(&MultipodSettings::default(), Displacement::identity()).unwrap();
        for (moved, at_origin) in hexapod.endpoints().iter().zip(reference.endpoints()) {
            assert_abs_diff_eq!(*moved, at_origin + Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_direct_control_translation() {
        let mut hexapod = Multipod::new(&MultipodSettings::default(), Displacement::identity()).unwrap();
        let defaults: Vec<Vector3<f64>> = hexapod.legs().iter().map(Leg::default_endpoint).collect();
        for _ in 0..40 {
            hexapod.direct_control_xyz(0.2, -0.1, 0.3, 0.0);
        }
        for (endpoint, default) in hexapod.endpoints().iter().zip(defaults) {
            assert_abs_diff_eq!(*endpoint, default + Vector3::new(0.2, -0.1, 0.3), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_direct_control_yaw_rotates_endpoints() {
        let mut hexapod = Multipod::new(&MultipodSettings::default(), Displacement::identity()).unwrap();
        let yaw = 0.1;
        for _ in 0..40 {
            hexapod.direct_control_xyz(0.0, 0.0, 0.0, yaw);
        }
        let rotation = Displacement::from_unit_axis_angle(&Vector3::z_axis(), yaw);
        for leg in hexapod.legs() {
            let expected = rotation.transform_point(&leg.default_endpoint());
            assert_abs_diff_eq!(leg.current_endpoint(), expected, epsilon = 1e-6);
            assert_abs_diff_eq!(leg.target_endpoint(), expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_no_legs_rejected() {
        let settings = MultipodSettings { legs: 0, ..Default::default() };
        assert!(matches!(Multipod::new(&settings, Displacement::identity()), Err(KinematicsError::Config(_))));
    }

    #[test]
    fn test_body_table() {
        let settings = MultipodSettings { legs: 3, ..Default::default() };
        let axes = vec![
            InputAxis::new(-0.2, 0.2, 2),
            InputAxis::new(-0.2, 0.2, 2),
            InputAxis::new(-0.2, 0.2, 2),
            InputAxis::new(-0.1, 0.1, 2),
        ];
        let mut table = LookupTable::new(axes, 9).unwrap();
        Multipod::populate_body_table(&settings, &mut table, 30).unwrap();

        // A grid corner reproduces what direct control converges to
        let mut tripod = Multipod::new(&settings, Displacement::identity()).unwrap();
        tripod.apply_body_table(&table, 0.2, -0.2, 0.2, 0.1).unwrap();
        let mut solved = Multipod::new(&MultipodSettings {
            solver: SolverSettings::damped_least_squares(DEFAULT_DAMPING),
            ..settings.clone()
        }, Displacement::identity()).unwrap();
        for _ in 0..30 {
            solved.direct_control_xyz(0.2, -0.2, 0.2, 0.1);
        }
        assert_abs_diff_eq!(tripod.joint_angles(), solved.joint_angles(), epsilon = 1e-6);

        let wrong = LookupTable::new(default_body_axes(), 18).unwrap();
        assert!(tripod.apply_body_table(&wrong, 0.0, 0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_draw_all_legs() {
        let hexapod = Multipod::new(&MultipodSettings::default(), Displacement::identity()).unwrap();
        let mut segments: Vec<Segment> = Vec::new();
        hexapod.draw(&mut segments);
        assert_eq!(segments.len(), 6 * 4);
    }
}
