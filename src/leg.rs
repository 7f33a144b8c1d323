//! A three joint multipod leg: coxa, femur and tibia driven by revolute joints.
//!
//! The leg owns its kinematic tree (shared through [`LegChain`]) and one inverse kinematics
//! strategy ([`LegSolver`]): either a Jacobian based solver stepping once per call, or a
//! precomputed [`LookupTable`] mapping endpoint offsets to joint angles.

use std::sync::Arc;
use nalgebra::{DVector, Matrix3, Vector3};
use tracing::{debug, warn};
use crate::displacement::Displacement;
use crate::error::{KinematicsError, Result};
use crate::jacobian::{DEFAULT_INPUT_DELTA, JacobianSolver, SolverMethod, VectorFunction};
use crate::kinematic_tree::{KinematicTree, NodeId, Parameters, Part, Renderer, ROOT_KEY};
use crate::lookup::LookupTable;
use crate::utils::{TAU, is_valid, vector3_to_dvector};

/// Number of joints (and so of solver inputs) of a leg.
pub const LEG_JOINTS: usize = 3;

/// Joint keys in the order of the joint angle vector.
pub const JOINT_KEYS: [&str; LEG_JOINTS] = ["root_coxa_joint", "coxa_femur_joint", "femur_tibia_joint"];

/// The link whose far end is the leg endpoint.
pub const ENDPOINT_KEY: &str = "tibia";

pub const DEFAULT_MAX_INPUT_FIX: f64 = 0.5;
pub const DEFAULT_DAMPING: f64 = 0.8;

/// Solver steps made for every grid point when populating a leg table.
pub const DEFAULT_POPULATE_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointGeometry {
    pub axis: Vector3<f64>,
    /// Fixed offset added to the joint angle.
    pub mount_angle: f64,
    /// Joint angles are kept within `[-amplitude, amplitude]` when limiting is on.
    pub amplitude: f64,
}

impl JointGeometry {
    pub fn new(axis: Vector3<f64>, mount_angle: f64, amplitude: f64) -> Self {
        JointGeometry { axis, mount_angle, amplitude }
    }
}

/// Link lengths and joint set up of a leg.
#[derive(Debug, Clone, PartialEq)]
pub struct LegGeometry {
    pub coxa: f64,
    pub femur: f64,
    pub tibia: f64,
    /// Short drawable link hanging off the femur, not part of the chain to the endpoint.
    pub decoration: Option<f64>,
    /// In [`JOINT_KEYS`] order.
    pub joints: [JointGeometry; LEG_JOINTS],
}

impl Default for LegGeometry {
    fn default() -> Self {
        LegGeometry {
            coxa: 0.25,
            femur: 1.0,
            tibia: 2.0,
            decoration: Some(0.1),
            joints: [
                JointGeometry::new(Vector3::z(), 0.0, TAU / 8.0),
                JointGeometry::new(Vector3::y(), TAU / 8.0, TAU / 4.0),
                JointGeometry::new(Vector3::y(), -TAU / 4.0, TAU / 4.0),
            ],
        }
    }
}

impl LegGeometry {
    /// Builds the leg tree anchored at `base`:
    /// `root → root_coxa_joint → coxa → coxa_femur_joint → femur → femur_tibia_joint → tibia`,
    /// with the decoration (if any) attached to the femur.
    pub fn build_tree(&self, base: Displacement) -> Result<KinematicTree> {
        let [coxa_joint, femur_joint, tibia_joint] = &self.joints;
        let mut tree = KinematicTree::new(base);
        tree.add_node(JOINT_KEYS[0], Part::revolute_joint(coxa_joint.axis, coxa_joint.mount_angle)?, ROOT_KEY)?;
        tree.add_node("coxa", Part::rigid_link(self.coxa), JOINT_KEYS[0])?;
        tree.add_node(JOINT_KEYS[1], Part::revolute_joint(femur_joint.axis, femur_joint.mount_angle)?, "coxa")?;
        tree.add_node("femur", Part::rigid_link(self.femur), JOINT_KEYS[1])?;
        tree.add_node(JOINT_KEYS[2], Part::revolute_joint(tibia_joint.axis, tibia_joint.mount_angle)?, "femur")?;
        if let Some(decoration) = self.decoration {
            tree.add_node("decoration", Part::rigid_link(decoration), "femur")?;
        }
        tree.add_node(ENDPOINT_KEY, Part::rigid_link(self.tibia), JOINT_KEYS[2])?;
        Ok(tree)
    }

    fn amplitudes(&self) -> [f64; LEG_JOINTS] {
        self.joints.map(|j| j.amplitude)
    }
}

/// Forward kinematics of the leg as a vector function: joint angles to endpoint position.
#[derive(Debug, Clone)]
pub struct LegChain {
    tree: Arc<KinematicTree>,
    joints: [NodeId; LEG_JOINTS],
    tip: NodeId,
}

impl LegChain {
    pub fn new(geometry: &LegGeometry, base: Displacement) -> Result<Self> {
        let tree = geometry.build_tree(base)?;
        let node = |key: &str| tree.node_id(key).ok_or_else(|| KinematicsError::UnknownNode(key.to_string()));
        let joints = [node(JOINT_KEYS[0])?, node(JOINT_KEYS[1])?, node(JOINT_KEYS[2])?];
        let tip = node(ENDPOINT_KEY)?;
        Ok(LegChain { tree: Arc::new(tree), joints, tip })
    }

    pub fn tree(&self) -> &KinematicTree {
        &self.tree
    }

    fn parameters(&self, angles: &[f64]) -> Parameters {
        let mut parameters = self.tree.zero_parameters();
        for (id, angle) in self.joints.iter().zip(angles) {
            parameters.set(*id, *angle);
        }
        parameters
    }

    /// Endpoint position for the given joint angles.
    pub fn endpoint(&self, angles: &[f64]) -> Vector3<f64> {
        let mut displacements = Vec::with_capacity(self.tree.len());
        self.tree.evaluate_into(&self.parameters(angles), &mut displacements);
        displacements[self.tip.index()].translation()
    }

    pub fn draw(&self, angles: &[f64], renderer: &mut impl Renderer) {
        self.tree.draw(&self.parameters(angles), renderer);
    }
}

impl VectorFunction for LegChain {
    fn evaluate(&self, input: &DVector<f64>) -> DVector<f64> {
        vector3_to_dvector(&self.endpoint(input.as_slice()))
    }
}

/// Which inverse kinematics strategy a leg uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolverKind {
    JacobianInverse,
    DampedLeastSquares { damping: f64 },
    /// Joint angles read from a leg lookup table, see [`Leg::with_lookup_table`].
    Lookup,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    pub kind: SolverKind,
    pub input_delta: f64,
    /// Largest joint angle change per step, for both Jacobian methods.
    pub max_input_fix: Option<f64>,
    pub max_output_error: Option<f64>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            kind: SolverKind::JacobianInverse,
            input_delta: DEFAULT_INPUT_DELTA,
            max_input_fix: Some(DEFAULT_MAX_INPUT_FIX),
            max_output_error: None,
        }
    }
}

impl SolverSettings {
    /// Damped least squares without a step limit.
    pub fn damped_least_squares(damping: f64) -> Self {
        SolverSettings {
            kind: SolverKind::DampedLeastSquares { damping },
            max_input_fix: None,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum LegSolver {
    Jacobian(JacobianSolver<LegChain>),
    /// Table from the endpoint offset in the leg frame (3 inputs) to joint angles (3 outputs).
    Lookup(Arc<LookupTable>),
}

#[derive(Debug, Clone)]
pub struct Leg {
    chain: LegChain,
    solver: LegSolver,
    amplitudes: [f64; LEG_JOINTS],
    limited_joints: bool,
    /// Maps world offsets into the leg frame.
    inverse_base_rotation: Matrix3<f64>,
    joint_angles: DVector<f64>,
    endpoint: Vector3<f64>,
    default_endpoint: Vector3<f64>,
    target_endpoint: Vector3<f64>,
}

impl Leg {
    /// Creates a leg anchored at `base`, at rest (all joint angles zero), solving with a
    /// Jacobian based method.
    ///
    /// # Returns
    ///
    /// [`KinematicsError::Config`] if the settings ask for a lookup table, which must be
    /// supplied through [`Leg::with_lookup_table`].
    pub fn new(
        geometry: &LegGeometry,
        base: Displacement,
        settings: &SolverSettings,
        limited_joints: bool,
    ) -> Result<Self> {
        let chain = LegChain::new(geometry, base)?;
        let method = match settings.kind {
            SolverKind::JacobianInverse => SolverMethod::JacobianInverse,
            SolverKind::DampedLeastSquares { damping } => SolverMethod::DampedLeastSquares { damping },
            SolverKind::Lookup => {
                return Err(KinematicsError::Config(
                    "lookup legs need a table, use Leg::with_lookup_table".to_string()));
            }
        };
        let solver = JacobianSolver::new(chain.clone(), method)
            .with_input_delta(settings.input_delta)
            .with_max_input_fix(settings.max_input_fix)
            .with_max_output_error(settings.max_output_error);
        Ok(Self::assemble(chain, LegSolver::Jacobian(solver), geometry, base, limited_joints))
    }

    /// Creates a leg that reads its joint angles from a table populated with
    /// [`Leg::populate_lookup_table`].
    ///
    /// # Returns
    ///
    /// [`KinematicsError::ShapeMismatch`] unless the table has 3 inputs and 3 outputs.
    pub fn with_lookup_table(
        geometry: &LegGeometry,
        base: Displacement,
        table: Arc<LookupTable>,
        limited_joints: bool,
    ) -> Result<Self> {
        check_leg_table(&table)?;
        let chain = LegChain::new(geometry, base)?;
        Ok(Self::assemble(chain, LegSolver::Lookup(table), geometry, base, limited_joints))
    }

    fn assemble(
        chain: LegChain,
        solver: LegSolver,
        geometry: &LegGeometry,
        base: Displacement,
        limited_joints: bool,
    ) -> Self {
        let joint_angles = DVector::zeros(LEG_JOINTS);
        let endpoint = chain.endpoint(joint_angles.as_slice());
        Leg {
            chain,
            solver,
            amplitudes: geometry.amplitudes(),
            limited_joints,
            inverse_base_rotation: base.rotation().transpose(),
            joint_angles,
            endpoint,
            default_endpoint: endpoint,
            target_endpoint: endpoint,
        }
    }

    /// Forward kinematics: endpoint position for the given joint angles.
    pub fn endpoint(&self, joint_angles: &DVector<f64>) -> Vector3<f64> {
        self.chain.endpoint(joint_angles.as_slice())
    }

    /// Updates the joint angles to move the endpoint toward the target position. Jacobian
    /// legs make one solver step, lookup legs interpolate the table once.
    pub fn endpoint_inverse_kinematics(&mut self, target_endpoint: &Vector3<f64>) {
        self.target_endpoint = *target_endpoint;
        let angles = match &self.solver {
            LegSolver::Jacobian(solver) => solver.converge(
                &self.joint_angles,
                &vector3_to_dvector(target_endpoint),
                Some(&vector3_to_dvector(&self.endpoint)),
            ),
            LegSolver::Lookup(table) => {
                let offset = self.inverse_base_rotation * (target_endpoint - self.default_endpoint);
                DVector::from_vec(table.get_lerp(offset.as_slice()))
            }
        };
        if !is_valid(&angles) {
            warn!(endpoint = ?target_endpoint, "non finite joint angles, keeping the previous pose");
            return;
        }
        self.apply_joint_angles(angles);
    }

    /// Updates the joint angles so the endpoint follows the default endpoint moved by the
    /// target displacement.
    pub fn displacement_inverse_kinematics(&mut self, target: &Displacement) {
        let moved = target.compose(&Displacement::from_translation(self.default_endpoint));
        self.endpoint_inverse_kinematics(&moved.translation());
    }

    /// Sets the joint angles directly (subject to the joint limits) and makes the resulting
    /// endpoint the new target.
    ///
    /// # Returns
    ///
    /// [`KinematicsError::ShapeMismatch`] unless exactly 3 angles are given, leaving the
    /// leg unchanged.
    pub fn set_joint_angles(&mut self, joint_angles: &[f64]) -> Result<()> {
        if joint_angles.len() != LEG_JOINTS {
            return Err(KinematicsError::ShapeMismatch {
                expected: vec![LEG_JOINTS],
                found: vec![joint_angles.len()],
            });
        }
        self.apply_joint_angles(DVector::from_column_slice(joint_angles));
        self.target_endpoint = self.endpoint;
        Ok(())
    }

    /// Back to the rest pose.
    pub fn reset(&mut self) {
        self.joint_angles = DVector::zeros(LEG_JOINTS);
        self.endpoint = self.default_endpoint;
        self.target_endpoint = self.default_endpoint;
    }

    fn apply_joint_angles(&mut self, mut angles: DVector<f64>) {
        if self.limited_joints {
            for (i, angle) in angles.iter_mut().enumerate() {
                let limit = self.amplitudes[i];
                let clamped = angle.clamp(-limit, limit);
                if clamped != *angle {
                    warn!(joint = JOINT_KEYS[i], angle = *angle, limit, "joint angle clamped");
                    *angle = clamped;
                }
            }
        }
        self.endpoint = self.chain.endpoint(angles.as_slice());
        self.joint_angles = angles;
    }

    pub fn joint_angles(&self) -> &DVector<f64> {
        &self.joint_angles
    }

    /// Endpoint realized by the current joint angles.
    pub fn current_endpoint(&self) -> Vector3<f64> {
        self.endpoint
    }

    /// Endpoint at rest.
    pub fn default_endpoint(&self) -> Vector3<f64> {
        self.default_endpoint
    }

    pub fn target_endpoint(&self) -> Vector3<f64> {
        self.target_endpoint
    }

    pub fn solver(&self) -> &LegSolver {
        &self.solver
    }

    pub fn chain(&self) -> &LegChain {
        &self.chain
    }

    pub fn limited_joints(&self) -> bool {
        self.limited_joints
    }

    /// Hands the segments of the current pose to the renderer.
    pub fn draw(&self, renderer: &mut impl Renderer) {
        self.chain.draw(self.joint_angles.as_slice(), renderer);
    }

    /// Fills a leg table with joint angles reaching every offset of its grid. For each
    /// grid point a damped least squares leg at rest, anchored at the identity, makes
    /// `iterations` steps toward `default endpoint + offset`.
    ///
    /// # Returns
    ///
    /// [`KinematicsError::ShapeMismatch`] unless the table has 3 inputs and 3 outputs.
    pub fn populate_lookup_table(
        geometry: &LegGeometry,
        table: &mut LookupTable,
        iterations: usize,
    ) -> Result<()> {
        check_leg_table(table)?;
        let template = Leg::new(
            geometry,
            Displacement::identity(),
            &SolverSettings::damped_least_squares(DEFAULT_DAMPING),
            false,
        )?;
        debug!(shape = ?table.shape(), iterations, "populating leg table");
        let solve = |offset: &[f64]| {
            let mut leg = template.clone();
            let target = leg.default_endpoint + Vector3::from_column_slice(offset);
            for _ in 0..iterations {
                leg.endpoint_inverse_kinematics(&target);
            }
            leg.joint_angles.as_slice().to_vec()
        };

        #[cfg(feature = "parallel")]
        return table.par_populate(solve);
        #[cfg(not(feature = "parallel"))]
        return table.populate(solve);
    }
}

fn check_leg_table(table: &LookupTable) -> Result<()> {
    if table.input_size() != 3 || table.output_size() != LEG_JOINTS {
        return Err(KinematicsError::ShapeMismatch {
            expected: vec![3, LEG_JOINTS],
            found: vec![table.input_size(), table.output_size()],
        });
    }
    Ok(())
}
