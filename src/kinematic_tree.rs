//! Kinematic tree. Can be used as a kinematic chain.
//!
//! Each node has a unique key, a [`Part`], a parent and a list of children. Nodes are stored
//! in a flat vector and addressed by [`NodeId`]; keys are resolved once through a map.
//! The tree is built once and then evaluated many times with different joint angles:
//!
//! ```
//! use nalgebra::Vector3;
//! use rs_multipod_kinematics::displacement::Displacement;
//! use rs_multipod_kinematics::kinematic_tree::{KinematicTree, Part, ROOT_KEY};
//!
//! let mut tree = KinematicTree::new(Displacement::identity());
//! tree.add_node("shoulder", Part::revolute_joint(Vector3::z(), 0.0).unwrap(), ROOT_KEY).unwrap();
//! tree.add_node("arm", Part::rigid_link(1.0), "shoulder").unwrap();
//!
//! let parameters = tree.prepare_parameters([("shoulder", std::f64::consts::FRAC_PI_2)]).unwrap();
//! let displacements = tree.evaluate(&parameters);
//! let tip = displacements.get("arm").unwrap().translation();
//! assert!((tip - Vector3::new(0.0, 1.0, 0.0)).norm() < 1E-12);
//! ```

use std::collections::{HashMap, VecDeque};
use nalgebra::{Unit, Vector3};
use tracing::debug;
use crate::displacement::Displacement;
use crate::error::{KinematicsError, Result};

/// Key of the root node every tree starts with.
pub const ROOT_KEY: &str = "root";

/// Index of the node inside its tree. Only meaningful for the tree that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The part held by a tree node. Every part produces a local displacement that is
/// composed onto the global displacement of its parent.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Anchors the tree at an externally supplied base displacement. Only the root
    /// node holds this part.
    Root(Displacement),

    /// Fixed translation of `length` along the local X axis.
    RigidLink { length: f64 },

    /// Rotation around `axis` by the runtime angle plus the fixed `mount_angle`.
    RevoluteJoint {
        axis: Unit<Vector3<f64>>,
        mount_angle: f64,
    },
}

impl Part {
    pub fn rigid_link(length: f64) -> Self {
        Part::RigidLink { length }
    }

    /// Revolute joint around the given (not necessarily normalized) axis.
    pub fn revolute_joint(axis: Vector3<f64>, mount_angle: f64) -> Result<Self> {
        let axis = Unit::try_new(axis, 1E-12).ok_or(KinematicsError::ZeroAxis)?;
        Ok(Part::RevoluteJoint { axis, mount_angle })
    }

    /// Displacement this part produces for the given joint angle. The angle is ignored
    /// by parts that are not joints.
    #[inline]
    pub fn local_displacement(&self, angle: f64) -> Displacement {
        match self {
            Part::Root(base) => *base,
            Part::RigidLink { length } => {
                Displacement::from_translation(Vector3::new(*length, 0.0, 0.0))
            }
            Part::RevoluteJoint { axis, mount_angle } => {
                Displacement::from_unit_axis_angle(axis, angle + mount_angle)
            }
        }
    }

    pub fn is_joint(&self) -> bool {
        matches!(self, Part::RevoluteJoint { .. })
    }

    /// Only links have a visible body; joints and the root are points.
    pub fn is_drawable(&self) -> bool {
        matches!(self, Part::RigidLink { .. })
    }
}

#[derive(Debug, Clone)]
struct Node {
    key: String,
    part: Part,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Per evaluation joint angles, one slot per node. Slots of non-joint nodes are unused.
/// Obtain with [`KinematicTree::prepare_parameters`] or [`KinematicTree::zero_parameters`],
/// then update in place with [`Parameters::set`] between evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    angles: Vec<f64>,
}

impl Parameters {
    #[inline]
    pub fn set(&mut self, id: NodeId, angle: f64) {
        self.angles[id.0] = angle;
    }

    #[inline]
    pub fn angle(&self, id: NodeId) -> f64 {
        self.angles[id.0]
    }
}

/// Global displacement of every node, as produced by [`KinematicTree::evaluate`].
pub struct Displacements<'a> {
    tree: &'a KinematicTree,
    values: Vec<Displacement>,
}

impl<'a> Displacements<'a> {
    pub fn get(&self, key: &str) -> Option<&Displacement> {
        self.tree.node_id(key).map(|id| &self.values[id.0])
    }

    pub fn by_id(&self, id: NodeId) -> &Displacement {
        &self.values[id.0]
    }

    /// All nodes with their global displacement, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Displacement)> {
        self.tree.nodes.iter().map(|n| n.key.as_str()).zip(self.values.iter())
    }

    pub fn into_vec(self) -> Vec<Displacement> {
        self.values
    }
}

/// Receives the two endpoint positions of every drawable part. Implemented by whatever
/// renders or records the mechanism; the tree never owns drawing state.
pub trait Renderer {
    fn draw_segment(&mut self, key: &str, from: &Vector3<f64>, to: &Vector3<f64>);
}

/// Endpoints of one drawable part.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub key: String,
    pub from: Vector3<f64>,
    pub to: Vector3<f64>,
}

/// Recording renderer, useful for telemetry and tests.
impl Renderer for Vec<Segment> {
    fn draw_segment(&mut self, key: &str, from: &Vector3<f64>, to: &Vector3<f64>) {
        self.push(Segment { key: key.to_string(), from: *from, to: *to });
    }
}

#[derive(Debug, Clone)]
pub struct KinematicTree {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
    /// Breadth-first order from the root, refreshed on every insertion so that
    /// evaluation is a single pass.
    order: Vec<NodeId>,
}

impl KinematicTree {
    /// Creates the tree with only the root node, anchored at `base`.
    pub fn new(base: Displacement) -> Self {
        let root = Node {
            key: ROOT_KEY.to_string(),
            part: Part::Root(base),
            parent: None,
            children: Vec::new(),
        };
        KinematicTree {
            nodes: vec![root],
            index: HashMap::from([(ROOT_KEY.to_string(), NodeId(0))]),
            order: vec![NodeId(0)],
        }
    }

    /// Adds a node under an existing parent.
    ///
    /// # Returns
    ///
    /// Id of the new node, [`KinematicsError::DuplicateKey`] if the key is taken,
    /// [`KinematicsError::UnknownParent`] if the parent has not been inserted yet, or
    /// [`KinematicsError::InvalidPart`] for a second root.
    pub fn add_node(&mut self, key: &str, part: Part, parent: &str) -> Result<NodeId> {
        if self.index.contains_key(key) {
            return Err(KinematicsError::DuplicateKey(key.to_string()));
        }
        let parent_id = *self.index.get(parent)
            .ok_or_else(|| KinematicsError::UnknownParent(parent.to_string()))?;
        if let Part::Root(_) = part {
            return Err(KinematicsError::InvalidPart(format!(
                "\"{}\": only the tree root may hold the root part", key)));
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            key: key.to_string(),
            part,
            parent: Some(parent_id),
            children: Vec::new(),
        });
        self.nodes[parent_id.0].children.push(id);
        self.index.insert(key.to_string(), id);
        self.order = self.breadth_first_order();
        debug!(key, parent, nodes = self.nodes.len(), "added tree node");
        Ok(id)
    }

    /// Adds a node directly under the root.
    pub fn add_child(&mut self, key: &str, part: Part) -> Result<NodeId> {
        self.add_node(key, part, ROOT_KEY)
    }

    fn breadth_first_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut todo = VecDeque::from([NodeId(0)]);
        while let Some(id) = todo.pop_front() {
            order.push(id);
            todo.extend(self.nodes[id.0].children.iter().copied());
        }
        order
    }

    /// Builds the parameters from `(joint key, angle)` pairs. Every joint of the tree must
    /// receive an angle, and every key must name a joint.
    pub fn prepare_parameters<'k, I>(&self, angles: I) -> Result<Parameters>
    where
        I: IntoIterator<Item = (&'k str, f64)>,
    {
        let mut values: Vec<Option<f64>> = vec![None; self.nodes.len()];
        for (key, angle) in angles {
            match self.index.get(key) {
                Some(id) if self.nodes[id.0].part.is_joint() => values[id.0] = Some(angle),
                _ => return Err(KinematicsError::UnknownNode(key.to_string())),
            }
        }

        let mut parameters = Parameters { angles: vec![0.0; self.nodes.len()] };
        for (i, (node, value)) in self.nodes.iter().zip(values).enumerate() {
            if !node.part.is_joint() {
                continue;
            }
            match value {
                Some(angle) => parameters.angles[i] = angle,
                None => return Err(KinematicsError::MissingParameter(node.key.clone())),
            }
        }
        Ok(parameters)
    }

    /// Parameters with every joint at zero.
    pub fn zero_parameters(&self) -> Parameters {
        Parameters { angles: vec![0.0; self.nodes.len()] }
    }

    /// Walks the tree and evaluates the global displacement at each node using forward
    /// kinematics.
    pub fn evaluate(&self, parameters: &Parameters) -> Displacements<'_> {
        let mut values = Vec::with_capacity(self.nodes.len());
        self.evaluate_into(parameters, &mut values);
        Displacements { tree: self, values }
    }

    /// Same as [`KinematicTree::evaluate`] but writes into a caller owned buffer (indexed
    /// by [`NodeId::index`]), so repeated evaluation does not allocate.
    pub fn evaluate_into(&self, parameters: &Parameters, out: &mut Vec<Displacement>) {
        out.clear();
        out.resize(self.nodes.len(), Displacement::identity());
        for &id in &self.order {
            let node = &self.nodes[id.0];
            let local = node.part.local_displacement(parameters.angles[id.0]);
            out[id.0] = match node.parent {
                // Parent precedes the child in breadth-first order
                Some(parent) => out[parent.0].compose(&local),
                None => local,
            };
        }
    }

    /// Evaluates the tree and passes the endpoints of every drawable part to the renderer.
    pub fn draw(&self, parameters: &Parameters, renderer: &mut impl Renderer) {
        let displacements = self.evaluate(parameters);
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.part.is_drawable() {
                continue;
            }
            if let Some(parent) = node.parent {
                renderer.draw_segment(
                    &node.key,
                    &displacements.values[parent.0].translation(),
                    &displacements.values[i].translation(),
                );
            }
        }
    }

    /// Endpoints of all drawable parts.
    pub fn segments(&self, parameters: &Parameters) -> Vec<Segment> {
        let mut segments = Vec::new();
        self.draw(parameters, &mut segments);
        segments
    }

    pub fn node_id(&self, key: &str) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn key(&self, id: NodeId) -> &str {
        &self.nodes[id.0].key
    }

    pub fn part(&self, id: NodeId) -> &Part {
        &self.nodes[id.0].part
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Keys of all joints, in insertion order.
    pub fn joint_keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter(|n| n.part.is_joint()).map(|n| n.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always has its root.
    pub fn is_empty(&self) -> bool {
        false
    }
}
