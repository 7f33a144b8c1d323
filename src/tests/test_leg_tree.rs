#[cfg(test)]
mod tests {
    use nalgebra::{DVector, Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
    use rand::Rng;
    use crate::displacement::Displacement;
    use crate::jacobian::{JacobianSolver, VectorFunction, compute_jacobian};
    use crate::kinematic_tree::{KinematicTree, NodeId, Part, ROOT_KEY};
    use crate::leg::{JOINT_KEYS, LegChain, LegGeometry};
    use crate::tests::test_utils::{assert_points_close, random_pose, seeded_rng};
    use crate::utils::TAU;

    /// The three joint chain built node by node, without the leg helpers.
    fn three_joint_tree(base: Displacement) -> KinematicTree {
        let mut tree = KinematicTree::new(base);
        tree.add_node("j1", Part::revolute_joint(Vector3::z(), 0.0).unwrap(), ROOT_KEY).unwrap();
        tree.add_node("l1", Part::rigid_link(0.25), "j1").unwrap();
        tree.add_node("j2", Part::revolute_joint(Vector3::y(), TAU / 8.0).unwrap(), "l1").unwrap();
        tree.add_node("l2", Part::rigid_link(1.0), "j2").unwrap();
        tree.add_node("j3", Part::revolute_joint(Vector3::y(), -TAU / 4.0).unwrap(), "l2").unwrap();
        tree.add_node("l3", Part::rigid_link(2.0), "j3").unwrap();
        tree
    }

    /// Same chain as a product of nalgebra isometries.
    fn isometry_chain(base: &Isometry3<f64>, angles: [f64; 3]) -> Isometry3<f64> {
        let rotation = |axis: Vector3<f64>, angle: f64| {
            Isometry3::from_parts(Translation3::identity(), UnitQuaternion::from_scaled_axis(axis * angle))
        };
        let link = |length: f64| Isometry3::translation(length, 0.0, 0.0);
        base * rotation(Vector3::z(), angles[0])
            * link(0.25)
            * rotation(Vector3::y(), angles[1] + TAU / 8.0)
            * link(1.0)
            * rotation(Vector3::y(), angles[2] - TAU / 4.0)
            * link(2.0)
    }

    #[test]
    fn test_zero_angles_match_direct_composition() {
        let tree = three_joint_tree(Displacement::identity());
        let parameters = tree.prepare_parameters([("j1", 0.0), ("j2", 0.0), ("j3", 0.0)]).unwrap();
        let displacements = tree.evaluate(&parameters);

        let expected = Displacement::from_translation(Vector3::new(0.25, 0.0, 0.0))
            .compose(&Displacement::from_axis_angle(&Vector3::y(), TAU / 8.0).unwrap())
            .compose(&Displacement::from_translation(Vector3::new(1.0, 0.0, 0.0)))
            .compose(&Displacement::from_axis_angle(&Vector3::y(), -TAU / 4.0).unwrap())
            .compose(&Displacement::from_translation(Vector3::new(2.0, 0.0, 0.0)));
        let tip = displacements.get("l3").unwrap();
        assert_points_close(&expected.translation(), &tip.translation(), 1E-12);
        assert!((tip.rotation() - expected.rotation()).norm() < 1E-12);
    }

    #[test]
    fn test_random_poses_match_isometries() {
        let mut rng = seeded_rng();
        for _ in 0..100 {
            let (base, base_isometry) = random_pose(&mut rng);
            let angles: [f64; 3] = [
                rng.random_range(-TAU / 2.0..TAU / 2.0),
                rng.random_range(-TAU / 2.0..TAU / 2.0),
                rng.random_range(-TAU / 2.0..TAU / 2.0),
            ];
            let tree = three_joint_tree(base);
            let parameters = tree
                .prepare_parameters([("j1", angles[0]), ("j2", angles[1]), ("j3", angles[2])])
                .unwrap();
            let tip = tree.evaluate(&parameters).get("l3").copied().unwrap();
            let expected = isometry_chain(&base_isometry, angles);

            assert_points_close(&expected.translation.vector, &tip.translation(), 1E-9);
            let point = Point3::new(0.3, -0.2, 0.7);
            assert_points_close(
                &(expected * point).coords,
                &tip.transform_point(&point.coords),
                1E-9,
            );
        }
    }

    #[test]
    fn test_leg_chain_is_the_same_chain() {
        let mut rng = seeded_rng();
        let (base, _) = random_pose(&mut rng);
        let tree = three_joint_tree(base);
        let chain = LegChain::new(&LegGeometry::default(), base).unwrap();

        let angles = [0.3, -0.4, 0.5];
        let parameters = tree.prepare_parameters([("j1", 0.3), ("j2", -0.4), ("j3", 0.5)]).unwrap();
        let expected = tree.evaluate(&parameters).get("l3").unwrap().translation();
        assert_points_close(&expected, &chain.endpoint(&angles), 1E-12);

        // Joint keys of the leg are the ones the chain drives
        let keys: Vec<&str> = chain.tree().joint_keys().collect();
        assert_eq!(keys, JOINT_KEYS.to_vec());
    }

    #[test]
    fn test_leg_jacobian_columns() {
        let chain = LegChain::new(&LegGeometry::default(), Displacement::identity()).unwrap();
        let angles = DVector::zeros(3);
        let endpoint = chain.evaluate(&angles);
        let jacobian = compute_jacobian(&chain, &angles, &endpoint, 1E-6);
        assert_eq!(jacobian.shape(), (3, 3));

        // Turning the coxa joint moves the endpoint sideways by its distance from the Z axis
        let reach = endpoint[0];
        assert!((jacobian[(1, 0)] - reach).abs() < 1E-4);
        assert!(jacobian[(0, 0)].abs() < 1E-4);
        // Femur and tibia joints move it within the leg plane only
        assert!(jacobian[(1, 1)].abs() < 1E-9);
        assert!(jacobian[(1, 2)].abs() < 1E-9);
    }

    #[test]
    fn test_evaluate_into_reuses_buffer() {
        let tree = three_joint_tree(Displacement::identity());
        let mut parameters = tree.zero_parameters();
        let mut buffer = Vec::new();
        tree.evaluate_into(&parameters, &mut buffer);
        let capacity = buffer.capacity();
        let at_rest = buffer[tree.node_id("l3").unwrap().index()];

        parameters.set(tree.node_id("j1").unwrap(), TAU / 4.0);
        tree.evaluate_into(&parameters, &mut buffer);
        assert_eq!(buffer.capacity(), capacity);
        assert_eq!(buffer.len(), tree.len());

        // Quarter turn of the base joint swings the tip from X towards Y
        let turned = buffer[tree.node_id("l3").unwrap().index()].translation();
        let rest = at_rest.translation();
        assert_points_close(&Vector3::new(-rest.y, rest.x, rest.z), &turned, 1E-12);
    }

    /// A waist joint carrying two arms, each built like a leg.
    fn two_arm_tree() -> KinematicTree {
        let mut tree = KinematicTree::new(Displacement::identity());
        tree.add_child("waist", Part::revolute_joint(Vector3::z(), 0.0).unwrap()).unwrap();
        tree.add_node("trunk", Part::rigid_link(1.0), "waist").unwrap();
        for (arm, mount) in [("a", TAU / 8.0), ("b", -TAU / 8.0)] {
            let key = |name: &str| format!("{}_{}", arm, name);
            tree.add_node(&key("shoulder"), Part::revolute_joint(Vector3::z(), mount).unwrap(), "trunk").unwrap();
            tree.add_node(&key("upper"), Part::rigid_link(0.25), &key("shoulder")).unwrap();
            tree.add_node(&key("elbow"), Part::revolute_joint(Vector3::y(), TAU / 8.0).unwrap(), &key("upper"))
                .unwrap();
            tree.add_node(&key("fore"), Part::rigid_link(1.0), &key("elbow")).unwrap();
            tree.add_node(&key("wrist"), Part::revolute_joint(Vector3::y(), -TAU / 4.0).unwrap(), &key("fore"))
                .unwrap();
            tree.add_node(&key("hand"), Part::rigid_link(1.0), &key("wrist")).unwrap();
        }
        tree
    }

    #[test]
    fn test_two_tips_solved_together() {
        let tree = two_arm_tree();
        let joints: Vec<NodeId> = tree.joint_keys().map(|key| tree.node_id(key).unwrap()).collect();
        assert_eq!(joints.len(), 7);
        let tips = [tree.node_id("a_hand").unwrap(), tree.node_id("b_hand").unwrap()];

        // Both hand positions stacked into one output vector
        let hands = move |angles: &DVector<f64>| {
            let mut parameters = tree.zero_parameters();
            for (id, angle) in joints.iter().zip(angles.iter()) {
                parameters.set(*id, *angle);
            }
            let displacements = tree.evaluate(&parameters);
            let a = displacements.by_id(tips[0]).translation();
            let b = displacements.by_id(tips[1]).translation();
            DVector::from_column_slice(&[a.x, a.y, a.z, b.x, b.y, b.z])
        };

        let pose = DVector::from_vec(vec![0.6, 0.4, -0.3, 0.5, -0.5, 0.2, -0.4]);
        let target = hands.evaluate(&pose);
        let max_input_fix = TAU / 16.0;
        let solver = JacobianSolver::damped_least_squares(hands, 0.8)
            .with_max_input_fix(Some(max_input_fix))
            .with_max_output_error(Some(1.0));

        let mut angles = DVector::zeros(7);
        for _ in 0..300 {
            let next = solver.converge(&angles, &target, None);
            assert!((&next - &angles).amax() <= max_input_fix + 1E-12);
            angles = next;
        }
        let reached = solver.function().evaluate(&angles);
        assert_eq!(reached.len(), 6);
        assert!((reached - &target).norm() < 1E-6);
    }
}
