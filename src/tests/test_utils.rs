use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::MultipodConfig;
use crate::displacement::Displacement;

pub(crate) const DATA_DIR: &str = "src/tests/data";

/// Load a configuration fixture from the test data directory.
pub(crate) fn load_config(name: &str) -> Result<MultipodConfig> {
    let path = Path::new(DATA_DIR).join(name);
    MultipodConfig::from_yaml_file(&path)
        .with_context(|| format!("Failed to load test configuration: {}", path.display()))
}

/// Same seed on every run so failures reproduce.
pub(crate) fn seeded_rng() -> StdRng {
    StdRng::seed_from_u64(0x6865_7861)
}

pub(crate) fn random_unit_vector(rng: &mut StdRng) -> Vector3<f64> {
    loop {
        let v = Vector3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );
        let norm = v.norm();
        if norm > 0.1 && norm <= 1.0 {
            return v / norm;
        }
    }
}

/// Random displacement together with the same pose as an nalgebra isometry.
pub(crate) fn random_pose(rng: &mut StdRng) -> (Displacement, Isometry3<f64>) {
    let axis = random_unit_vector(rng);
    let angle = rng.random_range(-3.0..3.0);
    let translation = Vector3::new(
        rng.random_range(-2.0..2.0),
        rng.random_range(-2.0..2.0),
        rng.random_range(-2.0..2.0),
    );
    let isometry = Isometry3::from_parts(
        Translation3::from(translation),
        UnitQuaternion::from_scaled_axis(axis * angle),
    );
    (Displacement::from(isometry), isometry)
}

/// Compare two points with a tolerance, reporting both on failure.
pub(crate) fn assert_points_close(expected: &Vector3<f64>, actual: &Vector3<f64>, tolerance: f64) {
    let distance = (expected - actual).norm();
    assert!(
        distance <= tolerance,
        "points differ by {:.3e}: expected {:?}, got {:?}",
        distance, expected, actual
    );
}
