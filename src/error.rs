//! Error handling for tree construction, lookup tables and configuration

use std::io;
use thiserror::Error;

/// Unified error reported while building kinematic trees, loading lookup tables
/// or reading configuration. Numeric degeneracy (near-singular Jacobians) and
/// lookups outside of the table bounds are never reported as errors.
#[derive(Debug, Error)]
pub enum KinematicsError {
    #[error("Key \"{0}\" already exists in the tree")]
    DuplicateKey(String),

    #[error("Parent \"{0}\" is not in the tree")]
    UnknownParent(String),

    #[error("Node \"{0}\" is not a joint of the tree")]
    UnknownNode(String),

    #[error("Joint \"{0}\" has no angle in the parameters")]
    MissingParameter(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("Rotation axis must have a non-zero norm")]
    ZeroAxis,

    #[error("Shapes do not match: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Invalid lookup grid: {0}")]
    InvalidGrid(String),

    #[error("Malformed array data: {0}")]
    Format(String),

    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration Error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, KinematicsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = KinematicsError::DuplicateKey("coxa".to_string());
        assert_eq!(err.to_string(), "Key \"coxa\" already exists in the tree");

        let err = KinematicsError::ShapeMismatch { expected: vec![3, 1], found: vec![5, 1] };
        assert_eq!(err.to_string(), "Shapes do not match: expected [3, 1], found [5, 1]");
    }

    #[test]
    fn test_from_io() {
        let io = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: KinematicsError = io.into();
        assert!(matches!(err, KinematicsError::Io(_)));
    }
}
