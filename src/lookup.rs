//! N-dimensional lookup table on a regular grid.
//!
//! The table associates output vectors to input vectors at the points of a uniform grid.
//! It is populated once (the expensive step, typically running an inverse kinematics
//! solver for every grid point) and then queried many times with either nearest
//! neighbour or multilinear interpolation. Queries outside of the grid bounds saturate to
//! the nearest cell rather than failing.
//!
//! ```
//! use rs_multipod_kinematics::lookup::{InputAxis, LookupTable};
//!
//! let mut table = LookupTable::new(vec![InputAxis::new(-1.0, 1.0, 3)], 1).unwrap();
//! table.populate(|x| x.to_vec()).unwrap();
//! assert!((table.get_lerp(&[0.25])[0] - 0.25).abs() < 1E-9);
//! assert_eq!(table.get_nearest(&[0.25]), &[0.0]);
//! assert!((table.get_lerp(&[10.0])[0] - 1.0).abs() < 1E-6);
//! ```
//!
//! Interpolation gathers all `2^N` corners of the cell holding the query, so the number of
//! input dimensions is kept small (see [`MAX_INPUT_DIMENSION`]).

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
#[cfg(feature = "allow_filesystem")]
use serde::Deserialize;
use tracing::debug;
use crate::error::{KinematicsError, Result};
use crate::npy;

/// Largest supported number of input dimensions. Interpolation cost grows as `2^N` and the
/// table itself as `points^N`.
pub const MAX_INPUT_DIMENSION: usize = 6;

/// Default margin keeping grid coordinates strictly inside the grid. Also the smallest
/// margin accepted.
pub const DEFAULT_EPSILON: f64 = 1E-9;

/// Largest margin accepted; half a cell would collapse two point grids.
pub const MAX_EPSILON: f64 = 0.49;

/// Bounds and number of grid points of one input component.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "allow_filesystem", derive(Deserialize))]
pub struct InputAxis {
    pub from: f64,
    pub to: f64,
    pub points: usize,
}

impl InputAxis {
    pub fn new(from: f64, to: f64, points: usize) -> Self {
        InputAxis { from, to, points }
    }

    fn span(&self) -> f64 {
        self.to - self.from
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    axes: Vec<InputAxis>,
    output_size: usize,
    epsilon: f64,
    /// Distance between consecutive grid points of each axis, in values. The output
    /// components are contiguous, so the last axis has stride `output_size`.
    strides: Vec<usize>,
    table: Vec<f64>,
}

impl LookupTable {
    /// Defines the bounds of the grid and the number of its points for each component of
    /// the input vector, and the number of components of the output vector. All values
    /// start at zero.
    pub fn new(axes: Vec<InputAxis>, output_size: usize) -> Result<Self> {
        if axes.is_empty() {
            return Err(KinematicsError::InvalidGrid("at least one input axis is required".to_string()));
        }
        if axes.len() > MAX_INPUT_DIMENSION {
            return Err(KinematicsError::InvalidGrid(format!(
                "{} input axes requested, at most {} are supported", axes.len(), MAX_INPUT_DIMENSION)));
        }
        if output_size == 0 {
            return Err(KinematicsError::InvalidGrid("output size must be positive".to_string()));
        }
        for (i, axis) in axes.iter().enumerate() {
            if axis.points < 2 {
                return Err(KinematicsError::InvalidGrid(format!(
                    "axis {} needs at least 2 points, has {}", i, axis.points)));
            }
            if !axis.from.is_finite() || !axis.to.is_finite() || axis.span() == 0.0 {
                return Err(KinematicsError::InvalidGrid(format!(
                    "axis {} has an invalid range [{}, {}]", i, axis.from, axis.to)));
            }
        }

        let mut strides = vec![0; axes.len()];
        let mut stride = output_size;
        for (i, axis) in axes.iter().enumerate().rev() {
            strides[i] = stride;
            stride = stride.checked_mul(axis.points)
                .ok_or_else(|| KinematicsError::InvalidGrid("grid is too large".to_string()))?;
        }
        debug!(shape = ?axes.iter().map(|a| a.points).collect::<Vec<_>>(), output_size, values = stride,
            "lookup table allocated");

        Ok(LookupTable {
            axes,
            output_size,
            epsilon: DEFAULT_EPSILON,
            strides,
            table: vec![0.0; stride],
        })
    }

    /// Margin keeping the grid coordinates away from the boundary indices, clamped to
    /// `[DEFAULT_EPSILON, MAX_EPSILON]`. Non-finite values keep the default.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = if epsilon.is_finite() {
            epsilon.clamp(DEFAULT_EPSILON, MAX_EPSILON)
        } else {
            DEFAULT_EPSILON
        };
        self
    }

    pub fn axes(&self) -> &[InputAxis] {
        &self.axes
    }

    pub fn input_size(&self) -> usize {
        self.axes.len()
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// `(points..., output_size)`
    pub fn shape(&self) -> Vec<usize> {
        let mut shape: Vec<usize> = self.axes.iter().map(|a| a.points).collect();
        shape.push(self.output_size);
        shape
    }

    /// All values, row-major in [`LookupTable::shape`] order.
    pub fn as_slice(&self) -> &[f64] {
        &self.table
    }

    fn offset(&self, indices: &[usize]) -> usize {
        assert_eq!(indices.len(), self.axes.len(), "wrong number of grid indices");
        indices.iter().zip(&self.strides).map(|(i, s)| i * s).sum()
    }

    /// Output vector stored at a grid point.
    pub fn get(&self, indices: &[usize]) -> &[f64] {
        let offset = self.offset(indices);
        &self.table[offset..offset + self.output_size]
    }

    /// Overwrites the output vector stored at a grid point.
    pub fn set(&mut self, indices: &[usize], values: &[f64]) -> Result<()> {
        if values.len() != self.output_size {
            return Err(KinematicsError::ShapeMismatch {
                expected: vec![self.output_size],
                found: vec![values.len()],
            });
        }
        let offset = self.offset(indices);
        self.table[offset..offset + self.output_size].copy_from_slice(values);
        Ok(())
    }

    /// Converts an input vector to grid coordinates. The coordinates may not be integers.
    /// They always lie within `[ε, points − 1 − ε]`, so out of range inputs saturate.
    ///
    /// # Panics
    ///
    /// If the input vector does not have one component per axis.
    pub fn to_grid_coords(&self, input: &[f64]) -> Vec<f64> {
        assert_eq!(input.len(), self.axes.len(), "input vector size does not match the table");
        input.iter().zip(&self.axes)
            .map(|(x, axis)| {
                let last = (axis.points - 1) as f64;
                let coord = (x - axis.from) * last / axis.span();
                coord.max(self.epsilon).min(last - self.epsilon)
            })
            .collect()
    }

    /// Converts grid indices to the input vector at that grid point.
    pub fn from_indices(&self, indices: &[usize]) -> Vec<f64> {
        indices.iter().zip(&self.axes)
            .map(|(&i, axis)| axis.from + i as f64 * axis.span() / (axis.points - 1) as f64)
            .collect()
    }

    /// Grid indices of the flat cell number (row-major).
    fn cell_indices(&self, cell: usize) -> Vec<usize> {
        let mut indices = vec![0; self.axes.len()];
        let mut rest = cell;
        for (i, axis) in self.axes.iter().enumerate().rev() {
            indices[i] = rest % axis.points;
            rest /= axis.points;
        }
        indices
    }

    fn cell_count(&self) -> usize {
        self.table.len() / self.output_size
    }

    /// Populates the lookup table at all the points of the grid, calling the function
    /// with the input vector of each point.
    ///
    /// # Returns
    ///
    /// [`KinematicsError::ShapeMismatch`] if the function returns a vector of the wrong
    /// size. Cells visited before the failure keep their new values.
    pub fn populate<F>(&mut self, mut function: F) -> Result<()>
    where
        F: FnMut(&[f64]) -> Vec<f64>,
    {
        for cell in 0..self.cell_count() {
            let indices = self.cell_indices(cell);
            let output = function(&self.from_indices(&indices));
            self.set(&indices, &output)?;
        }
        debug!(cells = self.cell_count(), "lookup table populated");
        Ok(())
    }

    /// Parallel version of [`LookupTable::populate`]. Cells are independent and written
    /// into disjoint slices, so no synchronization is needed.
    #[cfg(feature = "parallel")]
    pub fn par_populate<F>(&mut self, function: F) -> Result<()>
    where
        F: Fn(&[f64]) -> Vec<f64> + Sync,
    {
        use rayon::prelude::*;

        let output_size = self.output_size;
        let cells = self.cell_count();
        let template = self.clone_geometry();
        self.table
            .par_chunks_mut(output_size)
            .enumerate()
            .try_for_each(|(cell, values)| {
                let output = function(&template.from_indices(&template.cell_indices(cell)));
                if output.len() != output_size {
                    return Err(KinematicsError::ShapeMismatch {
                        expected: vec![output_size],
                        found: vec![output.len()],
                    });
                }
                values.copy_from_slice(&output);
                Ok(())
            })?;
        debug!(cells, "lookup table populated in parallel");
        Ok(())
    }

    /// Same grid without storage, used to map cells to inputs while the real storage is
    /// borrowed mutably.
    #[cfg(feature = "parallel")]
    fn clone_geometry(&self) -> LookupTable {
        LookupTable {
            axes: self.axes.clone(),
            output_size: self.output_size,
            epsilon: self.epsilon,
            strides: self.strides.clone(),
            table: Vec::new(),
        }
    }

    /// Estimates the output vector using nearest-neighbor interpolation. Inputs exactly
    /// between two grid points go to the even index.
    pub fn get_nearest(&self, input: &[f64]) -> &[f64] {
        let indices: Vec<usize> = self.to_grid_coords(input).iter()
            .map(|c| c.round_ties_even() as usize)
            .collect();
        self.get(&indices)
    }

    /// Estimates the output vector using multilinear interpolation between the `2^N`
    /// corners of the grid cell that holds the input.
    pub fn get_lerp(&self, input: &[f64]) -> Vec<f64> {
        let coords = self.to_grid_coords(input);
        let dimension = coords.len();
        let mut base = 0;
        let mut fractions = Vec::with_capacity(dimension);
        for (coord, stride) in coords.iter().zip(&self.strides) {
            let lower = coord.floor();
            base += lower as usize * stride;
            fractions.push(coord - lower);
        }

        // Bit d of the corner number selects the upper neighbour along axis d.
        let corners = 1usize << dimension;
        let mut weights = vec![1.0; corners];
        for (corner, weight) in weights.iter_mut().enumerate() {
            for (d, fraction) in fractions.iter().enumerate() {
                *weight *= if corner & (1 << d) != 0 { *fraction } else { 1.0 - fraction };
            }
        }

        let mut output = vec![0.0; self.output_size];
        for (corner, weight) in weights.iter().enumerate() {
            if *weight == 0.0 {
                continue;
            }
            let offset = base + (0..dimension)
                .filter(|d| corner & (1 << d) != 0)
                .map(|d| self.strides[d])
                .sum::<usize>();
            for (out, value) in output.iter_mut().zip(&self.table[offset..offset + self.output_size]) {
                *out += weight * value;
            }
        }
        output
    }

    /// Writes the table as a self-describing dense array.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        npy::write_f64(writer, &self.shape(), &self.table)
    }

    /// Reads a table written by [`LookupTable::save`]. The stored shape must equal this
    /// table's shape; otherwise [`KinematicsError::ShapeMismatch`] is returned and the
    /// contents are left unchanged.
    pub fn load<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let array = npy::read_f64(reader)?;
        let expected = self.shape();
        if array.shape != expected {
            return Err(KinematicsError::ShapeMismatch { expected, found: array.shape });
        }
        self.table = array.data;
        Ok(())
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.save(&mut writer)?;
        writer.flush()?;
        debug!(path = %path.display(), "lookup table saved");
        Ok(())
    }

    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        self.load(&mut reader)?;
        debug!(path = %path.display(), "lookup table loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-7;

    fn identity_table() -> LookupTable {
        let mut table = LookupTable::new(vec![InputAxis::new(-1.0, 1.0, 3)], 1).unwrap();
        table.populate(|x| x.to_vec()).unwrap();
        table
    }

    fn assert_close(expected: f64, actual: &[f64]) {
        assert_eq!(actual.len(), 1);
        assert!((expected - actual[0]).abs() < EPSILON, "expected {}, got {}", expected, actual[0]);
    }

    #[test]
    fn test_invalid_grids() {
        assert!(LookupTable::new(vec![], 1).is_err());
        assert!(LookupTable::new(vec![InputAxis::new(0.0, 1.0, 1)], 1).is_err());
        assert!(LookupTable::new(vec![InputAxis::new(1.0, 1.0, 3)], 1).is_err());
        assert!(LookupTable::new(vec![InputAxis::new(0.0, f64::NAN, 3)], 1).is_err());
        assert!(LookupTable::new(vec![InputAxis::new(0.0, 1.0, 3)], 0).is_err());
        let too_many = vec![InputAxis::new(0.0, 1.0, 2); MAX_INPUT_DIMENSION + 1];
        assert!(matches!(LookupTable::new(too_many, 1), Err(KinematicsError::InvalidGrid(_))));
    }

    #[test]
    fn test_shape() {
        let table = LookupTable::new(vec![
            InputAxis::new(-2.0, 2.0, 9),
            InputAxis::new(-2.0, 2.0, 5),
            InputAxis::new(-2.0, 2.0, 4),
        ], 3).unwrap();
        assert_eq!(table.shape(), vec![9, 5, 4, 3]);
        assert_eq!(table.as_slice().len(), 9 * 5 * 4 * 3);
        assert_eq!(table.input_size(), 3);
        assert_eq!(table.output_size(), 3);
    }

    #[test]
    fn test_1d_nearest() {
        let table = identity_table();

        // At grid points
        assert_close(-1.0, table.get_nearest(&[-1.0]));
        assert_close(0.0, table.get_nearest(&[0.0]));
        assert_close(1.0, table.get_nearest(&[1.0]));

        // Not at grid points
        assert_close(-1.0, table.get_nearest(&[-0.75]));
        assert_close(0.0, table.get_nearest(&[-0.25]));
        assert_close(0.0, table.get_nearest(&[0.25]));
        assert_close(1.0, table.get_nearest(&[0.75]));

        // Out of grid bounds
        assert_close(-1.0, table.get_nearest(&[-10.0]));
        assert_close(1.0, table.get_nearest(&[10.0]));
    }

    #[test]
    fn test_1d_lerp() {
        let table = identity_table();

        // At grid points
        assert_close(-1.0, &table.get_lerp(&[-1.0]));
        assert_close(0.0, &table.get_lerp(&[0.0]));
        assert_close(1.0, &table.get_lerp(&[1.0]));

        // Not at grid points
        assert_close(-0.75, &table.get_lerp(&[-0.75]));
        assert_close(-0.25, &table.get_lerp(&[-0.25]));
        assert_close(0.25, &table.get_lerp(&[0.25]));
        assert_close(0.75, &table.get_lerp(&[0.75]));

        // Out of grid bounds
        assert_close(-1.0, &table.get_lerp(&[-10.0]));
        assert_close(1.0, &table.get_lerp(&[10.0]));
    }

    #[test]
    fn test_nearest_ties_go_to_even_index() {
        let table = identity_table();
        assert_close(-1.0, table.get_nearest(&[-0.5]));
        assert_close(1.0, table.get_nearest(&[0.5]));
    }

    #[test]
    fn test_epsilon_is_clamped() {
        // A negative margin would put the upper lerp corner past the grid
        let table = identity_table().with_epsilon(-0.25);
        assert_eq!(table.to_grid_coords(&[5.0]), vec![2.0 - DEFAULT_EPSILON]);
        assert_close(1.0, &table.get_lerp(&[5.0]));

        let table = identity_table().with_epsilon(3.0);
        assert_eq!(table.to_grid_coords(&[-5.0]), vec![MAX_EPSILON]);
        let table = identity_table().with_epsilon(f64::NAN);
        assert_eq!(table.to_grid_coords(&[-5.0]), vec![DEFAULT_EPSILON]);
    }

    #[test]
    fn test_grid_coords_are_clamped() {
        let table = identity_table();
        let coords = table.to_grid_coords(&[-5.0]);
        assert_eq!(coords, vec![DEFAULT_EPSILON]);
        let coords = table.to_grid_coords(&[5.0]);
        assert_eq!(coords, vec![2.0 - DEFAULT_EPSILON]);
        assert_eq!(table.to_grid_coords(&[0.5]), vec![1.5]);
        assert_eq!(table.from_indices(&[2]), vec![1.0]);
    }

    #[test]
    fn test_2d_bilinear_is_exact_for_bilinear_functions() {
        let mut table = LookupTable::new(vec![
            InputAxis::new(0.0, 2.0, 3),
            InputAxis::new(-1.0, 1.0, 5),
        ], 2).unwrap();
        // Bilinear functions are reproduced exactly by bilinear interpolation
        table.populate(|x| vec![x[0] * x[1] + 2.0 * x[0] - x[1], 3.0]).unwrap();

        for (a, b) in [(0.3, -0.9), (1.7, 0.1), (1.0, 0.5), (0.05, 0.95)] {
            let value = table.get_lerp(&[a, b]);
            assert!((value[0] - (a * b + 2.0 * a - b)).abs() < EPSILON, "at ({}, {})", a, b);
            assert!((value[1] - 3.0).abs() < EPSILON);
        }
        // Nearest snaps both coordinates
        let nearest = table.get_nearest(&[0.9, 0.4]);
        assert!((nearest[0] - (1.0 * 0.5 + 2.0 - 0.5)).abs() < EPSILON);
    }

    #[test]
    fn test_3d_trilinear_corner_order() {
        let axes = vec![InputAxis::new(0.0, 1.0, 2); 3];
        let mut table = LookupTable::new(axes, 1).unwrap();
        table.populate(|x| vec![x[0] + 10.0 * x[1] + 100.0 * x[2]]).unwrap();
        assert_eq!(table.get(&[1, 0, 0]), &[1.0]);
        assert_eq!(table.get(&[0, 0, 1]), &[100.0]);
        let value = table.get_lerp(&[0.25, 0.5, 0.75]);
        assert!((value[0] - (0.25 + 5.0 + 75.0)).abs() < EPSILON);
    }

    #[test]
    fn test_populate_wrong_output_size() {
        let mut table = LookupTable::new(vec![InputAxis::new(0.0, 1.0, 2)], 2).unwrap();
        let result = table.populate(|x| x.to_vec());
        assert!(matches!(result, Err(KinematicsError::ShapeMismatch { .. })));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_par_populate_matches_sequential() {
        let axes = vec![InputAxis::new(-1.0, 1.0, 4), InputAxis::new(0.0, 3.0, 3)];
        let f = |x: &[f64]| vec![x[0] * 2.0, x[1] - x[0]];
        let mut sequential = LookupTable::new(axes.clone(), 2).unwrap();
        sequential.populate(f).unwrap();
        let mut parallel = LookupTable::new(axes, 2).unwrap();
        parallel.par_populate(f).unwrap();
        assert_eq!(sequential.as_slice(), parallel.as_slice());
    }

    #[test]
    fn test_save_load_in_memory() {
        let mut a = LookupTable::new(vec![InputAxis::new(0.0, 2.0, 3)], 1).unwrap();
        a.populate(|x| x.to_vec()).unwrap();
        let mut blob = Vec::new();
        a.save(&mut blob).unwrap();

        let mut b = LookupTable::new(vec![InputAxis::new(0.0, 2.0, 3)], 1).unwrap();
        b.load(&mut blob.as_slice()).unwrap();
        assert_eq!(a, b);
        for i in 0..3 {
            assert_eq!(b.get(&[i]), &[i as f64]);
        }
    }

    #[test]
    fn test_load_shape_mismatch_leaves_table() {
        let mut a = LookupTable::new(vec![InputAxis::new(0.0, 2.0, 3)], 1).unwrap();
        a.populate(|x| x.to_vec()).unwrap();
        let mut blob = Vec::new();
        a.save(&mut blob).unwrap();

        let mut c = LookupTable::new(vec![InputAxis::new(0.0, 2.0, 5)], 1).unwrap();
        let result = c.load(&mut blob.as_slice());
        match result {
            Err(KinematicsError::ShapeMismatch { expected, found }) => {
                assert_eq!(expected, vec![5, 1]);
                assert_eq!(found, vec![3, 1]);
            }
            other => panic!("expected shape mismatch, got {:?}", other),
        }
        assert!(c.as_slice().iter().all(|v| *v == 0.0));
    }
}
