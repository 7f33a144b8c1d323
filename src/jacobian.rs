//! Numeric inverse kinematics solvers built on the Jacobian matrix.
//!
//! The solvers work on any [`VectorFunction`] mapping an input vector (joint angles) to an
//! output vector (endpoint coordinates). The Jacobian is estimated with forward finite
//! differences, so the function does not need to be differentiable in closed form.
//! Two ways to turn the Jacobian into an input correction are provided, selected with
//! [`SolverMethod`]:
//!
//! - **Jacobian inverse**: `Δx = pinv(J)·Δy`. Converges fast on well conditioned
//!   configurations and degrades into a minimum norm least squares step when `J` is
//!   singular or not square.
//! - **Damped least squares**: `Δx = Jᵗ(JJᵗ + λ²I)⁻¹·Δy`. Stable near singularities at the
//!   cost of more iterations.
//!
//! Each call to [`JacobianSolver::converge`] is one Newton-style step. There is no
//! "converged" state: a control loop calls it once per tick so the mechanism glides
//! towards the target.
//!
//! ```
//! use nalgebra::{DMatrix, DVector};
//! use rs_multipod_kinematics::jacobian::JacobianSolver;
//!
//! let matrix = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0]);
//! let solver = JacobianSolver::jacobian_inverse(move |x: &DVector<f64>| &matrix * x);
//! let x = solver.converge(&DVector::zeros(2), &DVector::from_vec(vec![2.0, 2.0]), None);
//! assert!((x - DVector::from_vec(vec![1.0, 0.5])).norm() < 1E-6);
//! ```

extern crate nalgebra as na;

use na::{DMatrix, DVector};
use tracing::{trace, warn};

/// Default finite difference step.
pub const DEFAULT_INPUT_DELTA: f64 = 0.001;

/// Singular values below this fraction of the largest one are treated as zero when
/// computing the pseudo-inverse.
const PINV_RCOND: f64 = 1E-15;

/// Function of a vector the solvers can invert. Must be pure: the same input always gives
/// an output of the same size.
pub trait VectorFunction {
    fn evaluate(&self, input: &DVector<f64>) -> DVector<f64>;
}

impl<F> VectorFunction for F
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    fn evaluate(&self, input: &DVector<f64>) -> DVector<f64> {
        self(input)
    }
}

/// How the linear system `J·Δx = Δy` is solved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolverMethod {
    /// Moore–Penrose pseudo-inverse of the Jacobian.
    JacobianInverse,
    /// Damped least squares with the given damping constant λ.
    DampedLeastSquares { damping: f64 },
}

/// Function to compute the Jacobian matrix of a function at the given input
///
/// # Arguments
///
/// * `function` - The function to differentiate
/// * `input` - Input vector where the Jacobian is estimated
/// * `output` - `function(input)`, passed in as it is usually known already
/// * `delta` - Finite difference step, must not be zero
///
/// # Returns
///
/// The `output.len() × input.len()` matrix where column `i` is
/// `(function(input + delta·eᵢ) − output) / delta`. Costs one function evaluation per
/// input component.
pub fn compute_jacobian<F: VectorFunction + ?Sized>(
    function: &F,
    input: &DVector<f64>,
    output: &DVector<f64>,
    delta: f64,
) -> DMatrix<f64> {
    let mut jacobian = DMatrix::zeros(output.len(), input.len());
    let mut perturbed = input.clone();
    for i in 0..input.len() {
        perturbed[i] += delta;
        let column = (function.evaluate(&perturbed) - output) / delta;
        jacobian.set_column(i, &column);
        perturbed[i] = input[i];
    }
    jacobian
}

/// Scale a vector so that no component exceeds `max_component` in absolute value.
/// Vectors already within the limit are left unchanged.
pub fn limit_component(vector: &mut DVector<f64>, max_component: f64) {
    let highest = vector.amax();
    if highest > max_component {
        *vector *= max_component / highest;
    }
}

/// Scale a vector so that its norm does not exceed `max_norm`.
/// Vectors already within the limit are left unchanged.
pub fn limit_norm(vector: &mut DVector<f64>, max_norm: f64) {
    let norm = vector.norm();
    if norm > max_norm {
        *vector *= max_norm / norm;
    }
}

/// Minimum norm least squares inverse. Never fails: rank deficient and non-square matrices
/// are handled by dropping negligible singular values.
pub fn pseudo_inverse(matrix: DMatrix<f64>) -> DMatrix<f64> {
    let (rows, cols) = matrix.shape();
    let svd = matrix.svd(true, true);
    let tolerance = PINV_RCOND * svd.singular_values.max();
    // Only fails for negative tolerance or missing U/Vᵗ, neither can happen here.
    svd.pseudo_inverse(tolerance).unwrap_or_else(|_| DMatrix::zeros(cols, rows))
}

/// Damped least squares matrix `Jᵗ(JJᵗ + λ²I)⁻¹`. With λ = 0 this is the pseudo-inverse
/// of `J`, which is also what singular damped matrices fall back to.
fn damped_least_squares_matrix(jacobian: &DMatrix<f64>, damping: f64) -> DMatrix<f64> {
    if damping == 0.0 {
        return pseudo_inverse(jacobian.clone());
    }
    let jacobian_transpose = jacobian.transpose();
    let size = jacobian.nrows();
    let square = jacobian * &jacobian_transpose + DMatrix::identity(size, size) * damping.powi(2);
    // Positive definite for any non-zero damping.
    let inverse = match square.clone().cholesky() {
        Some(cholesky) => cholesky.inverse(),
        None => match square.lu().try_inverse() {
            Some(inverse) => inverse,
            None => {
                warn!(damping, "damped matrix is singular, using pseudo-inverse");
                return pseudo_inverse(jacobian.clone());
            }
        },
    };
    jacobian_transpose * inverse
}

/// Numeric solver using the Jacobian of the target function. Holds the function, the
/// finite difference step, the solving method and optional step limits; stateless
/// otherwise.
#[derive(Debug, Clone)]
pub struct JacobianSolver<F> {
    function: F,
    method: SolverMethod,
    input_delta: f64,
    max_input_fix: Option<f64>,
    max_output_error: Option<f64>,
}

impl<F: VectorFunction> JacobianSolver<F> {
    pub fn new(function: F, method: SolverMethod) -> Self {
        JacobianSolver {
            function,
            method,
            input_delta: DEFAULT_INPUT_DELTA,
            max_input_fix: None,
            max_output_error: None,
        }
    }

    /// Solver using the Jacobian (pseudo-)inverse.
    pub fn jacobian_inverse(function: F) -> Self {
        Self::new(function, SolverMethod::JacobianInverse)
    }

    /// Solver using damped least squares with the damping constant λ.
    pub fn damped_least_squares(function: F, damping: f64) -> Self {
        Self::new(function, SolverMethod::DampedLeastSquares { damping })
    }

    /// Finite difference step. Must not be zero.
    pub fn with_input_delta(mut self, input_delta: f64) -> Self {
        self.input_delta = input_delta;
        self
    }

    /// Largest allowed change of any single input component per step (e.g. the angular
    /// velocity of a joint per control tick).
    pub fn with_max_input_fix(mut self, max_input_fix: Option<f64>) -> Self {
        self.max_input_fix = max_input_fix;
        self
    }

    /// Largest output error chased in a single step. Bigger errors are scaled down,
    /// keeping their direction, which smooths the motion.
    pub fn with_max_output_error(mut self, max_output_error: Option<f64>) -> Self {
        self.max_output_error = max_output_error;
        self
    }

    pub fn function(&self) -> &F {
        &self.function
    }

    pub fn method(&self) -> SolverMethod {
        self.method
    }

    pub fn input_delta(&self) -> f64 {
        self.input_delta
    }

    pub fn max_input_fix(&self) -> Option<f64> {
        self.max_input_fix
    }

    pub fn max_output_error(&self) -> Option<f64> {
        self.max_output_error
    }

    /// Jacobian matrix of the function at the input vector. The output is computed if
    /// not supplied.
    pub fn jacobian(&self, input: &DVector<f64>, output: Option<&DVector<f64>>) -> DMatrix<f64> {
        match output {
            Some(output) => compute_jacobian(&self.function, input, output, self.input_delta),
            None => {
                let output = self.function.evaluate(input);
                compute_jacobian(&self.function, input, &output, self.input_delta)
            }
        }
    }

    /// Jacobian transpose (rows are the output change per input component).
    pub fn jacobian_transpose(&self, input: &DVector<f64>, output: Option<&DVector<f64>>) -> DMatrix<f64> {
        self.jacobian(input, output).transpose()
    }

    /// The matrix that maps an output error into an input fix, according to the method.
    pub fn solver_matrix(&self, input: &DVector<f64>, output: &DVector<f64>) -> DMatrix<f64> {
        let jacobian = compute_jacobian(&self.function, input, output, self.input_delta);
        match self.method {
            SolverMethod::JacobianInverse => pseudo_inverse(jacobian),
            SolverMethod::DampedLeastSquares { damping } => {
                damped_least_squares_matrix(&jacobian, damping)
            }
        }
    }

    /// Attempts to calculate an improved input vector so that the output vector converges
    /// toward the target.
    ///
    /// # Arguments
    ///
    /// * `input` - Current input vector
    /// * `target` - Desired output vector
    /// * `output` - `function(input)` if already known, computed otherwise
    ///
    /// # Returns
    ///
    /// `input + Δx`, with the output error and `Δx` clamped according to the configured
    /// limits.
    pub fn converge(
        &self,
        input: &DVector<f64>,
        target: &DVector<f64>,
        output: Option<&DVector<f64>>,
    ) -> DVector<f64> {
        let computed;
        let output = match output {
            Some(output) => output,
            None => {
                computed = self.function.evaluate(input);
                &computed
            }
        };

        let matrix = self.solver_matrix(input, output);
        let mut output_error = target - output;
        if let Some(max_output_error) = self.max_output_error {
            limit_norm(&mut output_error, max_output_error);
        }
        let mut input_fix = matrix * output_error;
        if let Some(max_input_fix) = self.max_input_fix {
            limit_component(&mut input_fix, max_input_fix);
        }
        trace!(fix = input_fix.amax(), "converge step");
        input + input_fix
    }

    /// Calls [`JacobianSolver::converge`] until the output is within `tolerance` of the
    /// target or `iterations` steps have been made.
    ///
    /// # Returns
    ///
    /// The last input and the norm of its remaining output error.
    pub fn solve(
        &self,
        input: &DVector<f64>,
        target: &DVector<f64>,
        iterations: usize,
        tolerance: f64,
    ) -> (DVector<f64>, f64) {
        let mut input = input.clone();
        let mut output = self.function.evaluate(&input);
        let mut error = (target - &output).norm();
        for _ in 0..iterations {
            if error <= tolerance {
                break;
            }
            input = self.converge(&input, target, Some(&output));
            output = self.function.evaluate(&input);
            error = (target - &output).norm();
        }
        (input, error)
    }
}
