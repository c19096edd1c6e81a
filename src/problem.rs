use nalgebra::{DMatrix, DVector, RealField};

use crate::{Constraint, CostFunction, Result};

/// A least squares minimization problem.
///
/// This is what [`LevenbergMarquardt`](struct.LevenbergMarquardt.html) needs
/// to compute the residuals and the Jacobian. See the [module documentation](index.html)
/// for a usage example.
pub trait LeastSquaresProblem<F: RealField> {
    /// Set the stored parameters `$\vec{x}$`.
    fn set_params(&mut self, x: &DVector<F>);

    /// Get the current parameter vector `$\vec{x}$`.
    fn params(&self) -> DVector<F>;

    /// Compute the residual vector.
    ///
    /// Returning `None` aborts the minimization.
    fn residuals(&self) -> Option<DVector<F>>;

    /// Compute the Jacobian of the residual vector.
    ///
    /// The default returns `None`, which only works if the solver was
    /// configured to approximate the Jacobian by forward differences.
    fn jacobian(&self) -> Option<DMatrix<F>> {
        None
    }
}

/// The mutable state of an optimization run.
///
/// A `Problem` binds a [`CostFunction`] and a [`Constraint`] to the current
/// iterate. Optimization methods read the starting point from
/// [`current_value`](#method.current_value) and leave the result there,
/// together with the corresponding [`function_value`](#method.function_value).
///
/// All evaluations made through the problem are counted.
pub struct Problem<'a> {
    cost_function: &'a dyn CostFunction,
    constraint: &'a dyn Constraint,
    current_value: DVector<f64>,
    function_value: Option<f64>,
    squared_norm: Option<f64>,
    function_evaluation: usize,
    gradient_evaluation: usize,
}

impl<'a> Problem<'a> {
    pub fn new(
        cost_function: &'a dyn CostFunction,
        constraint: &'a dyn Constraint,
        initial_value: DVector<f64>,
    ) -> Self {
        Self {
            cost_function,
            constraint,
            current_value: initial_value,
            function_value: None,
            squared_norm: None,
            function_evaluation: 0,
            gradient_evaluation: 0,
        }
    }

    /// Zero the evaluation counters and forget the cached function value and
    /// gradient norm. The current iterate is kept.
    pub fn reset(&mut self) {
        self.function_evaluation = 0;
        self.gradient_evaluation = 0;
        self.function_value = None;
        self.squared_norm = None;
    }

    /// Cost function value at `x`.
    pub fn value(&mut self, x: &DVector<f64>) -> Result<f64> {
        self.function_evaluation += 1;
        self.cost_function.value(x)
    }

    /// Cost function components at `x`.
    pub fn values(&mut self, x: &DVector<f64>) -> Result<DVector<f64>> {
        self.function_evaluation += 1;
        self.cost_function.values(x)
    }

    pub fn gradient(&mut self, gradient: &mut DVector<f64>, x: &DVector<f64>) -> Result<()> {
        self.gradient_evaluation += 1;
        self.cost_function.gradient(gradient, x)
    }

    pub fn value_and_gradient(
        &mut self,
        gradient: &mut DVector<f64>,
        x: &DVector<f64>,
    ) -> Result<f64> {
        self.function_evaluation += 1;
        self.gradient_evaluation += 1;
        self.cost_function.value_and_gradient(gradient, x)
    }

    pub fn cost_function(&self) -> &'a dyn CostFunction {
        self.cost_function
    }

    pub fn constraint(&self) -> &'a dyn Constraint {
        self.constraint
    }

    pub fn current_value(&self) -> &DVector<f64> {
        &self.current_value
    }

    pub fn set_current_value(&mut self, x: DVector<f64>) {
        self.current_value = x;
    }

    /// Last function value stored by the optimization method.
    pub fn function_value(&self) -> Option<f64> {
        self.function_value
    }

    pub fn set_function_value(&mut self, value: f64) {
        self.function_value = Some(value);
    }

    /// Last squared gradient norm stored by the optimization method.
    pub fn gradient_norm_value(&self) -> Option<f64> {
        self.squared_norm
    }

    pub fn set_gradient_norm_value(&mut self, squared_norm: f64) {
        self.squared_norm = Some(squared_norm);
    }

    /// Number of cost function evaluations since the last reset.
    pub fn function_evaluation(&self) -> usize {
        self.function_evaluation
    }

    /// Number of gradient evaluations since the last reset.
    pub fn gradient_evaluation(&self) -> usize {
        self.gradient_evaluation
    }
}
