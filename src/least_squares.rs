//! Model fitting on top of the optimization methods.
//!
//! A [`FittingProblem`] supplies target data and the model fit for a
//! parameter vector. [`NonLinearLeastSquare`] minimizes
//! `$\sum_i (\mathrm{target}_i - \mathrm{fit}_i(\vec{x}))^2$` with any
//! [`OptimizationMethod`], conjugate gradient by default.
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::{
    ArmijoLineSearch, Constraint, ConjugateGradient, CostFunction, EndCriteria, EndCriteriaType,
    OptimizationMethod, Problem, Result,
};

/// Target data and a model to fit to it.
pub trait FittingProblem {
    /// Number of parameters.
    fn size(&self) -> usize;

    /// Target values and model values at `x`.
    fn target_and_value(&self, x: &DVector<f64>) -> Result<(DVector<f64>, DVector<f64>)>;

    /// Target values, model values and the Jacobian of the model values at
    /// `x` (one row per target).
    fn target_value_and_gradient(
        &self,
        x: &DVector<f64>,
    ) -> Result<(DVector<f64>, DVector<f64>, DMatrix<f64>)>;
}

/// The cost `$\|\mathrm{target} - \mathrm{fit}(\vec{x})\|^2$` of a [`FittingProblem`].
///
/// [`values`](CostFunction::values) are the differences
/// `target - fit`, so least squares methods see the individual residuals.
pub struct LeastSquareFunction<'a, P: ?Sized> {
    problem: &'a P,
}

impl<'a, P: FittingProblem + ?Sized> LeastSquareFunction<'a, P> {
    pub fn new(problem: &'a P) -> Self {
        Self { problem }
    }
}

impl<P: FittingProblem + ?Sized> CostFunction for LeastSquareFunction<'_, P> {
    fn value(&self, x: &DVector<f64>) -> Result<f64> {
        let (target, fit) = self.problem.target_and_value(x)?;
        Ok((target - fit).norm_squared())
    }

    fn values(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        let (target, fit) = self.problem.target_and_value(x)?;
        Ok(target - fit)
    }

    fn gradient(&self, gradient: &mut DVector<f64>, x: &DVector<f64>) -> Result<()> {
        self.value_and_gradient(gradient, x).map(|_| ())
    }

    fn value_and_gradient(&self, gradient: &mut DVector<f64>, x: &DVector<f64>) -> Result<f64> {
        let (target, fit, fit_jacobian) = self.problem.target_value_and_gradient(x)?;
        let diff = target - fit;
        *gradient = fit_jacobian.tr_mul(&diff) * -2.0;
        Ok(diff.norm_squared())
    }

    fn jacobian(&self, jacobian: &mut DMatrix<f64>, x: &DVector<f64>) -> Result<()> {
        let (_, _, fit_jacobian) = self.problem.target_value_and_gradient(x)?;
        *jacobian = -fit_jacobian;
        Ok(())
    }
}

/// Fits a [`FittingProblem`] within a constraint.
///
/// Each [`perform`](Self::perform) uses the end criteria
/// `EndCriteria(max_iterations, min(max_iterations / 2, 100), accuracy, accuracy, accuracy)`.
///
/// # Example
///
/// ```
/// use calibration_optim::{FittingProblem, NoConstraint, NonLinearLeastSquare, Result};
/// use nalgebra::{DMatrix, DVector};
///
/// // y = a + b t through three points
/// struct Line;
///
/// impl FittingProblem for Line {
///     fn size(&self) -> usize {
///         2
///     }
///     fn target_and_value(&self, x: &DVector<f64>) -> Result<(DVector<f64>, DVector<f64>)> {
///         let target = DVector::from_vec(vec![1.0, 3.0, 5.0]);
///         Ok((target, DVector::from_fn(3, |i, _| x[0] + x[1] * i as f64)))
///     }
///     fn target_value_and_gradient(
///         &self,
///         x: &DVector<f64>,
///     ) -> Result<(DVector<f64>, DVector<f64>, DMatrix<f64>)> {
///         let (target, fit) = self.target_and_value(x)?;
///         Ok((target, fit, DMatrix::from_fn(3, 2, |i, j| if j == 0 { 1.0 } else { i as f64 })))
///     }
/// }
///
/// let constraint = NoConstraint;
/// let mut fit = NonLinearLeastSquare::new(&constraint, 1e-10, 200);
/// fit.set_initial_value(DVector::zeros(2));
/// let x = fit.perform(&Line)?;
/// assert!((x[0] - 1.0).abs() < 1e-3);
/// assert!((x[1] - 2.0).abs() < 1e-3);
/// # Ok::<(), calibration_optim::Error>(())
/// ```
pub struct NonLinearLeastSquare<'c, M = ConjugateGradient<ArmijoLineSearch>> {
    constraint: &'c dyn Constraint,
    method: M,
    accuracy: f64,
    max_iterations: usize,
    initial_value: DVector<f64>,
    results: DVector<f64>,
    residual_norm: f64,
    iterations: usize,
    exit_flag: EndCriteriaType,
}

impl<'c> NonLinearLeastSquare<'c> {
    /// Conjugate gradient (Fletcher-Reeves, Armijo line search).
    pub fn new(constraint: &'c dyn Constraint, accuracy: f64, max_iterations: usize) -> Self {
        Self::with_method(
            constraint,
            accuracy,
            max_iterations,
            ConjugateGradient::<ArmijoLineSearch>::default(),
        )
    }
}

impl<'c, M: OptimizationMethod> NonLinearLeastSquare<'c, M> {
    pub fn with_method(
        constraint: &'c dyn Constraint,
        accuracy: f64,
        max_iterations: usize,
        method: M,
    ) -> Self {
        Self {
            constraint,
            method,
            accuracy,
            max_iterations,
            initial_value: DVector::zeros(0),
            results: DVector::zeros(0),
            residual_norm: 0.0,
            iterations: 0,
            exit_flag: EndCriteriaType::None,
        }
    }

    pub fn set_initial_value(&mut self, initial_value: DVector<f64>) {
        self.initial_value = initial_value;
    }

    /// Fit `problem` starting from the initial value and return the best
    /// parameters found.
    ///
    /// # Errors
    ///
    /// Fails if the initial value doesn't have `problem.size()` entries, if
    /// `max_iterations` is too small for valid end criteria, or if the
    /// optimization method fails.
    pub fn perform<P: FittingProblem + ?Sized>(&mut self, problem: &P) -> Result<&DVector<f64>> {
        if self.initial_value.len() != problem.size() {
            return Err(crate::Error::InvalidArgument(format!(
                "initial value has {} entries but the problem has {} parameters",
                self.initial_value.len(),
                problem.size()
            )));
        }
        let eps = self.accuracy;
        let cost = LeastSquareFunction::new(problem);
        let mut optimization = Problem::new(&cost, self.constraint, self.initial_value.clone());
        let mut end_criteria = EndCriteria::new(
            self.max_iterations,
            Some((self.max_iterations / 2).min(100)),
            eps,
            eps,
            Some(eps),
        )?;
        debug!(
            parameters = problem.size(),
            accuracy = eps,
            "starting least squares fit"
        );

        self.exit_flag = self.method.minimize(&mut optimization, &mut end_criteria)?;
        self.results = optimization.current_value().clone();
        self.residual_norm = match optimization.function_value() {
            Some(value) => value,
            None => cost.value(&self.results)?,
        };
        self.iterations = optimization.function_evaluation();
        debug!(
            exit_flag = ?self.exit_flag,
            residual_norm = self.residual_norm,
            "least squares fit finished"
        );
        Ok(&self.results)
    }

    pub fn results(&self) -> &DVector<f64> {
        &self.results
    }

    /// Sum of squared differences at the result.
    pub fn residual_norm(&self) -> f64 {
        self.residual_norm
    }

    /// Same as [`residual_norm`](Self::residual_norm).
    pub fn last_value(&self) -> f64 {
        self.residual_norm
    }

    /// Cost function evaluations used by the last fit.
    pub fn iterations_number(&self) -> usize {
        self.iterations
    }

    pub fn exit_flag(&self) -> EndCriteriaType {
        self.exit_flag
    }

    pub fn method(&self) -> &M {
        &self.method
    }
}
