//! Gradient based methods sharing one line search driven iteration.
//!
//! [`LineSearchBasedMethod`] runs the loop: search along the current
//! direction, then ask a [`DirectionStrategy`] for the next direction.
//! Steepest descent, conjugate gradient and BFGS differ only in their
//! strategy.
use nalgebra::DVector;
use tracing::{debug, trace, warn};

use crate::line_search::{ArmijoLineSearch, GoldsteinLineSearch, LineSearch};
use crate::{EndCriteria, EndCriteriaType, Error, OptimizationMethod, Problem, Result};

mod bfgs;
mod conjugate_gradient;
mod steepest_descent;

pub use bfgs::BfgsDirection;
pub use conjugate_gradient::{ConjugateGradientDirection, ConjugateGradientFormula};
pub use steepest_descent::SteepestDescentDirection;

/// A point visited by the iteration together with its gradient.
#[derive(Debug, Clone, Copy)]
pub struct Iterate<'a> {
    pub x: &'a DVector<f64>,
    pub gradient: &'a DVector<f64>,
    pub gradient_norm_squared: f64,
}

/// Computes the next search direction from the last accepted step.
pub trait DirectionStrategy {
    fn name(&self) -> &'static str;

    /// Forget accumulated curvature information.
    fn reset(&mut self, _dimension: usize) {}

    /// First trial step of the next line search along `direction`, given the
    /// step accepted by the previous one and the gradient at the current point.
    fn initial_step(
        &self,
        previous_step: f64,
        _gradient: &DVector<f64>,
        _direction: &DVector<f64>,
    ) -> f64 {
        previous_step
    }

    fn next_direction(
        &mut self,
        previous: Iterate<'_>,
        current: Iterate<'_>,
        direction: &DVector<f64>,
    ) -> DVector<f64>;
}

/// A descent method: a [`DirectionStrategy`] plus a [`LineSearch`].
///
/// The iteration stops when the relative change of the function value
/// `2 |f_new - f_old| / (|f_new| + |f_old| + eps)` drops below
/// [`EndCriteria::function_epsilon`] or the iteration budget is used up.
/// A failing line search stops it as well; the last accepted point is kept.
///
/// # Example
///
/// ```
/// use calibration_optim::{
///     CostFunction, EndCriteria, NoConstraint, OptimizationMethod, Problem, Result,
///     SteepestDescent,
/// };
/// use nalgebra::DVector;
///
/// struct Bowl;
///
/// impl CostFunction for Bowl {
///     fn value(&self, x: &DVector<f64>) -> Result<f64> {
///         Ok((x[0] - 1.0).powi(2) + 2.0 * (x[1] + 2.0).powi(2))
///     }
/// }
///
/// let (cost, constraint) = (Bowl, NoConstraint);
/// let mut problem = Problem::new(&cost, &constraint, DVector::zeros(2));
/// let mut end_criteria = EndCriteria::new(1000, None, 1e-8, 1e-12, None)?;
/// let mut method: SteepestDescent = SteepestDescent::default();
/// method.minimize(&mut problem, &mut end_criteria)?;
/// assert!((problem.current_value()[0] - 1.0).abs() < 1e-3);
/// assert!((problem.current_value()[1] + 2.0).abs() < 1e-3);
/// # Ok::<(), calibration_optim::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct LineSearchBasedMethod<S, L = ArmijoLineSearch> {
    strategy: S,
    line_search: L,
}

pub type SteepestDescent<L = ArmijoLineSearch> = LineSearchBasedMethod<SteepestDescentDirection, L>;
pub type ConjugateGradient<L = GoldsteinLineSearch> =
    LineSearchBasedMethod<ConjugateGradientDirection, L>;
pub type Bfgs<L = ArmijoLineSearch> = LineSearchBasedMethod<BfgsDirection, L>;

impl<S: DirectionStrategy, L: LineSearch> LineSearchBasedMethod<S, L> {
    pub fn new(strategy: S, line_search: L) -> Self {
        Self {
            strategy,
            line_search,
        }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn line_search(&self) -> &L {
        &self.line_search
    }
}

impl<S: DirectionStrategy + Default, L: LineSearch + Default> Default
    for LineSearchBasedMethod<S, L>
{
    fn default() -> Self {
        Self::new(S::default(), L::default())
    }
}

impl<S: DirectionStrategy, L: LineSearch> OptimizationMethod for LineSearchBasedMethod<S, L> {
    fn minimize(
        &mut self,
        problem: &mut Problem<'_>,
        end_criteria: &mut EndCriteria,
    ) -> Result<EndCriteriaType> {
        problem.reset();
        end_criteria.reset();

        let mut x = problem.current_value().clone();
        if !problem.constraint().test(&x) {
            return Err(Error::InfeasibleStart);
        }
        let dimension = x.len();
        let mut gradient = DVector::zeros(dimension);
        let mut value = problem.value_and_gradient(&mut gradient, &x)?;
        let mut gradient_norm_squared = gradient.norm_squared();
        problem.set_function_value(value);
        problem.set_gradient_norm_value(gradient_norm_squared);
        debug!(
            method = self.strategy.name(),
            dimension, value, "starting line search based minimization"
        );

        self.strategy.reset(dimension);
        let mut direction = -&gradient;
        let mut step = 1.0;
        let mut iteration = 0;

        loop {
            let initial_step = self.strategy.initial_step(step, &gradient, &direction);
            let outcome = self
                .line_search
                .search(problem, end_criteria, &direction, initial_step)?;

            if !outcome.succeeded {
                warn!(
                    method = self.strategy.name(),
                    iteration, "line search failed, keeping the last accepted point"
                );
                if !end_criteria.outcome().is_terminal() {
                    end_criteria.mark(EndCriteriaType::Unknown);
                }
                problem.set_current_value(x);
                problem.set_function_value(value);
                problem.set_gradient_norm_value(gradient_norm_squared);
                break;
            }
            step = outcome.step;

            let mut next_direction = self.strategy.next_direction(
                Iterate {
                    x: &x,
                    gradient: &gradient,
                    gradient_norm_squared,
                },
                Iterate {
                    x: &outcome.x,
                    gradient: &outcome.gradient,
                    gradient_norm_squared: outcome.gradient_norm_squared,
                },
                &direction,
            );
            if outcome.gradient.dot(&next_direction) >= 0.0 {
                // not a descent direction
                self.strategy.reset(dimension);
                next_direction = -&outcome.gradient;
            }

            let previous_value = value;
            x = outcome.x;
            gradient = outcome.gradient;
            gradient_norm_squared = outcome.gradient_norm_squared;
            value = outcome.value;
            direction = next_direction;
            problem.set_current_value(x.clone());
            problem.set_function_value(value);
            problem.set_gradient_norm_value(gradient_norm_squared);

            let relative_change = 2.0 * (value - previous_value).abs()
                / (value.abs() + previous_value.abs() + f64::EPSILON);
            trace!(iteration, step, value, relative_change, "descent step");

            if relative_change < end_criteria.function_epsilon()
                || end_criteria.check_max_iterations(iteration).0
            {
                end_criteria.mark(EndCriteriaType::StationaryFunctionValue);
                end_criteria.check_max_iterations(iteration);
                break;
            }
            iteration += 1;
        }

        debug!(
            method = self.strategy.name(),
            iteration,
            value,
            outcome = ?end_criteria.outcome(),
            "line search based minimization finished"
        );
        Ok(end_criteria.outcome())
    }
}
