//! Step length selection along a search direction.
//!
//! A line search starts from [`Problem::current_value`] and walks along a
//! direction `d`. Every trial point is produced by [`Constraint::update`],
//! so only feasible points are ever evaluated.
//!
//! [`Constraint::update`]: crate::Constraint::update
use nalgebra::DVector;

use crate::{EndCriteria, Problem, Result};

mod armijo;
mod goldstein;

pub use armijo::ArmijoLineSearch;
pub use goldstein::GoldsteinLineSearch;

/// Result of one line search.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSearchOutcome {
    /// The accepted step length.
    pub step: f64,
    /// The trial point for `step`.
    pub x: DVector<f64>,
    /// Cost function value at `x`.
    pub value: f64,
    /// Gradient at `x`.
    pub gradient: DVector<f64>,
    /// Squared norm of `gradient`.
    pub gradient_norm_squared: f64,
    /// Directional derivative `-g·d` at the starting point.
    pub slope: f64,
    /// `false` if the search ran out of iterations before the acceptance
    /// rule was met.
    pub succeeded: bool,
}

pub trait LineSearch {
    /// Search along `direction`, starting with step `initial_step`.
    ///
    /// The current value of `problem` is the starting point. Uses the stored
    /// function value and gradient norm of `problem` when they are set.
    /// At most [`EndCriteria::max_iterations`] trial steps follow the first
    /// one. An unsuccessful search is reported through
    /// [`LineSearchOutcome::succeeded`], `end_criteria` is only read.
    ///
    /// # Errors
    ///
    /// Fails if the cost function fails or no feasible trial point exists.
    fn search(
        &mut self,
        problem: &mut Problem<'_>,
        end_criteria: &EndCriteria,
        direction: &DVector<f64>,
        initial_step: f64,
    ) -> Result<LineSearchOutcome>;
}

/// Starting value and slope shared by both line searches.
fn starting_point(problem: &mut Problem<'_>, direction: &DVector<f64>) -> Result<(f64, f64)> {
    let x = problem.current_value().clone();
    let mut gradient = DVector::zeros(x.len());
    let q0 = match problem.function_value() {
        Some(value) => {
            problem.gradient(&mut gradient, &x)?;
            value
        }
        None => problem.value_and_gradient(&mut gradient, &x)?,
    };
    Ok((q0, -gradient.dot(direction)))
}

/// Move from the current value by `step * direction` and evaluate.
fn trial(
    problem: &mut Problem<'_>,
    direction: &DVector<f64>,
    step: f64,
) -> Result<(DVector<f64>, f64, f64)> {
    let mut x = problem.current_value().clone();
    let step = problem.constraint().update(&mut x, direction, step)?;
    let value = problem.value(&x)?;
    Ok((x, step, value))
}

fn finish(
    problem: &mut Problem<'_>,
    x: DVector<f64>,
    step: f64,
    value: f64,
    slope: f64,
    succeeded: bool,
) -> Result<LineSearchOutcome> {
    let mut gradient = DVector::zeros(x.len());
    problem.gradient(&mut gradient, &x)?;
    let gradient_norm_squared = gradient.norm_squared();
    Ok(LineSearchOutcome {
        step,
        x,
        value,
        gradient,
        gradient_norm_squared,
        slope,
        succeeded,
    })
}
