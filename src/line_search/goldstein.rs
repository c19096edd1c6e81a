use nalgebra::DVector;
use tracing::trace;

use super::{finish, starting_point, trial, LineSearch, LineSearchOutcome};
use crate::{EndCriteria, Problem, Result};

/// Bracketing line search with the Goldstein conditions.
///
/// Accepts `t` when `-beta t g·d <= f(x + t d) - f(x) <= -alpha t g·d`.
/// Steps that decrease too little shrink the right end of the bracket,
/// steps that decrease too much grow the left end. While no right end is
/// known the step is multiplied by `extrapolation`, otherwise the bracket is
/// bisected.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GoldsteinLineSearch {
    epsilon: f64,
    alpha: f64,
    beta: f64,
    extrapolation: f64,
}

impl GoldsteinLineSearch {
    /// # Panics
    ///
    /// Panics unless `0 < alpha < beta < 1` and `extrapolation > 1`.
    pub fn new(epsilon: f64, alpha: f64, beta: f64, extrapolation: f64) -> Self {
        assert!(
            alpha > 0.0 && alpha < beta && beta < 1.0,
            "expected 0 < alpha < beta < 1, got alpha = {}, beta = {}",
            alpha,
            beta
        );
        assert!(
            extrapolation > 1.0,
            "extrapolation must be greater than one, got {}",
            extrapolation
        );
        Self {
            epsilon,
            alpha,
            beta,
            extrapolation,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn extrapolation(&self) -> f64 {
        self.extrapolation
    }
}

impl Default for GoldsteinLineSearch {
    fn default() -> Self {
        Self::new(1e-8, 0.05, 0.65, 1.5)
    }
}

impl LineSearch for GoldsteinLineSearch {
    fn search(
        &mut self,
        problem: &mut Problem<'_>,
        end_criteria: &EndCriteria,
        direction: &DVector<f64>,
        initial_step: f64,
    ) -> Result<LineSearchOutcome> {
        let (q0, slope) = starting_point(problem, direction)?;
        let (mut x, mut step, mut qt) = trial(problem, direction, initial_step)?;

        let (mut left, mut right) = (0.0, 0.0);
        let mut iteration = 0;
        let mut max_iterations_hit = false;
        loop {
            let decrease = qt - q0;
            let too_short = decrease < -self.beta * step * slope;
            let too_long = decrease > -self.alpha * step * slope;
            if !(too_short || too_long) {
                break;
            }
            if too_long {
                right = step;
            } else {
                left = step;
            }
            let next = if right < self.epsilon {
                step * self.extrapolation
            } else {
                0.5 * (left + right)
            };

            (x, step, qt) = trial(problem, direction, next)?;
            trace!(iteration, step, left, right, value = qt, "goldstein bracket");
            max_iterations_hit = iteration >= end_criteria.max_iterations();
            iteration += 1;
            if max_iterations_hit {
                break;
            }
        }

        finish(problem, x, step, qt, slope, !max_iterations_hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CostFunction, NoConstraint, PositiveConstraint};
    use approx::assert_relative_eq;

    struct Square {
        center: f64,
    }

    impl CostFunction for Square {
        fn value(&self, x: &DVector<f64>) -> Result<f64> {
            Ok((x[0] - self.center).powi(2))
        }

        fn gradient(&self, gradient: &mut DVector<f64>, x: &DVector<f64>) -> Result<()> {
            gradient[0] = 2.0 * (x[0] - self.center);
            Ok(())
        }
    }

    #[test]
    fn test_bisects_overlong_step() {
        let (cost, constraint) = (Square { center: 0.0 }, NoConstraint);
        let mut problem = Problem::new(&cost, &constraint, DVector::from_element(1, 1.0));
        let end_criteria = EndCriteria::new(100, None, 1e-8, 1e-8, None).unwrap();
        let direction = DVector::from_element(1, -2.0);

        let outcome = GoldsteinLineSearch::default()
            .search(&mut problem, &end_criteria, &direction, 1.0)
            .unwrap();
        assert!(outcome.succeeded);
        assert_relative_eq!(outcome.step, 0.5);
        assert_relative_eq!(outcome.x[0], 0.0);
        assert_relative_eq!(outcome.gradient_norm_squared, 0.0);
    }

    #[test]
    fn test_extrapolates_short_step() {
        let (cost, constraint) = (Square { center: 0.0 }, NoConstraint);
        let mut problem = Problem::new(&cost, &constraint, DVector::from_element(1, 1.0));
        let end_criteria = EndCriteria::new(100, None, 1e-8, 1e-8, None).unwrap();
        let direction = DVector::from_element(1, -2.0);

        let outcome = GoldsteinLineSearch::default()
            .search(&mut problem, &end_criteria, &direction, 0.01)
            .unwrap();
        assert!(outcome.succeeded);
        assert!(outcome.step > 0.01);
        let decrease = outcome.value - 1.0;
        assert!(decrease <= -0.05 * outcome.step * outcome.slope);
        assert!(decrease >= -0.65 * outcome.step * outcome.slope);
    }

    #[test]
    fn test_extrapolation_stays_feasible() {
        let cost = Square { center: -5.0 };
        let constraint = PositiveConstraint;
        let mut problem = Problem::new(&cost, &constraint, DVector::from_element(1, 1.0));
        let end_criteria = EndCriteria::new(50, None, 1e-8, 1e-8, None).unwrap();
        let direction = DVector::from_element(1, -12.0);

        let outcome = GoldsteinLineSearch::default()
            .search(&mut problem, &end_criteria, &direction, 0.01)
            .unwrap();
        assert!(outcome.x[0] > 0.0);
    }
}
