use nalgebra::DVector;
use tracing::trace;

use super::{finish, starting_point, trial, LineSearch, LineSearchOutcome};
use crate::{EndCriteria, Problem, Result};

/// Backtracking line search with the Armijo sufficient decrease rule.
///
/// A step `t` is accepted once `f(x + t d) - f(x) <= -alpha t g·d` holds for
/// `t` but not for `t / beta`. Otherwise `t` shrinks by `beta`, at most
/// [`EndCriteria::max_iterations`] times.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmijoLineSearch {
    epsilon: f64,
    alpha: f64,
    beta: f64,
}

impl ArmijoLineSearch {
    /// # Panics
    ///
    /// Panics unless `0 < alpha < 0.5` and `0 < beta < 1`.
    pub fn new(epsilon: f64, alpha: f64, beta: f64) -> Self {
        assert!(
            alpha > 0.0 && alpha < 0.5,
            "alpha must be in (0, 0.5), got {}",
            alpha
        );
        assert!(beta > 0.0 && beta < 1.0, "beta must be in (0, 1), got {}", beta);
        Self {
            epsilon,
            alpha,
            beta,
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
}

impl Default for ArmijoLineSearch {
    fn default() -> Self {
        Self::new(1e-8, 0.05, 0.65)
    }
}

impl LineSearch for ArmijoLineSearch {
    fn search(
        &mut self,
        problem: &mut Problem<'_>,
        end_criteria: &EndCriteria,
        direction: &DVector<f64>,
        initial_step: f64,
    ) -> Result<LineSearchOutcome> {
        let (q0, slope) = starting_point(problem, direction)?;
        let (mut x, mut step, mut qt) = trial(problem, direction, initial_step)?;

        let mut max_iterations_hit = false;
        if qt - q0 > -self.alpha * step * slope {
            let mut iteration = 0;
            loop {
                let qt_old = qt;
                (x, step, qt) = trial(problem, direction, step * self.beta)?;
                trace!(iteration, step, value = qt, "armijo backtrack");
                max_iterations_hit = iteration >= end_criteria.max_iterations();
                iteration += 1;

                let insufficient = qt - q0 > -self.alpha * step * slope;
                let larger_step_also_fine =
                    qt_old - q0 <= -self.alpha * step * slope / self.beta;
                if !(insufficient || larger_step_also_fine) || max_iterations_hit {
                    break;
                }
            }
        }

        finish(problem, x, step, qt, slope, !max_iterations_hit)
    }
}
