//! Nelder-Mead downhill simplex.
use nalgebra::DVector;
use tracing::{debug, trace};

use crate::{EndCriteria, EndCriteriaType, Error, OptimizationMethod, Problem, Result};

/// Derivative free minimization with a simplex of `n + 1` vertices.
///
/// The initial simplex is the starting point plus one vertex per coordinate
/// direction, `lambda` away from it (shortened by the constraint if needed).
/// The worst vertex is reflected through the centroid of the others, then the
/// move is expanded or contracted depending on how well the reflection did.
/// If nothing helps, the whole simplex shrinks towards the best vertex.
///
/// Stops when the mean distance of the vertices to their centroid drops below
/// [`EndCriteria::root_epsilon`], when the constraint leaves no room to move,
/// or when the iteration budget is used up.
#[derive(Debug, Clone, PartialEq)]
pub struct Simplex {
    lambda: f64,
    vertices: Vec<DVector<f64>>,
    values: Vec<f64>,
    sum: DVector<f64>,
}

impl Simplex {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda,
            vertices: Vec::new(),
            values: Vec::new(),
            sum: DVector::zeros(0),
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Vertices of the simplex left by the last `minimize`.
    pub fn vertices(&self) -> &[DVector<f64>] {
        &self.vertices
    }

    /// Function values at [`vertices`](#method.vertices).
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Try the point `sum (1 - factor) / n - v_hi ((1 - factor) / n - factor)`,
    /// halving `factor` until it is feasible. Replaces the highest vertex if
    /// the trial point is better.
    fn extrapolate(&mut self, problem: &mut Problem<'_>, highest: usize, factor: &mut f64) -> Result<f64> {
        let dimension = (self.values.len() - 1) as f64;
        let mut trial;
        loop {
            let factor1 = (1.0 - *factor) / dimension;
            let factor2 = factor1 - *factor;
            trial = &self.sum * factor1 - &self.vertices[highest] * factor2;
            *factor *= 0.5;
            if problem.constraint().test(&trial) || factor.abs() <= f64::EPSILON {
                break;
            }
        }
        if factor.abs() <= f64::EPSILON {
            return Ok(self.values[highest]);
        }
        *factor *= 2.0;

        let value = problem.value(&trial)?;
        if value < self.values[highest] {
            self.values[highest] = value;
            self.sum += &trial - &self.vertices[highest];
            self.vertices[highest] = trial;
        }
        Ok(value)
    }

    fn lowest_highest_next_highest(&self) -> (usize, usize, usize) {
        let values = &self.values;
        let mut lowest = 0;
        let (mut highest, mut next_highest) = if values[0] < values[1] { (1, 0) } else { (0, 1) };
        for i in 1..values.len() {
            if values[i] > values[highest] {
                next_highest = highest;
                highest = i;
            } else if values[i] > values[next_highest] && i != highest {
                next_highest = i;
            }
            if values[i] < values[lowest] {
                lowest = i;
            }
        }
        (lowest, highest, next_highest)
    }

    fn finish(&self, problem: &mut Problem<'_>, lowest: usize) {
        problem.set_current_value(self.vertices[lowest].clone());
        problem.set_function_value(self.values[lowest]);
    }
}

/// Mean distance of the vertices to their centroid.
pub(crate) fn simplex_size(vertices: &[DVector<f64>]) -> f64 {
    let count = vertices.len() as f64;
    let center = vertices
        .iter()
        .fold(DVector::zeros(vertices[0].len()), |acc, v| acc + v)
        / count;
    vertices.iter().map(|v| (v - &center).norm()).sum::<f64>() / count
}

/// The initial simplex around `x`.
pub(crate) fn initial_vertices(
    problem: &Problem<'_>,
    x: &DVector<f64>,
    lambda: f64,
) -> Result<Vec<DVector<f64>>> {
    let n = x.len();
    let mut vertices = vec![x.clone(); n + 1];
    for (i, vertex) in vertices.iter_mut().skip(1).enumerate() {
        let mut direction = DVector::zeros(n);
        direction[i] = 1.0;
        problem.constraint().update(vertex, &direction, lambda)?;
    }
    Ok(vertices)
}

impl OptimizationMethod for Simplex {
    fn minimize(
        &mut self,
        problem: &mut Problem<'_>,
        end_criteria: &mut EndCriteria,
    ) -> Result<EndCriteriaType> {
        problem.reset();
        end_criteria.reset();
        let x = problem.current_value().clone();
        if !problem.constraint().test(&x) {
            return Err(Error::InfeasibleStart);
        }
        if x.is_empty() {
            return Err(Error::InvalidArgument("cannot minimize over zero parameters".into()));
        }
        let n = x.len();
        debug!(dimension = n, lambda = self.lambda, "starting simplex");

        self.vertices = initial_vertices(problem, &x, self.lambda)?;
        self.values = Vec::with_capacity(n + 1);
        for i in 0..=n {
            let value = if problem.constraint().test(&self.vertices[i]) {
                problem.value(&self.vertices[i])?
            } else {
                f64::MAX
            };
            self.values.push(value);
        }

        let mut iteration = 0;
        loop {
            self.sum = self
                .vertices
                .iter()
                .fold(DVector::zeros(n), |acc, v| acc + v);
            let (lowest, highest, next_highest) = self.lowest_highest_next_highest();

            let size = simplex_size(&self.vertices);
            iteration += 1;
            trace!(iteration, size, lowest = self.values[lowest], "simplex iteration");
            if size < end_criteria.root_epsilon() || end_criteria.check_max_iterations(iteration).0 {
                end_criteria.mark(EndCriteriaType::StationaryPoint);
                end_criteria.check_max_iterations(iteration);
                self.finish(problem, lowest);
                debug!(iteration, value = self.values[lowest], outcome = ?end_criteria.outcome(), "simplex finished");
                return Ok(end_criteria.outcome());
            }

            let mut factor = -1.0;
            let value = self.extrapolate(problem, highest, &mut factor)?;
            if value <= self.values[lowest] && factor == -1.0 {
                factor = 2.0;
                self.extrapolate(problem, highest, &mut factor)?;
            } else if factor.abs() > f64::EPSILON && value >= self.values[next_highest] {
                let saved = self.values[highest];
                factor = 0.5;
                let value = self.extrapolate(problem, highest, &mut factor)?;
                if value >= saved && factor.abs() > f64::EPSILON {
                    for i in 0..=n {
                        if i != lowest {
                            self.vertices[i] = (&self.vertices[i] + &self.vertices[lowest]) * 0.5;
                            self.values[i] = problem.value(&self.vertices[i])?;
                        }
                    }
                }
            }

            if factor.abs() <= f64::EPSILON {
                debug!(iteration, "simplex cannot move inside the constraint");
                end_criteria.mark(EndCriteriaType::StationaryFunctionValue);
                self.finish(problem, lowest);
                return Ok(EndCriteriaType::StationaryFunctionValue);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundaryConstraint, Constraint, CostFunction, NoConstraint};
    use approx::assert_relative_eq;

    struct Bowl;

    impl CostFunction for Bowl {
        fn value(&self, x: &DVector<f64>) -> Result<f64> {
            Ok((x[0] - 1.0).powi(2) + 2.0 * (x[1] + 2.0).powi(2))
        }
    }

    #[test]
    fn test_simplex_size() {
        let vertices = vec![
            DVector::from_vec(vec![1.0, 0.0]),
            DVector::from_vec(vec![-1.0, 0.0]),
        ];
        assert_relative_eq!(simplex_size(&vertices), 1.0);
    }

    #[test]
    fn test_converges_on_bowl() {
        let (cost, constraint) = (Bowl, NoConstraint);
        let mut problem = Problem::new(&cost, &constraint, DVector::zeros(2));
        let mut end_criteria = EndCriteria::new(1000, None, 1e-10, 1e-10, None).unwrap();
        let mut simplex = Simplex::new(0.5);
        let outcome = simplex.minimize(&mut problem, &mut end_criteria).unwrap();
        assert_eq!(outcome, EndCriteriaType::StationaryPoint);
        assert_relative_eq!(
            problem.current_value(),
            &DVector::from_vec(vec![1.0, -2.0]),
            epsilon = 1e-6
        );
        assert_eq!(simplex.vertices().len(), 3);
        assert_eq!(problem.function_value(), simplex.values().iter().copied().reduce(f64::min));
    }

    #[test]
    fn test_stays_inside_boundary() {
        let cost = Bowl;
        let constraint = BoundaryConstraint::new(-1.0, 0.5).unwrap();
        let mut problem = Problem::new(&cost, &constraint, DVector::zeros(2));
        let mut end_criteria = EndCriteria::new(1000, None, 1e-10, 1e-10, None).unwrap();
        Simplex::new(0.25)
            .minimize(&mut problem, &mut end_criteria)
            .unwrap();
        let x = problem.current_value();
        assert!(constraint.test(x));
        assert_relative_eq!(x[0], 0.5, epsilon = 1e-4);
        assert_relative_eq!(x[1], -1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_rejects_infeasible_start() {
        let cost = Bowl;
        let constraint = BoundaryConstraint::new(1.0, 2.0).unwrap();
        let mut problem = Problem::new(&cost, &constraint, DVector::zeros(2));
        let mut end_criteria = EndCriteria::new(100, None, 1e-10, 1e-10, None).unwrap();
        assert!(matches!(
            Simplex::new(0.1).minimize(&mut problem, &mut end_criteria),
            Err(Error::InfeasibleStart)
        ));
    }
}
