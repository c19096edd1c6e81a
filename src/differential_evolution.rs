//! Population based global minimization.
//!
//! Every generation builds a mutant for each member from scaled differences
//! of (shuffled) population members, crosses the mutant with the member
//! coordinate by coordinate and evaluates the result. The best member ever
//! seen is returned.
//!
//! The random number generator is owned by the optimizer. Two runs with the
//! same configuration and seed produce identical results.
use nalgebra::DVector;
use rand::distributions::Open01;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::{EndCriteria, EndCriteriaType, Error, OptimizationMethod, Problem, Result};

mod config;

pub use config::{Configuration, CrossoverType, Strategy};

/// A population member and its cost. Failed evaluations cost `+inf`.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub values: DVector<f64>,
    pub cost: f64,
}

/// Differential evolution over the box given by the constraint bounds or
/// by the [`Configuration`] overrides.
///
/// The bounds must be finite. Stops when the best cost of a generation has
/// been stationary for more than
/// [`EndCriteria::max_stationary_state_iterations`] generations, or after
/// [`EndCriteria::max_iterations`] generations.
///
/// # Example
///
/// ```
/// use calibration_optim::differential_evolution::{Configuration, DifferentialEvolution};
/// use calibration_optim::{
///     BoundaryConstraint, CostFunction, EndCriteria, OptimizationMethod, Problem, Result,
/// };
/// use nalgebra::DVector;
///
/// struct Bowl;
///
/// impl CostFunction for Bowl {
///     fn value(&self, x: &DVector<f64>) -> Result<f64> {
///         Ok(x.iter().map(|v| (v - 0.5).powi(2)).sum())
///     }
/// }
///
/// let cost = Bowl;
/// let constraint = BoundaryConstraint::new(-2.0, 2.0)?;
/// let mut problem = Problem::new(&cost, &constraint, DVector::zeros(3));
/// let mut end_criteria = EndCriteria::new(500, Some(50), 1e-8, 1e-12, None)?;
/// let config = Configuration::default()
///     .with_population_members(30)
///     .with_stepsize_weight(0.5)
///     .with_seed(3);
/// DifferentialEvolution::new(config)?.minimize(&mut problem, &mut end_criteria)?;
/// assert!(problem.function_value().unwrap() < 1e-6);
/// # Ok::<(), calibration_optim::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct DifferentialEvolution<R = StdRng> {
    configuration: Configuration,
    rng: R,
    upper_bound: DVector<f64>,
    lower_bound: DVector<f64>,
    size_weights: DVector<f64>,
    crossover_probabilities: DVector<f64>,
    best_member_ever: Option<Candidate>,
}

impl DifferentialEvolution<StdRng> {
    /// Uses a [`StdRng`] seeded with [`Configuration::seed`].
    pub fn new(configuration: Configuration) -> Result<Self> {
        let rng = StdRng::seed_from_u64(configuration.seed);
        Self::with_rng(configuration, rng)
    }
}

impl<R: Rng> DifferentialEvolution<R> {
    pub fn with_rng(configuration: Configuration, rng: R) -> Result<Self> {
        configuration.validate()?;
        Ok(Self {
            configuration,
            rng,
            upper_bound: DVector::zeros(0),
            lower_bound: DVector::zeros(0),
            size_weights: DVector::zeros(0),
            crossover_probabilities: DVector::zeros(0),
            best_member_ever: None,
        })
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Best member found by the last `minimize`.
    pub fn best_member_ever(&self) -> Option<&Candidate> {
        self.best_member_ever.as_ref()
    }

    fn uniform(&mut self) -> f64 {
        self.rng.sample(Open01)
    }

    /// A random permutation of `0..len`.
    fn permutation(&mut self, len: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(&mut self.rng);
        indices
    }

    fn set_bounds(&mut self, problem: &Problem<'_>) -> Result<()> {
        let x = problem.current_value();
        let upper = match &self.configuration.upper_bound {
            Some(bound) => bound.clone(),
            None => problem.constraint().upper_bound(x),
        };
        let lower = match &self.configuration.lower_bound {
            Some(bound) => bound.clone(),
            None => problem.constraint().lower_bound(x),
        };
        if upper.len() != x.len() || lower.len() != x.len() {
            return Err(Error::InvalidArgument(format!(
                "bounds of size {} and {} for {} parameters",
                lower.len(),
                upper.len(),
                x.len()
            )));
        }
        let finite = upper
            .iter()
            .zip(lower.iter())
            .all(|(u, l)| u.is_finite() && l.is_finite() && (u - l).is_finite());
        if !finite {
            return Err(Error::InvalidArgument(
                "differential evolution needs finite bounds".into(),
            ));
        }
        self.upper_bound = upper;
        self.lower_bound = lower;
        Ok(())
    }

    fn initial_population(&mut self, problem: &mut Problem<'_>) -> Result<Vec<Candidate>> {
        let n = problem.current_value().len();
        if let Some(initial) = self.configuration.initial_population.clone() {
            return initial
                .into_iter()
                .map(|values| {
                    if values.len() != n {
                        return Err(Error::InvalidArgument(format!(
                            "initial population member of size {}, expected {}",
                            values.len(),
                            n
                        )));
                    }
                    if !problem.constraint().test(&values) {
                        return Err(Error::InfeasibleStart);
                    }
                    let cost = evaluate(problem, &values);
                    Ok(Candidate { values, cost })
                })
                .collect();
        }

        let first = problem.current_value().clone();
        if !problem.constraint().test(&first) {
            return Err(Error::InfeasibleStart);
        }
        let cost = evaluate(problem, &first);
        let mut population = vec![Candidate { values: first, cost }];
        for _ in 1..self.configuration.population_members {
            let mut values = DVector::zeros(n);
            for i in 0..n {
                let (l, u) = (self.lower_bound[i], self.upper_bound[i]);
                values[i] = l + (u - l) * self.uniform();
            }
            let cost = evaluate(problem, &values);
            population.push(Candidate { values, cost });
        }
        Ok(population)
    }

    fn adapt_size_weights(&mut self) {
        for i in 0..self.size_weights.len() {
            if self.uniform() < 0.1 {
                self.size_weights[i] = 0.1 + self.uniform() * 0.9;
            }
        }
    }

    fn adapt_crossover(&mut self) {
        for i in 0..self.crossover_probabilities.len() {
            if self.uniform() < 0.1 {
                self.crossover_probabilities[i] = self.uniform();
            }
        }
    }

    /// Mutants and mirror points, one per member.
    fn mutate(
        &mut self,
        old: &[Candidate],
        best: &DVector<f64>,
    ) -> (Vec<DVector<f64>>, Vec<DVector<f64>>) {
        let members = old.len();
        let n = best.len();
        let f = self.configuration.stepsize_weight;
        let v = |indices: &[usize], i: usize| &old[indices[i]].values;

        match self.configuration.strategy {
            Strategy::Rand1Standard => {
                let (p1, p2, p3) = (
                    self.permutation(members),
                    self.permutation(members),
                    self.permutation(members),
                );
                let mutants = (0..members)
                    .map(|i| v(&p3, i) + (v(&p1, i) - v(&p2, i)) * f)
                    .collect();
                (mutants, (0..members).map(|i| v(&p1, i).clone()).collect())
            }
            Strategy::BestMemberWithJitter => {
                let p1 = self.permutation(members);
                let mut mutants = Vec::with_capacity(members);
                for i in 0..members {
                    let jitter = DVector::from_fn(n, |_, _| 0.0001 * self.uniform() + f);
                    mutants.push(best + (v(&p1, i) - &old[i].values).component_mul(&jitter));
                }
                (mutants, vec![best.clone(); members])
            }
            Strategy::CurrentToBest2Diffs => {
                let (p1, p2) = (self.permutation(members), self.permutation(members));
                let mutants = (0..members)
                    .map(|i| {
                        let x = &old[i].values;
                        x + (best - x) * f + (v(&p2, i) - v(&p1, i)) * f
                    })
                    .collect();
                (mutants, (0..members).map(|i| v(&p1, i).clone()).collect())
            }
            Strategy::Rand1DiffWithPerVectorDither => {
                let (p1, p2, p3) = (
                    self.permutation(members),
                    self.permutation(members),
                    self.permutation(members),
                );
                let weights = DVector::from_fn(n, |_, _| (1.0 - f) * self.uniform() + f);
                let mutants = (0..members)
                    .map(|i| v(&p3, i) + (v(&p1, i) - v(&p2, i)).component_mul(&weights))
                    .collect();
                (mutants, (0..members).map(|i| v(&p1, i).clone()).collect())
            }
            Strategy::Rand1DiffWithDither => {
                let (p1, p2, p3) = (
                    self.permutation(members),
                    self.permutation(members),
                    self.permutation(members),
                );
                let weight = (1.0 - f) * self.uniform() + f;
                let mutants = (0..members)
                    .map(|i| v(&p3, i) + (v(&p1, i) - v(&p2, i)) * weight)
                    .collect();
                (mutants, (0..members).map(|i| v(&p1, i).clone()).collect())
            }
            Strategy::EitherOrWithOptimalRecombination => {
                let (p1, p2, p3) = (
                    self.permutation(members),
                    self.permutation(members),
                    self.permutation(members),
                );
                let mutants = if self.uniform() < 0.5 {
                    (0..members)
                        .map(|i| &old[i].values + (v(&p1, i) - v(&p2, i)) * f)
                        .collect()
                } else {
                    let k = 0.5 * (f + 1.0);
                    (0..members)
                        .map(|i| &old[i].values + (v(&p1, i) + v(&p2, i) - v(&p3, i) * 2.0) * k)
                        .collect()
                };
                (mutants, (0..members).map(|i| v(&p1, i).clone()).collect())
            }
            Strategy::Rand1SelfadaptiveWithRotation => {
                let (p1, p2) = (self.permutation(members), self.permutation(members));
                self.adapt_size_weights();
                let mut mutants = Vec::with_capacity(members);
                for i in 0..members {
                    if self.uniform() < 0.1 {
                        let mut rotated = best.clone();
                        rotated.as_mut_slice().shuffle(&mut self.rng);
                        mutants.push(rotated);
                    } else {
                        mutants.push(best + (v(&p1, i) - v(&p2, i)) * self.size_weights[i]);
                    }
                }
                (mutants, (0..members).map(|i| v(&p1, i).clone()).collect())
            }
        }
    }

    /// Cross mutants with the old generation, reflect out of bound
    /// coordinates towards the mirror points and evaluate.
    fn crossover(
        &mut self,
        problem: &mut Problem<'_>,
        old: &[Candidate],
        mutants: Vec<DVector<f64>>,
        mirrors: &[DVector<f64>],
    ) -> Vec<Candidate> {
        if self.configuration.crossover_is_adaptive {
            self.adapt_crossover();
        }
        let n = self.crossover_probabilities.len();
        let crossover_type = self.configuration.crossover_type;
        let probabilities = self
            .crossover_probabilities
            .map(|cr| crossover_type.mutation_probability(cr, n));
        let masks: Vec<Vec<bool>> = (0..old.len())
            .map(|_| (0..n).map(|j| self.uniform() < probabilities[j]).collect())
            .collect();

        let mut next = Vec::with_capacity(old.len());
        for (i, (mutant, mask)) in mutants.into_iter().zip(masks).enumerate() {
            let mut values = mutant;
            for j in 0..n {
                if !mask[j] {
                    values[j] = old[i].values[j];
                }
            }
            if self.configuration.apply_bounds {
                for j in 0..n {
                    let (l, u) = (self.lower_bound[j], self.upper_bound[j]);
                    if values[j] > u {
                        values[j] = u + self.uniform() * (mirrors[i][j] - u);
                    }
                    if values[j] < l {
                        values[j] = l + self.uniform() * (mirrors[i][j] - l);
                    }
                }
            }
            let cost = evaluate(problem, &values);
            let candidate = Candidate { values, cost };
            if self.configuration.greedy_selection && old[i].cost < candidate.cost {
                next.push(old[i].clone());
            } else {
                next.push(candidate);
            }
        }
        next
    }

    fn next_generation(
        &mut self,
        problem: &mut Problem<'_>,
        population: &mut Vec<Candidate>,
        best: &DVector<f64>,
    ) {
        let (mutants, mirrors) = self.mutate(population, best);
        *population = self.crossover(problem, population, mutants, &mirrors);
    }
}

/// Cost at `x`, `+inf` if the cost function fails or is not finite.
fn evaluate(problem: &mut Problem<'_>, x: &DVector<f64>) -> f64 {
    match problem.value(x) {
        Ok(cost) if cost.is_finite() => cost,
        Ok(cost) => {
            warn!(cost, "non-finite cost, treating the candidate as infinitely bad");
            f64::INFINITY
        }
        Err(error) => {
            warn!(%error, "cost function failed, treating the candidate as infinitely bad");
            f64::INFINITY
        }
    }
}

/// Swap the cheapest member to the front. The first of equal costs wins.
fn move_best_to_front(population: &mut [Candidate]) {
    let mut best = 0;
    for (i, candidate) in population.iter().enumerate().skip(1) {
        if candidate.cost < population[best].cost {
            best = i;
        }
    }
    population.swap(0, best);
}

impl<R: Rng> OptimizationMethod for DifferentialEvolution<R> {
    fn minimize(
        &mut self,
        problem: &mut Problem<'_>,
        end_criteria: &mut EndCriteria,
    ) -> Result<EndCriteriaType> {
        problem.reset();
        end_criteria.reset();
        let n = problem.current_value().len();
        if n == 0 {
            return Err(Error::InvalidArgument("cannot minimize over zero parameters".into()));
        }
        self.set_bounds(problem)?;

        let mut population = self.initial_population(problem)?;
        self.size_weights =
            DVector::from_element(population.len(), self.configuration.stepsize_weight);
        self.crossover_probabilities =
            DVector::from_element(n, self.configuration.crossover_probability);
        debug!(
            dimension = n,
            members = population.len(),
            strategy = ?self.configuration.strategy,
            crossover = ?self.configuration.crossover_type,
            "starting differential evolution"
        );

        move_best_to_front(&mut population);
        let mut best = population[0].clone();
        let mut previous_cost = best.cost;
        let mut generation = 0;
        while !end_criteria.check_max_iterations(generation).0 {
            generation += 1;
            self.next_generation(problem, &mut population, &best.values);
            move_best_to_front(&mut population);
            if population[0].cost < best.cost {
                best = population[0].clone();
            }
            let cost = population[0].cost;
            trace!(generation, cost, best = best.cost, "generation");
            if end_criteria
                .check_stationary_function_value(previous_cost, cost)
                .0
            {
                break;
            }
            previous_cost = cost;
        }

        problem.set_current_value(best.values.clone());
        problem.set_function_value(best.cost);
        debug!(
            generation,
            cost = best.cost,
            outcome = ?end_criteria.outcome(),
            "differential evolution finished"
        );
        self.best_member_ever = Some(best);
        Ok(end_criteria.outcome())
    }
}
