//! Simulated annealing on a Nelder-Mead simplex.
use nalgebra::DVector;
use rand::distributions::Open01;
use rand::Rng;
use tracing::{debug, trace};

use crate::simplex::{initial_vertices, simplex_size};
use crate::{EndCriteria, EndCriteriaType, Error, OptimizationMethod, Problem, Result};

/// How the temperature decreases.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoolingSchedule {
    /// `T *= 1 - epsilon` after every `m` simplex moves.
    ConstantFactor { epsilon: f64, m: usize },
    /// `T = T0 (1 - k / budget)^alpha` after every move, `0` once `k` exceeds
    /// the budget.
    ConstantBudget { budget: usize, alpha: f64 },
}

/// Simplex moves with thermal noise.
///
/// Vertex values are perturbed by `-T ln(U)`, `U` uniform in `(0, 1)`, before
/// the vertices are ranked, and trial values are perturbed the other way
/// before they are compared. This lets the simplex climb out of local minima
/// while the temperature is high. The returned point is the best one ever
/// evaluated, judged by the unperturbed values.
///
/// Stops when the simplex size falls below [`EndCriteria::root_epsilon`] for
/// long enough or the iteration budget is spent. Iterations count cost
/// evaluations: one for a plain reflection, two for a reflection followed by
/// an expansion or contraction, and `n` more for a shrink.
pub struct SimulatedAnnealing<R> {
    rng: R,
    lambda: f64,
    initial_temperature: f64,
    schedule: CoolingSchedule,
}

/// Working state of one run.
struct Annealer<'r, R> {
    rng: &'r mut R,
    vertices: Vec<DVector<f64>>,
    values: Vec<f64>,
    sum: DVector<f64>,
    /// `-T`
    tt: f64,
    highest: usize,
    highest_noisy: f64,
    best: DVector<f64>,
    best_value: f64,
}

impl<R: Rng> SimulatedAnnealing<R> {
    pub fn constant_factor(
        rng: R,
        lambda: f64,
        initial_temperature: f64,
        epsilon: f64,
        m: usize,
    ) -> Self {
        Self {
            rng,
            lambda,
            initial_temperature,
            schedule: CoolingSchedule::ConstantFactor { epsilon, m },
        }
    }

    pub fn constant_budget(
        rng: R,
        lambda: f64,
        initial_temperature: f64,
        budget: usize,
        alpha: f64,
    ) -> Self {
        Self {
            rng,
            lambda,
            initial_temperature,
            schedule: CoolingSchedule::ConstantBudget { budget, alpha },
        }
    }

    pub fn schedule(&self) -> CoolingSchedule {
        self.schedule
    }

    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }
}

impl CoolingSchedule {
    /// Temperature after cooling `temperature` at `iteration`.
    fn cool(self, initial_temperature: f64, temperature: f64, iteration: usize) -> f64 {
        match self {
            CoolingSchedule::ConstantFactor { epsilon, .. } => temperature * (1.0 - epsilon),
            CoolingSchedule::ConstantBudget { budget, alpha } => {
                if iteration <= budget {
                    initial_temperature * (1.0 - iteration as f64 / budget as f64).powf(alpha)
                } else {
                    0.0
                }
            }
        }
    }

    fn moves_per_temperature(self) -> usize {
        match self {
            CoolingSchedule::ConstantFactor { m, .. } => m,
            CoolingSchedule::ConstantBudget { .. } => 1,
        }
    }
}

/// Cost at `x`, `f64::MAX` where infeasible or NaN.
fn evaluate(problem: &mut Problem<'_>, x: &DVector<f64>) -> Result<f64> {
    if !problem.constraint().test(x) {
        return Ok(f64::MAX);
    }
    let value = problem.value(x)?;
    Ok(if value.is_nan() { f64::MAX } else { value })
}

impl<R: Rng> Annealer<'_, R> {
    fn noise(&mut self) -> f64 {
        let u: f64 = self.rng.sample(Open01);
        self.tt * u.ln()
    }

    fn record(&mut self, x: &DVector<f64>, value: f64) {
        if value < f64::MAX && value <= self.best_value {
            self.best_value = value;
            self.best = x.clone();
        }
    }

    /// Try a move of the highest vertex by `factor` and return the perturbed
    /// trial value.
    fn try_move(&mut self, problem: &mut Problem<'_>, factor: f64) -> Result<f64> {
        let n = self.sum.len() as f64;
        let factor1 = (1.0 - factor) / n;
        let factor2 = factor1 - factor;
        let trial = &self.sum * factor1 - &self.vertices[self.highest] * factor2;

        let value = evaluate(problem, &trial)?;
        self.record(&trial, value);
        let noisy = value - self.noise();
        if noisy < self.highest_noisy {
            self.values[self.highest] = value;
            self.sum += &trial - &self.vertices[self.highest];
            self.vertices[self.highest] = trial;
        }
        Ok(noisy)
    }

    fn update_sum(&mut self) {
        self.sum = self
            .vertices
            .iter()
            .fold(DVector::zeros(self.sum.len()), |acc, v| acc + v);
    }
}

impl<R: Rng> OptimizationMethod for SimulatedAnnealing<R> {
    fn minimize(
        &mut self,
        problem: &mut Problem<'_>,
        end_criteria: &mut EndCriteria,
    ) -> Result<EndCriteriaType> {
        problem.reset();
        end_criteria.reset();
        let x = problem.current_value().clone();
        let n = x.len();
        if n == 0 {
            return Err(Error::InvalidArgument("cannot minimize over zero parameters".into()));
        }
        if !problem.constraint().test(&x) {
            return Err(Error::InfeasibleStart);
        }
        debug!(
            dimension = n,
            temperature = self.initial_temperature,
            schedule = ?self.schedule,
            "starting simulated annealing"
        );

        let vertices = initial_vertices(problem, &x, self.lambda)?;
        let mut values = Vec::with_capacity(n + 1);
        for vertex in &vertices {
            values.push(evaluate(problem, vertex)?);
        }
        let (schedule, initial_temperature) = (self.schedule, self.initial_temperature);
        let moves_per_temperature = schedule.moves_per_temperature();
        let mut state = Annealer {
            rng: &mut self.rng,
            sum: DVector::zeros(n),
            tt: 0.0,
            highest: 0,
            highest_noisy: 0.0,
            best: x.clone(),
            best_value: f64::MAX,
            vertices,
            values,
        };
        for i in 0..=n {
            let vertex = state.vertices[i].clone();
            state.record(&vertex, state.values[i]);
        }

        let mut temperature = initial_temperature;
        let mut iteration = 0;
        loop {
            let iteration_at_temperature = iteration;
            loop {
                state.update_sum();
                state.tt = -temperature;

                let mut lowest = 0;
                let mut highest = 1;
                let mut lowest_noisy = state.values[0] + state.noise();
                let mut highest_noisy = state.values[1] + state.noise();
                if lowest_noisy > highest_noisy {
                    std::mem::swap(&mut lowest, &mut highest);
                    std::mem::swap(&mut lowest_noisy, &mut highest_noisy);
                }
                let mut next_highest_noisy = lowest_noisy;
                for i in 2..=n {
                    let noisy = state.values[i] + state.noise();
                    if noisy <= lowest_noisy {
                        lowest = i;
                        lowest_noisy = noisy;
                    }
                    if noisy > highest_noisy {
                        next_highest_noisy = highest_noisy;
                        highest = i;
                        highest_noisy = noisy;
                    } else if noisy > next_highest_noisy {
                        next_highest_noisy = noisy;
                    }
                }
                state.highest = highest;
                state.highest_noisy = highest_noisy;

                let size = simplex_size(&state.vertices);
                if end_criteria.check_stationary_point(size, 0.0).0
                    || end_criteria.check_max_iterations(iteration).0
                {
                    problem.set_current_value(state.best.clone());
                    problem.set_function_value(state.best_value);
                    debug!(
                        iteration,
                        value = state.best_value,
                        outcome = ?end_criteria.outcome(),
                        "simulated annealing finished"
                    );
                    return Ok(end_criteria.outcome());
                }

                iteration += 2;
                let trial = state.try_move(problem, -1.0)?;
                if trial <= lowest_noisy {
                    state.try_move(problem, 2.0)?;
                } else if trial >= next_highest_noisy {
                    let saved = state.highest_noisy;
                    let trial = state.try_move(problem, 0.5)?;
                    if trial >= saved {
                        for i in 0..=n {
                            if i != lowest {
                                let shrunk = (&state.vertices[i] + &state.vertices[lowest]) * 0.5;
                                let value = evaluate(problem, &shrunk)?;
                                state.record(&shrunk, value);
                                state.vertices[i] = shrunk;
                                state.values[i] = value;
                            }
                        }
                        iteration += n;
                    }
                } else {
                    // a plain reflection costs one evaluation
                    iteration -= 1;
                }

                if iteration >= iteration_at_temperature + moves_per_temperature {
                    break;
                }
            }

            temperature = schedule.cool(initial_temperature, temperature, iteration);
            trace!(iteration, temperature, best = state.best_value, "cooling");
        }
    }
}
