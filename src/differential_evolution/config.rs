//! Differential evolution settings.
use nalgebra::DVector;

use crate::{Error, Result};

/// How the mutant population is built from the current one.
///
/// `s1`, `s2` and `s3` below are independently shuffled copies of the
/// population, `F` the step size weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Strategy {
    /// `s3 + F (s1 - s2)`
    Rand1Standard,
    /// `best + (s1 - x) (F + 0.0001 U)` with a fresh jitter `U` per coordinate.
    #[default]
    BestMemberWithJitter,
    /// `x + F (best - x) + F (s2 - s1)`
    CurrentToBest2Diffs,
    /// `s3 + w (s1 - s2)` with one dithered weight `w = F + (1 - F) U` per coordinate.
    Rand1DiffWithPerVectorDither,
    /// `s3 + w (s1 - s2)` with one dithered scalar weight per generation.
    Rand1DiffWithDither,
    /// Either `x + F (s1 - s2)` or `x + (F + 1) / 2 (s1 + s2 - 2 s3)`, chosen
    /// with equal probability once per generation.
    EitherOrWithOptimalRecombination,
    /// `best + F_i (s1 - s2)` with self-adapting per member weights `F_i`; one
    /// member in ten is a random permutation of the best member instead.
    Rand1SelfadaptiveWithRotation,
}

impl Strategy {
    pub const ALL: [Strategy; 7] = [
        Strategy::Rand1Standard,
        Strategy::BestMemberWithJitter,
        Strategy::CurrentToBest2Diffs,
        Strategy::Rand1DiffWithPerVectorDither,
        Strategy::Rand1DiffWithDither,
        Strategy::EitherOrWithOptimalRecombination,
        Strategy::Rand1SelfadaptiveWithRotation,
    ];
}

/// Probability that a coordinate is taken from the mutant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CrossoverType {
    /// The crossover probability itself.
    #[default]
    Normal,
    /// `CR (1 - 1/n) + 1/n`
    Binomial,
    /// `(1 - CR^n) / (n (1 - CR))`
    Exponential,
}

impl CrossoverType {
    pub const ALL: [CrossoverType; 3] = [
        CrossoverType::Normal,
        CrossoverType::Binomial,
        CrossoverType::Exponential,
    ];

    /// Mutation probability for crossover probability `cr` in dimension `n`.
    pub(crate) fn mutation_probability(self, cr: f64, n: usize) -> f64 {
        let n_f = n as f64;
        match self {
            CrossoverType::Normal => cr,
            CrossoverType::Binomial => cr * (1.0 - 1.0 / n_f) + 1.0 / n_f,
            CrossoverType::Exponential => {
                if cr == 1.0 {
                    1.0
                } else {
                    (1.0 - cr.powi(n as i32)) / (n_f * (1.0 - cr))
                }
            }
        }
    }
}

/// Settings of [`DifferentialEvolution`](super::DifferentialEvolution).
///
/// # Example
///
/// ```
/// use calibration_optim::differential_evolution::{Configuration, CrossoverType, Strategy};
///
/// let config = Configuration::default()
///     .with_strategy(Strategy::CurrentToBest2Diffs)
///     .with_crossover_type(CrossoverType::Binomial)
///     .with_population_members(40)
///     .with_seed(17);
/// assert!(config.validate().is_ok());
/// assert!(config.with_stepsize_weight(3.0).validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Configuration {
    pub strategy: Strategy,
    pub crossover_type: CrossoverType,
    /// Default: 100
    pub population_members: usize,
    /// `F`, in `[0, 2]`. Default: 0.2
    pub stepsize_weight: f64,
    /// `CR`, in `[0, 1]`. Default: 0.9
    pub crossover_probability: f64,
    /// Seed of the default random number generator.
    pub seed: u64,
    /// Reflect out of bound coordinates back between the bound and the
    /// mirror point. Default: true
    pub apply_bounds: bool,
    /// Randomly reset per coordinate crossover probabilities every
    /// generation. Default: false
    pub crossover_is_adaptive: bool,
    /// Keep a member when its offspring is worse. Default: true. Without it
    /// the offspring replace the old generation unconditionally.
    pub greedy_selection: bool,
    /// Overrides the upper bound of the problem constraint.
    pub upper_bound: Option<DVector<f64>>,
    /// Overrides the lower bound of the problem constraint.
    pub lower_bound: Option<DVector<f64>>,
    /// Used instead of a random initial population.
    pub initial_population: Option<Vec<DVector<f64>>>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            strategy: Strategy::BestMemberWithJitter,
            crossover_type: CrossoverType::Normal,
            population_members: 100,
            stepsize_weight: 0.2,
            crossover_probability: 0.9,
            seed: 0,
            apply_bounds: true,
            crossover_is_adaptive: false,
            greedy_selection: true,
            upper_bound: None,
            lower_bound: None,
            initial_population: None,
        }
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_crossover_type(mut self, crossover_type: CrossoverType) -> Self {
        self.crossover_type = crossover_type;
        self
    }

    pub fn with_population_members(mut self, population_members: usize) -> Self {
        self.population_members = population_members;
        self
    }

    pub fn with_stepsize_weight(mut self, stepsize_weight: f64) -> Self {
        self.stepsize_weight = stepsize_weight;
        self
    }

    pub fn with_crossover_probability(mut self, crossover_probability: f64) -> Self {
        self.crossover_probability = crossover_probability;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_bounds(mut self, apply_bounds: bool) -> Self {
        self.apply_bounds = apply_bounds;
        self
    }

    pub fn with_adaptive_crossover(mut self, adaptive: bool) -> Self {
        self.crossover_is_adaptive = adaptive;
        self
    }

    pub fn with_greedy_selection(mut self, greedy: bool) -> Self {
        self.greedy_selection = greedy;
        self
    }

    pub fn with_upper_bound(mut self, upper_bound: DVector<f64>) -> Self {
        self.upper_bound = Some(upper_bound);
        self
    }

    pub fn with_lower_bound(mut self, lower_bound: DVector<f64>) -> Self {
        self.lower_bound = Some(lower_bound);
        self
    }

    pub fn with_initial_population(mut self, population: Vec<DVector<f64>>) -> Self {
        self.initial_population = Some(population);
        self
    }

    /// Check the ranges of the settings.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.stepsize_weight) {
            return Err(Error::InvalidArgument(format!(
                "stepsize weight ({}) must be in [0, 2]",
                self.stepsize_weight
            )));
        }
        if !(0.0..=1.0).contains(&self.crossover_probability) {
            return Err(Error::InvalidArgument(format!(
                "crossover probability ({}) must be in [0, 1]",
                self.crossover_probability
            )));
        }
        if self.population_members == 0 {
            return Err(Error::InvalidArgument(
                "population must have at least one member".into(),
            ));
        }
        if let Some(population) = &self.initial_population {
            if population.is_empty() {
                return Err(Error::InvalidArgument("initial population is empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mutation_probabilities() {
        assert_relative_eq!(CrossoverType::Normal.mutation_probability(0.3, 4), 0.3);
        assert_relative_eq!(CrossoverType::Binomial.mutation_probability(0.5, 4), 0.625);
        // (1 - 0.5^2) / (2 * 0.5)
        assert_relative_eq!(CrossoverType::Exponential.mutation_probability(0.5, 2), 0.75);
        assert_relative_eq!(CrossoverType::Exponential.mutation_probability(1.0, 3), 1.0);
    }

    #[test]
    fn test_validate() {
        assert!(Configuration::default().validate().is_ok());
        assert!(Configuration::default()
            .with_crossover_probability(1.5)
            .validate()
            .is_err());
        assert!(Configuration::default()
            .with_stepsize_weight(-0.1)
            .validate()
            .is_err());
        assert!(Configuration::default()
            .with_population_members(0)
            .validate()
            .is_err());
        assert!(Configuration::default()
            .with_initial_population(Vec::new())
            .validate()
            .is_err());
    }
}
