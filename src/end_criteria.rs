//! Termination policy shared by the optimization methods.
use crate::{Error, Result};

/// Why an optimization stopped.
///
/// `None` means "still running". Once an [`EndCriteria`] reports a terminal
/// type it only changes to another terminal type until
/// [`EndCriteria::reset`] is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EndCriteriaType {
    #[default]
    None,
    /// The iteration (or evaluation) budget is exhausted.
    MaxIterations,
    /// The iterate stopped moving.
    StationaryPoint,
    /// The function value stopped changing.
    StationaryFunctionValue,
    /// A positive objective fell below the function epsilon.
    StationaryFunctionAccuracy,
    /// The gradient norm fell below the gradient epsilon.
    StationaryGradient,
    /// The method gave up for a reason not covered above, e.g. a failed line search.
    Unknown,
}

impl EndCriteriaType {
    pub fn is_terminal(self) -> bool {
        self != EndCriteriaType::None
    }

    /// Whether the type signals convergence rather than an exhausted budget.
    pub fn succeeded(self) -> bool {
        matches!(
            self,
            EndCriteriaType::StationaryPoint
                | EndCriteriaType::StationaryFunctionValue
                | EndCriteriaType::StationaryFunctionAccuracy
                | EndCriteriaType::StationaryGradient
        )
    }
}

/// Iteration limits and tolerances, plus the outcome of the checks made so far.
///
/// The stationary checks count consecutive non-improving calls and only
/// fire after more than
/// [`max_stationary_state_iterations`](#method.max_stationary_state_iterations)
/// of them.
///
/// # Example
///
/// ```
/// use calibration_optim::{EndCriteria, EndCriteriaType};
///
/// let mut criteria = EndCriteria::new(10, Some(2), 1e-8, 1e-8, None).unwrap();
/// assert_eq!(criteria.check_max_iterations(3), (false, EndCriteriaType::None));
/// assert_eq!(criteria.check_stationary_function_value(1.0, 1.0), (false, EndCriteriaType::None));
/// assert_eq!(criteria.check_stationary_function_value(1.0, 1.0), (false, EndCriteriaType::None));
/// assert_eq!(
///     criteria.check_stationary_function_value(1.0, 1.0),
///     (true, EndCriteriaType::StationaryFunctionValue)
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EndCriteria {
    max_iterations: usize,
    max_stationary_state_iterations: usize,
    root_epsilon: f64,
    function_epsilon: f64,
    gradient_norm_epsilon: f64,
    #[cfg_attr(feature = "serde", serde(skip))]
    outcome: EndCriteriaType,
    #[cfg_attr(feature = "serde", serde(skip))]
    stationary_state_iterations: usize,
}

impl EndCriteria {
    /// `max_stationary_state_iterations` defaults to
    /// `min(max_iterations / 2, 100)` and `gradient_norm_epsilon` to
    /// `function_epsilon`.
    ///
    /// # Errors
    ///
    /// Fails unless `1 < max_stationary_state_iterations <= max_iterations`.
    pub fn new(
        max_iterations: usize,
        max_stationary_state_iterations: Option<usize>,
        root_epsilon: f64,
        function_epsilon: f64,
        gradient_norm_epsilon: Option<f64>,
    ) -> Result<Self> {
        let max_stationary_state_iterations =
            max_stationary_state_iterations.unwrap_or_else(|| (max_iterations / 2).min(100));
        if max_stationary_state_iterations <= 1 {
            return Err(Error::InvalidArgument(format!(
                "max_stationary_state_iterations ({}) must be greater than one",
                max_stationary_state_iterations
            )));
        }
        if max_stationary_state_iterations > max_iterations {
            return Err(Error::InvalidArgument(format!(
                "max_stationary_state_iterations ({}) must be less than max_iterations ({})",
                max_stationary_state_iterations, max_iterations
            )));
        }
        Ok(Self {
            max_iterations,
            max_stationary_state_iterations,
            root_epsilon,
            function_epsilon,
            gradient_norm_epsilon: gradient_norm_epsilon.unwrap_or(function_epsilon),
            outcome: EndCriteriaType::None,
            stationary_state_iterations: 0,
        })
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn max_stationary_state_iterations(&self) -> usize {
        self.max_stationary_state_iterations
    }

    pub fn root_epsilon(&self) -> f64 {
        self.root_epsilon
    }

    pub fn function_epsilon(&self) -> f64 {
        self.function_epsilon
    }

    pub fn gradient_norm_epsilon(&self) -> f64 {
        self.gradient_norm_epsilon
    }

    /// The terminal type reached so far, `None` while running.
    pub fn outcome(&self) -> EndCriteriaType {
        self.outcome
    }

    /// Forget the outcome and the stationary counter. Every `minimize` starts
    /// with this.
    pub fn reset(&mut self) {
        self.outcome = EndCriteriaType::None;
        self.stationary_state_iterations = 0;
    }

    /// Record a terminal type decided by the optimization method itself.
    pub(crate) fn mark(&mut self, outcome: EndCriteriaType) -> (bool, EndCriteriaType) {
        if outcome.is_terminal() {
            self.outcome = outcome;
        }
        (outcome.is_terminal(), self.outcome)
    }

    pub fn check_max_iterations(&mut self, iteration: usize) -> (bool, EndCriteriaType) {
        if iteration < self.max_iterations {
            return (false, self.outcome);
        }
        self.mark(EndCriteriaType::MaxIterations)
    }

    pub fn check_stationary_point(&mut self, x_old: f64, x_new: f64) -> (bool, EndCriteriaType) {
        self.check_stationary(
            (x_new - x_old).abs() >= self.root_epsilon,
            EndCriteriaType::StationaryPoint,
        )
    }

    pub fn check_stationary_function_value(
        &mut self,
        f_old: f64,
        f_new: f64,
    ) -> (bool, EndCriteriaType) {
        self.check_stationary(
            (f_new - f_old).abs() >= self.function_epsilon,
            EndCriteriaType::StationaryFunctionValue,
        )
    }

    /// Only applies to objectives known to be non-negative.
    pub fn check_stationary_function_accuracy(
        &mut self,
        f: f64,
        positive_optimization: bool,
    ) -> (bool, EndCriteriaType) {
        if !positive_optimization || f >= self.function_epsilon {
            return (false, self.outcome);
        }
        self.mark(EndCriteriaType::StationaryFunctionAccuracy)
    }

    pub fn check_zero_gradient_norm(&mut self, gradient_norm: f64) -> (bool, EndCriteriaType) {
        if gradient_norm >= self.gradient_norm_epsilon {
            return (false, self.outcome);
        }
        self.mark(EndCriteriaType::StationaryGradient)
    }

    /// All checks that only need scalar state, in order: iteration budget,
    /// stationary function value, function accuracy, zero gradient. The
    /// first one that fires decides the type, later ones are not run.
    pub fn check(
        &mut self,
        iteration: usize,
        positive_optimization: bool,
        f_old: f64,
        f_new: f64,
        gradient_norm: f64,
    ) -> (bool, EndCriteriaType) {
        let done = self.check_max_iterations(iteration).0
            || self.check_stationary_function_value(f_old, f_new).0
            || self
                .check_stationary_function_accuracy(f_new, positive_optimization)
                .0
            || self.check_zero_gradient_norm(gradient_norm).0;
        (done, self.outcome)
    }

    fn check_stationary(&mut self, moved: bool, outcome: EndCriteriaType) -> (bool, EndCriteriaType) {
        if moved {
            self.stationary_state_iterations = 0;
            return (false, self.outcome);
        }
        self.stationary_state_iterations += 1;
        if self.stationary_state_iterations <= self.max_stationary_state_iterations {
            return (false, self.outcome);
        }
        self.mark(outcome)
    }
}
