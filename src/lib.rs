//! Constrained nonlinear optimization for model calibration, built on
//! [nalgebra](https://nalgebra.org).
//!
//! The crate minimizes a scalar cost `$f\!:\R^n\to\R$`, optionally given as a
//! sum of squares of residuals `$r_i\!:\R^n\to\R$`, over a feasible region
//! described by a [`Constraint`]. The pieces are:
//!
//! - a [`CostFunction`] (the objective, with finite-difference derivatives
//!   unless you supply your own),
//! - a [`Constraint`] (box, positivity, per-parameter bounds, or compositions),
//! - a [`Problem`] binding both to the current iterate and counting
//!   evaluations,
//! - an [`EndCriteria`] holding the budgets and tolerances,
//! - and an [`OptimizationMethod`]:
//!   [`SteepestDescent`], [`ConjugateGradient`], [`Bfgs`] (with
//!   [`ArmijoLineSearch`] or [`GoldsteinLineSearch`]), the Nelder-Mead
//!   [`Simplex`], [`SimulatedAnnealing`],
//!   [`DifferentialEvolution`](differential_evolution::DifferentialEvolution)
//!   or [`LevenbergMarquardt`].
//!
//! Each method starts from [`Problem::current_value`] and leaves the best
//! point it found there. The returned [`EndCriteriaType`] tells why it
//! stopped; exhausting a budget is an outcome, not an error.
//!
//! # Levenberg-Marquardt
//!
//! [`LevenbergMarquardt`] is a port of MINPACK's `LMDIF`. It solves
//! ```math
//! \min_{\vec{x}\in\R^n}\frac{1}{2}\sum_{i=1}^m \bigl(r_i(\vec{x})\bigr)^2
//! ```
//! with `$m\geq n$`. Besides being an [`OptimizationMethod`], it works
//! directly on a [`LeastSquaresProblem`], which provides the residual vector
//! and (optionally) its Jacobian `$\mathbf{J} \in \R^{m\times n}$`.
//! The QR kernels it is built on are exposed as [`qr_decomposition`] and
//! [`qr_solve`].
//!
//! # Usage Example
//!
//! We use `$f(x, y) \coloneqq \frac{1}{2}[(x^2 + y - 11)^2 + (x + y^2 - 7)^2]$` as a [test function](https://en.wikipedia.org/wiki/Himmelblau%27s_function)
//! for this example.
//! In this case we have `$n = 2$` and `$m = 2$` with
//!
//! ```math
//!   r_1(\vec{x}) \coloneqq x_1^2 + x_2 - 11\quad\text{and}\quad
//!   r_2(\vec{x}) \coloneqq x_1 + x_2^2 - 7.
//! ```
//!
//! ```
//! # use nalgebra::{DMatrix, DVector};
//! use calibration_optim::{LeastSquaresProblem, LevenbergMarquardt};
//!
//! struct ExampleProblem {
//!     // holds current value of the n parameters
//!     p: DVector<f64>,
//! }
//!
//! // We must implement a trait for every problem we want to solve
//! impl LeastSquaresProblem<f64> for ExampleProblem {
//!     fn set_params(&mut self, p: &DVector<f64>) {
//!         self.p.copy_from(p);
//!         // do common calculations for residuals and the Jacobian here
//!     }
//!
//!     fn params(&self) -> DVector<f64> {
//!         self.p.clone()
//!     }
//!
//!     fn residuals(&self) -> Option<DVector<f64>> {
//!         let (x, y) = (self.p[0], self.p[1]);
//!         Some(DVector::from_vec(vec![x * x + y - 11., x + y * y - 7.]))
//!     }
//!
//!     fn jacobian(&self) -> Option<DMatrix<f64>> {
//!         let (x, y) = (self.p[0], self.p[1]);
//!         Some(DMatrix::from_row_slice(2, 2, &[2. * x, 1., 1., 2. * y]))
//!     }
//! }
//!
//! let problem = ExampleProblem {
//!     p: DVector::from_vec(vec![1., 1.]),
//! };
//! let (_result, report) = LevenbergMarquardt::new().minimize(problem);
//! assert!(report.termination.was_successful());
//! assert!(report.objective_function.abs() < 1e-10);
//! ```
//!
//! # Derivative checking
//!
//! Use [`differentiate_numerically`] to compare an analytic Jacobian against
//! central differences before trusting it.
//!
//! # Logging
//!
//! All methods emit [`tracing`](https://docs.rs/tracing) events: `debug` at
//! the start and end of a run, `trace` per iteration, `warn` when a step had
//! to be discarded.

mod constraint;
mod cost_function;
pub mod differential_evolution;
mod end_criteria;
mod error;
mod least_squares;
mod line_search;
mod line_search_method;
mod lm;
mod method;
mod problem;
mod qr;
mod simplex;
mod simulated_annealing;
mod trust_region;
mod utils;

pub use constraint::{
    BoundaryConstraint, CompositeConstraint, Constraint, NoConstraint,
    NonhomogeneousBoundaryConstraint, PositiveConstraint, ProjectedConstraint, Projection,
    MAX_STEP_HALVINGS,
};
pub use cost_function::{CostFunction, ProjectedCostFunction};
pub use end_criteria::{EndCriteria, EndCriteriaType};
pub use error::{Error, Result};
pub use least_squares::{FittingProblem, LeastSquareFunction, NonLinearLeastSquare};
pub use line_search::{
    ArmijoLineSearch, GoldsteinLineSearch, LineSearch, LineSearchOutcome,
};
pub use line_search_method::{
    Bfgs, BfgsDirection, ConjugateGradient, ConjugateGradientDirection, ConjugateGradientFormula,
    DirectionStrategy, Iterate, LineSearchBasedMethod, SteepestDescent, SteepestDescentDirection,
};
pub use lm::{LevenbergMarquardt, MinimizationReport, TerminationReason};
pub use method::OptimizationMethod;
pub use problem::{LeastSquaresProblem, Problem};
pub use qr::{qr_decomposition, qr_solve, QrDecomposition};
pub use simplex::Simplex;
pub use simulated_annealing::{CoolingSchedule, SimulatedAnnealing};

pub use utils::differentiate_numerically;
