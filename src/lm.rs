use core::cell::RefCell;

use nalgebra::{convert, DMatrix, DVector, RealField};
use num_traits::Float;
use tracing::{debug, trace};

use crate::qr::PivotedQR;
use crate::trust_region::determine_lambda_and_parameter_update;
use crate::utils::{enorm, epsmch, forward_difference_jacobian};
use crate::{
    EndCriteria, EndCriteriaType, Error, LeastSquaresProblem, OptimizationMethod, Problem, Result,
};

#[cfg(test)]
mod test_examples;
#[cfg(test)]
mod test_helpers;
#[cfg(test)]
mod test_init_step;

/// Reasons for terminating a minimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    /// The residual or Jacobian computation was not successful.
    User(&'static str),
    /// Encountered `NaN` or `$\pm\infty$`.
    Numerical(&'static str),
    /// The residuals are literally zero.
    ResidualsZero,
    /// The residual vector is orthogonal to the columns of the Jacobian
    /// (up to `gtol`).
    Orthogonal,
    /// The relative reduction of the objective (`ftol`) or the relative
    /// change of the parameters (`xtol`) is small enough.
    Converged { ftol: bool, xtol: bool },
    /// The named tolerance is too small, no further progress is possible
    /// in machine precision.
    NoImprovementPossible(&'static str),
    /// Maximum number of function evaluations was hit.
    LostPatience,
    /// The number of parameters `$n$` is zero.
    NoParameters,
    /// Indicates that `$m < n$`, which is not allowed.
    NotEnoughResiduals,
    /// The residual vector or the Jacobian changed dimensions.
    WrongDimensions(&'static str),
}

impl TerminationReason {
    /// Whether the minimization found a (local) minimum.
    pub fn was_successful(&self) -> bool {
        matches!(
            self,
            TerminationReason::ResidualsZero
                | TerminationReason::Orthogonal
                | TerminationReason::Converged { .. }
        )
    }

    /// Whether the minimization could not even start.
    pub fn was_bad_input(&self) -> bool {
        matches!(
            self,
            TerminationReason::NoParameters
                | TerminationReason::NotEnoughResiduals
                | TerminationReason::WrongDimensions(_)
        )
    }

    /// The corresponding MINPACK `info` code.
    ///
    /// | reason | info |
    /// |---|---|
    /// | bad input | 0 |
    /// | `Converged` | 1 (`ftol`), 2 (`xtol`), 3 (both) |
    /// | `Orthogonal`, `ResidualsZero` | 4 |
    /// | `LostPatience` | 5 |
    /// | `NoImprovementPossible` | 6 (`ftol`), 7 (`xtol`), 8 (`gtol`) |
    /// | `User` | -1 |
    /// | `Numerical` | -2 |
    pub fn info(&self) -> i32 {
        match self {
            TerminationReason::NoParameters
            | TerminationReason::NotEnoughResiduals
            | TerminationReason::WrongDimensions(_) => 0,
            TerminationReason::Converged { ftol, xtol } => match (ftol, xtol) {
                (true, false) => 1,
                (false, true) => 2,
                _ => 3,
            },
            TerminationReason::Orthogonal | TerminationReason::ResidualsZero => 4,
            TerminationReason::LostPatience => 5,
            TerminationReason::NoImprovementPossible("ftol") => 6,
            TerminationReason::NoImprovementPossible("xtol") => 7,
            TerminationReason::NoImprovementPossible(_) => 8,
            TerminationReason::User(_) => -1,
            TerminationReason::Numerical(_) => -2,
        }
    }

    /// Short description in MINPACK's words.
    pub fn description(&self) -> &'static str {
        match self.info() {
            0 => "improper input parameters",
            1 => "both actual and predicted relative reductions in the sum of squares are at most ftol",
            2 => "relative error between two consecutive iterates is at most xtol",
            3 => "conditions for ftol and xtol both hold",
            4 => "the residuals are orthogonal to the columns of the jacobian to gtol",
            5 => "number of calls to fcn has reached or exceeded maxfev",
            6 => "ftol is too small, no further reduction in the sum of squares is possible",
            7 => "xtol is too small, no further improvement in the approximate solution x is possible",
            8 => "gtol is too small, fvec is orthogonal to the columns of the jacobian to machine precision",
            -1 => "user requested termination",
            _ => "encountered a non-finite value",
        }
    }
}

/// Information about the minimization.
///
/// Use this to inspect the minimization process. Most importantly
/// you may want to check if there was a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizationReport<F: RealField> {
    pub termination: TerminationReason,
    /// Number of residuals which were computed.
    pub number_of_evaluations: usize,
    /// Contains the value of `$f(\vec{x})$`.
    pub objective_function: F,
}

/// Helper to keep target and report about it together.
struct TargetReport<F: RealField, O> {
    target: O,
    report: MinimizationReport<F>,
}

impl<F: RealField + Float, O: LeastSquaresProblem<F>> TargetReport<F, O> {
    fn finish(self, termination: TerminationReason) -> (O, MinimizationReport<F>) {
        debug!(
            ?termination,
            evaluations = self.report.number_of_evaluations,
            "levenberg-marquardt finished"
        );
        (
            self.target,
            MinimizationReport {
                termination,
                ..self.report
            },
        )
    }

    fn counted_residuals(&mut self) -> Option<DVector<F>> {
        self.report.number_of_evaluations += 1;
        let residuals = self.target.residuals()?;
        self.report.objective_function = Float::powi(enorm(&residuals), 2) * convert(0.5);
        Some(residuals)
    }
}

/// Levenberg-Marquardt optimization algorithm.
///
/// This is MINPACK's `LMDIF` (or `LMDER` with an analytic Jacobian): a trust
/// region method that factors the Jacobian with a pivoted QR decomposition
/// and determines the damping parameter with `LMPAR`.
///
/// See the [crate documentation](index.html) for a usage example.
///
/// The runtime and termination behavior can be controlled by various hyperparameters.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LevenbergMarquardt<F> {
    ftol: F,
    xtol: F,
    gtol: F,
    stepbound: F,
    patience: usize,
    scale_diag: bool,
    epsfcn: Option<F>,
}

impl<F: RealField + Float> LevenbergMarquardt<F> {
    pub fn new() -> Self {
        let user_tol = F::default_epsilon() * convert(30.0);
        Self {
            ftol: user_tol,
            xtol: user_tol,
            gtol: user_tol,
            stepbound: convert(100.0),
            patience: 100,
            scale_diag: true,
            epsfcn: None,
        }
    }

    /// The classic calibration setup: forward difference Jacobian with
    /// `epsfcn = 1e-8` and `xtol = gtol = 1e-8`.
    pub fn minpack() -> Self {
        let tol: F = convert(1.0e-8);
        Self::new().with_xtol(tol).with_gtol(tol).with_epsfcn(tol)
    }

    /// Set the relative error desired in the objective function `$f$`.
    ///
    /// Termination occurs when both the actual and
    /// predicted relative reductions for `$f$` are at most `ftol`.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{ftol} < 0$`.
    pub fn with_ftol(self, ftol: F) -> Self {
        assert!(!ftol.is_negative(), "ftol must be >= 0");
        Self { ftol, ..self }
    }

    /// Set relative error between last two approximations.
    ///
    /// Termination occurs when the relative error between
    /// two consecutive iterates is at most `xtol`.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{xtol} < 0$`.
    pub fn with_xtol(self, xtol: F) -> Self {
        assert!(!xtol.is_negative(), "xtol must be >= 0");
        Self { xtol, ..self }
    }

    /// Set orthogonality desired between the residual vector and its derivative.
    ///
    /// Termination occurs when the cosine of the angle
    /// between the residual vector `$\vec{r}$` and any column of the Jacobian `$\mathbf{J}$` is at
    /// most `gtol` in absolute value.
    ///
    /// With other words, the algorithm will terminate if
    /// ```math
    ///   \max_{i=1,\ldots,n}\frac{|(\mathbf{J}^\top \vec{r})_i|}{\|\mathbf{J}\vec{e}_i\|\|\vec{r}\|} \leq \texttt{gtol}.
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{gtol} < 0$`.
    pub fn with_gtol(self, gtol: F) -> Self {
        assert!(!gtol.is_negative(), "gtol must be >= 0");
        Self { gtol, ..self }
    }

    /// Shorthand to set `ftol`, `xtol` and `gtol` at once.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{tol} \leq 0$`.
    pub fn with_tol(self, tol: F) -> Self {
        assert!(tol.is_positive(), "tol must be > 0");
        Self {
            ftol: tol,
            xtol: tol,
            gtol: tol,
            ..self
        }
    }

    /// Set factor for the initial step bound.
    ///
    /// This bound is set to `$\mathtt{stepbound}\cdot\|\mathbf{D}\vec{x}\|$`
    /// if nonzero, or else to `stepbound` itself. In most cases `stepbound` should lie
    /// in the interval `$[0.1,100]$`.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{stepbound} \leq 0$`.
    pub fn with_stepbound(self, stepbound: F) -> Self {
        assert!(stepbound.is_positive(), "stepbound must be > 0");
        Self { stepbound, ..self }
    }

    /// Set the maximal number of function evaluations.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{patience} \leq 0$`.
    pub fn with_patience(self, patience: usize) -> Self {
        assert!(patience > 0, "patience must be > 0");
        Self { patience, ..self }
    }

    /// Enable or disable whether the variables will be rescaled internally.
    pub fn with_scale_diag(self, scale_diag: bool) -> Self {
        Self { scale_diag, ..self }
    }

    /// Approximate the Jacobian by forward differences.
    ///
    /// The step for parameter `$x_j$` is `$\sqrt{\mathtt{epsfcn}}\,|x_j|$`,
    /// where `epsfcn` should be the relative error of the residuals.
    /// Values below machine epsilon are raised to it. Each approximation
    /// costs `$n$` residual evaluations.
    ///
    /// # Panics
    ///
    /// Panics if `$\mathtt{epsfcn} < 0$`.
    pub fn with_epsfcn(self, epsfcn: F) -> Self {
        assert!(!epsfcn.is_negative(), "epsfcn must be >= 0");
        Self {
            epsfcn: Some(epsfcn),
            ..self
        }
    }

    pub fn ftol(&self) -> F {
        self.ftol
    }

    pub fn xtol(&self) -> F {
        self.xtol
    }

    pub fn gtol(&self) -> F {
        self.gtol
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    pub fn epsfcn(&self) -> Option<F> {
        self.epsfcn
    }

    /// Try to solve the given least-squares problem.
    ///
    /// The start point is `target.params()`. The problem is returned with its
    /// parameters set to the best point found.
    pub fn minimize<O>(&self, target: O) -> (O, MinimizationReport<F>)
    where
        O: LeastSquaresProblem<F>,
    {
        const P1: f64 = 0.1;
        const P0001: f64 = 1.0e-4;
        let half: F = convert(0.5);

        let mut report = TargetReport {
            target,
            report: MinimizationReport {
                termination: TerminationReason::User("residuals"),
                number_of_evaluations: 0,
                objective_function: <F as Float>::nan(),
            },
        };

        let mut x = report.target.params();
        let mut residuals = match report.counted_residuals() {
            Some(residuals) => residuals,
            None => return report.finish(TerminationReason::User("residuals")),
        };
        let mut residuals_norm = enorm(&residuals);

        let (n, m) = (x.nrows(), residuals.nrows());
        if n == 0 {
            return report.finish(TerminationReason::NoParameters);
        }
        if m < n {
            return report.finish(TerminationReason::NotEnoughResiduals);
        }
        if !residuals_norm.is_finite() {
            return report.finish(TerminationReason::Numerical("residuals norm"));
        }
        if residuals_norm <= Float::min_positive_value() {
            return report.finish(TerminationReason::ResidualsZero);
        }
        debug!(parameters = n, residuals = m, "starting levenberg-marquardt");

        let mut diag = DVector::from_element(n, F::one());
        let mut delta = F::zero();
        let mut lambda = F::zero();
        let mut xnorm = F::zero();
        let scaled_norm = |diag: &DVector<F>, x: &DVector<F>, scale: bool| {
            if scale {
                enorm(&diag.component_mul(x))
            } else {
                enorm(x)
            }
        };

        let mut first_outer = true;
        loop {
            let jacobian = match self.epsfcn {
                Some(epsfcn) => {
                    report.report.number_of_evaluations += n;
                    forward_difference_jacobian(&mut report.target, &x, &residuals, epsfcn)
                }
                None => report.target.jacobian(),
            };
            let jacobian = match jacobian {
                Some(jacobian) => jacobian,
                None => return report.finish(TerminationReason::User("jacobian")),
            };
            if jacobian.shape() != (m, n) {
                return report.finish(TerminationReason::WrongDimensions("jacobian"));
            }
            if jacobian.iter().any(|v| !v.is_finite()) {
                return report.finish(TerminationReason::Numerical("jacobian"));
            }

            let qr = match PivotedQR::new(jacobian) {
                Ok(qr) => qr,
                Err(_) => return report.finish(TerminationReason::NotEnoughResiduals),
            };
            let mut lls = qr.into_least_squares_diagonal_problem(residuals.clone());

            // norm of the scaled gradient
            let gnorm = match lls.max_a_t_b_scaled(residuals_norm) {
                Some(gnorm) => gnorm,
                None => return report.finish(TerminationReason::Numerical("jacobian")),
            };
            if gnorm <= self.gtol {
                return report.finish(TerminationReason::Orthogonal);
            }

            if first_outer {
                if self.scale_diag {
                    for (d, col_norm) in diag.iter_mut().zip(lls.column_norms.iter()) {
                        *d = if col_norm.is_zero() { F::one() } else { *col_norm };
                    }
                }
                xnorm = scaled_norm(&diag, &x, self.scale_diag);
                if !xnorm.is_finite() {
                    return report.finish(TerminationReason::Numerical("parameters"));
                }
                delta = if xnorm.is_zero() {
                    self.stepbound
                } else {
                    self.stepbound * xnorm
                };
            } else if self.scale_diag {
                for (d, col_norm) in diag.iter_mut().zip(lls.column_norms.iter()) {
                    *d = Float::max(*col_norm, *d);
                }
            }

            loop {
                let param = determine_lambda_and_parameter_update(&mut lls, &diag, delta, lambda);
                lambda = param.lambda;
                let pnorm = param.dp_norm;
                if !pnorm.is_finite() {
                    return report.finish(TerminationReason::Numerical("subproblem"));
                }
                // the first step also bounds the trust region
                if first_outer {
                    delta = Float::min(delta, pnorm);
                }

                let x_new = &x - &param.step;
                report.target.set_params(&x_new);
                let new_residuals = match report.counted_residuals() {
                    Some(residuals) => residuals,
                    None => return report.finish(TerminationReason::User("residuals")),
                };
                if new_residuals.nrows() != m {
                    return report.finish(TerminationReason::WrongDimensions("residuals"));
                }
                let new_residuals_norm = enorm(&new_residuals);

                // actual and predicted reduction
                let actual_reduction = if new_residuals_norm * convert(P1) < residuals_norm {
                    F::one() - Float::powi(new_residuals_norm / residuals_norm, 2)
                } else {
                    -F::one()
                };
                let temp1 = Float::powi(lls.a_x_norm(&param.step) / residuals_norm, 2);
                let temp2 = Float::powi(Float::sqrt(lambda) * pnorm / residuals_norm, 2);
                if !temp1.is_finite() || !temp2.is_finite() {
                    return report.finish(TerminationReason::Numerical("predicted reduction"));
                }
                let predicted_reduction = temp1 + temp2 / half;
                let directional_derivative = -(temp1 + temp2);
                let ratio = if predicted_reduction.is_zero() {
                    F::zero()
                } else {
                    actual_reduction / predicted_reduction
                };

                if ratio <= convert(0.25) {
                    let mut temp = if !actual_reduction.is_negative() {
                        half
                    } else {
                        half * directional_derivative
                            / (directional_derivative + half * actual_reduction)
                    };
                    if new_residuals_norm * convert(P1) >= residuals_norm || temp < convert(P1) {
                        temp = convert(P1);
                    }
                    delta = temp * Float::min(delta, pnorm / convert(P1));
                    lambda /= temp;
                } else if lambda.is_zero() || ratio >= convert(0.75) {
                    delta = pnorm / half;
                    lambda *= half;
                }
                trace!(
                    evaluations = report.report.number_of_evaluations,
                    ratio = ?ratio,
                    delta = ?delta,
                    lambda = ?lambda,
                    "levenberg-marquardt step"
                );

                let accepted = ratio >= convert(P0001);
                if accepted {
                    x = x_new;
                    residuals = new_residuals;
                    residuals_norm = new_residuals_norm;
                    xnorm = scaled_norm(&diag, &x, self.scale_diag);
                    if !xnorm.is_finite() {
                        return report.finish(TerminationReason::Numerical("parameters"));
                    }
                } else {
                    report.target.set_params(&x);
                    report.report.objective_function =
                        Float::powi(residuals_norm, 2) * half;
                }

                // convergence tests
                if residuals_norm <= Float::min_positive_value() {
                    return report.finish(TerminationReason::ResidualsZero);
                }
                let ftol_converged = Float::abs(actual_reduction) <= self.ftol
                    && predicted_reduction <= self.ftol
                    && half * ratio <= F::one();
                let xtol_converged = delta <= self.xtol * xnorm;
                if ftol_converged || xtol_converged {
                    return report.finish(TerminationReason::Converged {
                        ftol: ftol_converged,
                        xtol: xtol_converged,
                    });
                }

                // termination tests, the stringent tolerances take precedence
                let eps = epsmch::<F>();
                if gnorm <= eps {
                    return report.finish(TerminationReason::NoImprovementPossible("gtol"));
                }
                if delta <= eps * xnorm {
                    return report.finish(TerminationReason::NoImprovementPossible("xtol"));
                }
                if Float::abs(actual_reduction) <= eps
                    && predicted_reduction <= eps
                    && half * ratio <= F::one()
                {
                    return report.finish(TerminationReason::NoImprovementPossible("ftol"));
                }
                if report.report.number_of_evaluations >= self.patience {
                    return report.finish(TerminationReason::LostPatience);
                }

                if accepted {
                    break;
                }
            }
            first_outer = false;
        }
    }
}

impl<F: RealField + Float> Default for LevenbergMarquardt<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Residuals of a [`Problem`] seen as a least squares problem.
///
/// Infeasible points get the residuals of the starting point, which makes
/// the solver reject steps leaving the feasible region. The first failure of
/// the cost function is kept and reported after the solver stopped.
struct ProblemResiduals<'p, 'a> {
    problem: RefCell<&'p mut Problem<'a>>,
    params: DVector<f64>,
    initial_values: DVector<f64>,
    error: RefCell<Option<Error>>,
}

impl ProblemResiduals<'_, '_> {
    fn fail(&self, error: Error) {
        self.error.borrow_mut().get_or_insert(error);
    }
}

impl LeastSquaresProblem<f64> for ProblemResiduals<'_, '_> {
    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let mut problem = self.problem.borrow_mut();
        if !problem.constraint().test(&self.params) {
            return Some(self.initial_values.clone());
        }
        problem
            .values(&self.params)
            .map_err(|error| self.fail(error))
            .ok()
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let cost_function = self.problem.borrow().cost_function();
        let mut jacobian = DMatrix::zeros(self.initial_values.len(), self.params.len());
        cost_function
            .jacobian(&mut jacobian, &self.params)
            .map(|()| jacobian)
            .map_err(|error| self.fail(error))
            .ok()
    }
}

/// Minimizes the squared norm of [`CostFunction::values`](crate::CostFunction::values).
///
/// [`EndCriteria::function_epsilon`] becomes `ftol` and
/// [`EndCriteria::max_iterations`] the budget of residual evaluations. The
/// Jacobian comes from [`CostFunction::jacobian`](crate::CostFunction::jacobian)
/// unless forward differences were requested with
/// [`with_epsfcn`](LevenbergMarquardt::with_epsfcn).
///
/// A starting point outside the constraint is rejected with
/// [`Error::InfeasibleStart`]. MINPACK outcomes 0, 7 and 8 are returned as
/// [`Error::Minpack`]. Outcome 6
/// (`ftol` too small) leaves the end criteria type untouched, every other
/// outcome counts as a stationary function value.
impl OptimizationMethod for LevenbergMarquardt<f64> {
    fn minimize(
        &mut self,
        problem: &mut Problem<'_>,
        end_criteria: &mut EndCriteria,
    ) -> Result<EndCriteriaType> {
        problem.reset();
        end_criteria.reset();
        let x0 = problem.current_value().clone();
        if !problem.constraint().test(&x0) {
            return Err(Error::InfeasibleStart);
        }
        let initial_values = problem.cost_function().values(&x0)?;
        let (n, m) = (x0.len(), initial_values.len());
        if n == 0 {
            return Err(Error::InvalidArgument("no variables given".into()));
        }
        if m < n {
            return Err(Error::InvalidArgument(format!(
                "less functions ({}) than available variables ({})",
                m, n
            )));
        }
        if end_criteria.function_epsilon() < 0.0 {
            return Err(Error::InvalidArgument("negative f tolerance".into()));
        }
        if end_criteria.max_iterations() == 0 {
            return Err(Error::InvalidArgument("null number of evaluations".into()));
        }

        let solver = self
            .with_ftol(end_criteria.function_epsilon())
            .with_patience(end_criteria.max_iterations());
        let target = ProblemResiduals {
            problem: RefCell::new(&mut *problem),
            params: x0,
            initial_values,
            error: RefCell::new(None),
        };
        let (target, report) = solver.minimize(target);
        let ProblemResiduals { params, error, .. } = target;

        if let Some(error) = error.into_inner() {
            return Err(error);
        }
        if let TerminationReason::User(_) = report.termination {
            return Err(Error::UserAbort);
        }
        let info = report.termination.info();
        if info <= 0 || info == 7 || info == 8 {
            return Err(Error::Minpack {
                info,
                reason: report.termination.description(),
            });
        }
        if info != 6 {
            end_criteria.mark(EndCriteriaType::StationaryFunctionValue);
        }
        end_criteria.check_max_iterations(report.number_of_evaluations);

        let value = problem.cost_function().value(&params)?;
        problem.set_current_value(params);
        problem.set_function_value(value);
        Ok(end_criteria.outcome())
    }
}
