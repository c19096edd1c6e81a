//! Solver for the trust-region sub-problem in the LM algorithm.
use crate::qr::LinearLeastSquaresDiagonalProblem;
use crate::utils::enorm;
use nalgebra::{convert, DVector, RealField};
use num_traits::Float;

pub struct LMParameter<F: RealField> {
    pub step: DVector<F>,
    pub lambda: F,
    pub dp_norm: F,
}

/// Approximately solve the LM trust-region subproblem.
///
/// Given `$\mathbf{F}\in\R^{m\times n}$` and a non-singular diagonal matrix `$\mathbf{D}$`
/// this routine approximately solves the problem
/// ```math
///   \min_{\vec{p}\in\R^n}\|\mathbf{J}\vec{p} - \vec{r}\|^2\text{ subject to }\|\mathbf{D}\vec{p}\|\leq\Delta.
/// ```
///
/// It can be shown that `$\vec{p}$` with `$\|\mathbf{D}\vec{p}\|\leq\Delta$` is
/// a solution if and only if there exists `$\lambda\geq 0$` such that
/// ```math
/// \begin{aligned}
/// (\mathbf{J}^\top\mathbf{J} + \lambda \mathbf{D}\mathbf{D})\vec{p} &= \mathbf{J}^\top\vec{r}, \\
/// \lambda(\Delta - \|\mathbf{D}\vec{p}\|) &= 0.
/// \end{aligned}
/// ```
///
/// The returned `$\lambda$` satisfies `$\bigl|\|\mathbf{D}\vec{p}\| - \Delta\bigr| \leq 0.1\Delta$`
/// unless `$\lambda = 0$` is already feasible or the iteration limit of ten
/// Newton steps is hit.
///
/// # Inputs
///
/// The matrix `$\mathbf{F}$` and vector `$\vec{r}$` correspond to `$\mathbf{A}$` and
/// `$\vec{b}$` of [`LinearLeastSquaresDiagonalProblem`](../qr/struct.LinearLeastSquaresDiagonalProblem.html).
///
/// # Reference
///
/// This method resembles `LMPAR` from `MINPACK`. See the following paper
/// on how it works:
///
/// > Moré J.J. (1978) The Levenberg-Marquardt algorithm: Implementation and theory. In: Watson G.A. (eds) Numerical Analysis. Lecture Notes in Mathematics, vol 630. Springer, Berlin, Heidelberg.
///
/// Chapter 4.3 of "Numerical Optimization" by Nocedal and Wright also contains
/// information about this algorithm but is misses a few details.
pub fn determine_lambda_and_parameter_update<F>(
    lls: &mut LinearLeastSquaresDiagonalProblem<F>,
    diag: &DVector<F>,
    delta: F,
    initial_lambda: F,
) -> LMParameter<F>
where
    F: RealField + Float,
{
    const P1: f64 = 0.1;
    const P001: f64 = 0.001;
    let dwarf = F::min_positive_value();
    let (mut p, mut l) = lls.solve_with_zero_diagonal();
    let mut diag_p = p.component_mul(diag);
    let mut diag_p_norm = enorm(&diag_p);
    let mut fp = diag_p_norm - delta;
    if fp <= delta * convert(P1) {
        // we have a feasible p with lambda = 0
        return LMParameter {
            step: p,
            lambda: F::zero(),
            dp_norm: diag_p_norm,
        };
    }

    // we now look for lambda > 0 with ||D p|| = delta
    // by using an approximate Newton iteration.

    let mut lambda_lower = if l.is_non_singular() {
        p.copy_from(&diag_p);
        p.component_mul_assign(diag);
        p /= diag_p_norm;
        p = l.solve(p);
        let norm = enorm(&p);
        ((fp / delta) / norm) / norm
    } else {
        F::zero()
    };

    let gnorm;
    let mut lambda_upper = {
        // Upper bound is given by ||(J * D^T)^T r|| / delta, see paper cited above.
        p = l.mul_qt_b(p);
        for j in 0..p.nrows() {
            p[j] /= diag[l.permutation[j]];
        }
        gnorm = enorm(&p);
        let upper = gnorm / delta;
        if upper.is_zero() {
            dwarf / Float::min(delta, convert(P1))
        } else {
            upper
        }
    };

    let mut lambda = Float::min(Float::max(initial_lambda, lambda_lower), lambda_upper);
    if lambda.is_zero() {
        lambda = gnorm / diag_p_norm;
    }

    for iteration in 1.. {
        if lambda.is_zero() {
            lambda = Float::max(dwarf, lambda_upper * convert(P001));
        }
        let l_sqrt = Float::sqrt(lambda);
        diag_p.axpy(l_sqrt, diag, F::zero());
        let (p_new, mut l) = lls.solve_with_diagonal(&diag_p, p);
        p = p_new;
        diag_p = p.component_mul(diag);
        diag_p_norm = enorm(&diag_p);
        if iteration == 10 {
            break;
        }
        let fp_old = fp;
        fp = diag_p_norm - delta;
        if Float::abs(fp) <= delta * convert(P1)
            || (lambda_lower.is_zero() && fp <= fp_old && fp_old.is_negative())
        {
            break;
        }

        let newton_correction = {
            p.copy_from(&diag_p);
            p.component_mul_assign(diag);
            p /= diag_p_norm;
            p = l.solve(p);
            let norm = enorm(&p);
            ((fp / delta) / norm) / norm
        };

        if fp.is_positive() {
            lambda_lower = Float::max(lambda_lower, lambda);
        } else {
            lambda_upper = Float::min(lambda_upper, lambda);
        }
        lambda = Float::max(lambda_lower, lambda + newton_correction);
    }
    LMParameter {
        step: p,
        lambda,
        dp_norm: diag_p_norm,
    }
}
