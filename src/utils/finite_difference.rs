//! Finite difference approximations of gradients and Jacobians.
use nalgebra::{convert, DMatrix, DVector, RealField};
use num_traits::Float;

use super::epsmch;
use crate::{LeastSquaresProblem, Result};

/// Forward difference approximation of the Jacobian as done by MINPACK's `FDJAC2`.
///
/// Column `j` is `$(\vec{r}(\vec{x} + h_j\vec{e}_j) - \vec{r}(\vec{x}))/h_j$` with
/// `$h_j = \sqrt{\max(\mathtt{epsfcn}, \epsilon)}\,|x_j|$` (or the square root
/// alone if `$x_j = 0$`). `residuals` must be the residuals at `x`.
///
/// The parameters of `problem` are restored to `x` before returning.
/// Returns `None` if one of the residual evaluations failed.
pub(crate) fn forward_difference_jacobian<F, O>(
    problem: &mut O,
    x: &DVector<F>,
    residuals: &DVector<F>,
    epsfcn: F,
) -> Option<DMatrix<F>>
where
    F: RealField + Float,
    O: LeastSquaresProblem<F>,
{
    let eps = Float::sqrt(Float::max(epsfcn, epsmch()));
    let (m, n) = (residuals.nrows(), x.nrows());
    let mut jacobian = DMatrix::zeros(m, n);
    let mut xh = x.clone();
    for j in 0..n {
        let temp = xh[j];
        let mut h = eps * Float::abs(temp);
        if h.is_zero() {
            h = eps;
        }
        xh[j] = temp + h;
        problem.set_params(&xh);
        let perturbed = problem.residuals();
        xh[j] = temp;
        match perturbed {
            Some(perturbed) if perturbed.nrows() == m => {
                jacobian.column_mut(j).copy_from(&((perturbed - residuals) / h));
            }
            _ => {
                problem.set_params(x);
                return None;
            }
        }
    }
    problem.set_params(x);
    Some(jacobian)
}

/// Central difference gradient `$\frac{f(\vec{x}+h\vec{e}_i) - f(\vec{x}-h\vec{e}_i)}{2h}$`.
pub(crate) fn central_difference_gradient(
    x: &DVector<f64>,
    h: f64,
    mut f: impl FnMut(&DVector<f64>) -> Result<f64>,
) -> Result<DVector<f64>> {
    let mut xx = x.clone();
    let mut gradient = DVector::zeros(x.len());
    for i in 0..x.len() {
        xx[i] = x[i] + h;
        let fp = f(&xx)?;
        xx[i] = x[i] - h;
        let fm = f(&xx)?;
        gradient[i] = 0.5 * (fp - fm) / h;
        xx[i] = x[i];
    }
    Ok(gradient)
}

/// Central difference Jacobian of a vector valued function, one row per component.
pub(crate) fn central_difference_jacobian(
    x: &DVector<f64>,
    h: f64,
    mut f: impl FnMut(&DVector<f64>) -> Result<DVector<f64>>,
) -> Result<DMatrix<f64>> {
    let mut xx = x.clone();
    let mut columns = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        xx[i] = x[i] + h;
        let fp = f(&xx)?;
        xx[i] = x[i] - h;
        let fm = f(&xx)?;
        columns.push((fp - fm) * (0.5 / h));
        xx[i] = x[i];
    }
    if columns.is_empty() {
        return Ok(DMatrix::zeros(f(x)?.len(), 0));
    }
    Ok(DMatrix::from_columns(&columns))
}

/// Compute a [numerical approximation](https://en.wikipedia.org/wiki/Numerical_differentiation)
/// to the Jacobian for testing.
///
/// The function is intended to be used for debugging or testing.
/// You can try to check your derivative implementation of a
/// [`LeastSquaresProblem`](trait.LeastSquaresProblem.html) with this.
///
/// It uses central differences with step `$\sqrt[3]{\epsilon}\max(1, |x_j|)$`,
/// so expect agreement to roughly `$10^{-6}$` relative for `f64`. The parameters
/// of `problem` are reset to `x` afterwards.
///
/// # Example
///
/// ```
/// # use approx::assert_relative_eq;
/// # use nalgebra::{DMatrix, DVector};
/// use calibration_optim::{differentiate_numerically, LeastSquaresProblem};
///
/// struct Parabola {
///     p: DVector<f64>,
/// }
///
/// impl LeastSquaresProblem<f64> for Parabola {
///     fn set_params(&mut self, p: &DVector<f64>) {
///         self.p.copy_from(p);
///     }
///     fn params(&self) -> DVector<f64> {
///         self.p.clone()
///     }
///     fn residuals(&self) -> Option<DVector<f64>> {
///         Some(DVector::from_vec(vec![self.p[0] * self.p[0], self.p[0] * self.p[1]]))
///     }
///     fn jacobian(&self) -> Option<DMatrix<f64>> {
///         Some(DMatrix::from_row_slice(2, 2, &[2. * self.p[0], 0., self.p[1], self.p[0]]))
///     }
/// }
///
/// let x = DVector::from_vec(vec![1.5, -2.0]);
/// let mut problem = Parabola { p: x.clone() };
/// let numeric = differentiate_numerically(&mut problem, &x).unwrap();
/// let analytic = problem.jacobian().unwrap();
/// assert_relative_eq!(numeric, analytic, epsilon = 1e-6);
/// ```
pub fn differentiate_numerically<F, O>(problem: &mut O, x: &DVector<F>) -> Option<DMatrix<F>>
where
    F: RealField + Float,
    O: LeastSquaresProblem<F>,
{
    let cbrt_eps = Float::cbrt(epsmch::<F>());
    let two: F = convert(2.0);
    let mut xh = x.clone();
    let mut columns = Vec::with_capacity(x.nrows());
    let mut failed = false;
    for j in 0..x.nrows() {
        let temp = xh[j];
        let h = cbrt_eps * Float::max(F::one(), Float::abs(temp));
        xh[j] = temp + h;
        problem.set_params(&xh);
        let fp = problem.residuals();
        xh[j] = temp - h;
        problem.set_params(&xh);
        let fm = problem.residuals();
        xh[j] = temp;
        match (fp, fm) {
            (Some(fp), Some(fm)) if fp.nrows() == fm.nrows() => {
                columns.push((fp - fm) / (two * h));
            }
            _ => {
                failed = true;
                break;
            }
        }
    }
    problem.set_params(x);
    if failed || columns.is_empty() {
        return None;
    }
    Some(DMatrix::from_columns(&columns))
}
