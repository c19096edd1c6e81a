//! Objective functions for the optimization methods.
use nalgebra::{DMatrix, DVector};

use crate::constraint::Projection;
use crate::utils::{central_difference_gradient, central_difference_jacobian};
use crate::Result;

/// A scalar (and optionally vector valued) objective.
///
/// Only [`value`](#tymethod.value) is required. Least squares style methods
/// additionally use [`values`](#method.values), the residual components whose
/// squares sum up to the cost. Derivatives default to central differences
/// with step [`finite_difference_epsilon`](#method.finite_difference_epsilon).
///
/// Failures are reported as [`Error::CostFunction`](crate::Error::CostFunction).
///
/// # Example
///
/// ```
/// use calibration_optim::{CostFunction, Result};
/// use nalgebra::DVector;
///
/// struct Paraboloid;
///
/// impl CostFunction for Paraboloid {
///     fn value(&self, x: &DVector<f64>) -> Result<f64> {
///         Ok((x[0] - 1.0).powi(2) + 2.0 * (x[1] + 2.0).powi(2))
///     }
/// }
///
/// let x = DVector::from_vec(vec![0.0, 0.0]);
/// let mut gradient = DVector::zeros(2);
/// Paraboloid.gradient(&mut gradient, &x).unwrap();
/// assert!((gradient[0] + 2.0).abs() < 1e-6);
/// assert!((gradient[1] - 8.0).abs() < 1e-6);
/// ```
pub trait CostFunction {
    /// Cost at `x`.
    fn value(&self, x: &DVector<f64>) -> Result<f64>;

    /// Residual components at `x`.
    fn values(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        Ok(DVector::from_element(1, self.value(x)?))
    }

    /// Write the gradient at `x` into `gradient`.
    fn gradient(&self, gradient: &mut DVector<f64>, x: &DVector<f64>) -> Result<()> {
        *gradient =
            central_difference_gradient(x, self.finite_difference_epsilon(), |p| self.value(p))?;
        Ok(())
    }

    /// Gradient and value at `x` in one call.
    fn value_and_gradient(&self, gradient: &mut DVector<f64>, x: &DVector<f64>) -> Result<f64> {
        self.gradient(gradient, x)?;
        self.value(x)
    }

    /// Jacobian of [`values`](#method.values), one row per component.
    fn jacobian(&self, jacobian: &mut DMatrix<f64>, x: &DVector<f64>) -> Result<()> {
        *jacobian =
            central_difference_jacobian(x, self.finite_difference_epsilon(), |p| self.values(p))?;
        Ok(())
    }

    /// Step used by the finite difference defaults.
    fn finite_difference_epsilon(&self) -> f64 {
        1e-8
    }
}

/// Restricts a cost function to the free parameters of a [`Projection`].
///
/// The fixed parameters keep the values the projection was built with.
pub struct ProjectedCostFunction<'a, C: CostFunction + ?Sized> {
    cost_function: &'a C,
    projection: Projection,
}

impl<'a, C: CostFunction + ?Sized> ProjectedCostFunction<'a, C> {
    pub fn new(cost_function: &'a C, projection: Projection) -> Self {
        Self {
            cost_function,
            projection,
        }
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }
}

impl<C: CostFunction + ?Sized> CostFunction for ProjectedCostFunction<'_, C> {
    fn value(&self, free_parameters: &DVector<f64>) -> Result<f64> {
        self.cost_function
            .value(&self.projection.include(free_parameters)?)
    }

    fn values(&self, free_parameters: &DVector<f64>) -> Result<DVector<f64>> {
        self.cost_function
            .values(&self.projection.include(free_parameters)?)
    }

    fn finite_difference_epsilon(&self) -> f64 {
        self.cost_function.finite_difference_epsilon()
    }
}
