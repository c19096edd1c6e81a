use nalgebra::{DMatrix, DVector};
use tracing::warn;

use super::{DirectionStrategy, Iterate};

/// Quasi-Newton direction `d = -H g` with the BFGS update of the inverse
/// Hessian approximation `H`.
///
/// `H` starts as the identity. The update is skipped while the curvature
/// condition `s·y > sqrt(1e-8 |y|^2 |s|^2)` fails, which keeps `H` positive
/// definite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BfgsDirection {
    inverse_hessian: DMatrix<f64>,
}

impl BfgsDirection {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current approximation of the inverse Hessian.
    pub fn inverse_hessian(&self) -> &DMatrix<f64> {
        &self.inverse_hessian
    }
}

const CURVATURE_EPSILON: f64 = 1e-8;

impl DirectionStrategy for BfgsDirection {
    fn name(&self) -> &'static str {
        "BFGS"
    }

    fn reset(&mut self, dimension: usize) {
        self.inverse_hessian = DMatrix::identity(dimension, dimension);
    }

    fn initial_step(
        &self,
        _previous_step: f64,
        _gradient: &DVector<f64>,
        _direction: &DVector<f64>,
    ) -> f64 {
        1.0
    }

    fn next_direction(
        &mut self,
        previous: Iterate<'_>,
        current: Iterate<'_>,
        _direction: &DVector<f64>,
    ) -> DVector<f64> {
        let dimension = current.x.len();
        if self.inverse_hessian.nrows() != dimension {
            self.reset(dimension);
        }

        let s = current.x - previous.x;
        let y = current.gradient - previous.gradient;
        let hy = &self.inverse_hessian * &y;
        let sy = s.dot(&y);
        let yhy = y.dot(&hy);

        if sy > (CURVATURE_EPSILON * y.norm_squared() * s.norm_squared()).sqrt() {
            let fac = 1.0 / sy;
            let fad = 1.0 / yhy;
            let u = &s * fac - &hy * fad;
            let h = &mut self.inverse_hessian;
            h.ger(fac, &s, &s, 1.0);
            h.ger(-fad, &hy, &hy, 1.0);
            h.ger(yhy, &u, &u, 1.0);
        } else {
            warn!(sy, "curvature condition failed, skipping BFGS update");
        }

        -(&self.inverse_hessian * current.gradient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_secant_equation() {
        let mut bfgs = BfgsDirection::new();
        bfgs.reset(2);
        let (x0, x1) = (
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![1.0, 0.5]),
        );
        // gradient of x^2 + 3 y^2
        let (g0, g1) = (
            DVector::from_vec(vec![0.0, 0.0]),
            DVector::from_vec(vec![2.0, 3.0]),
        );
        bfgs.next_direction(
            Iterate {
                x: &x0,
                gradient: &g0,
                gradient_norm_squared: 0.0,
            },
            Iterate {
                x: &x1,
                gradient: &g1,
                gradient_norm_squared: 13.0,
            },
            &DVector::zeros(2),
        );
        // H y = s after the update
        let h = bfgs.inverse_hessian();
        assert_relative_eq!(h * (&g1 - &g0), &x1 - &x0, epsilon = 1e-12);
        assert_relative_eq!(h, &h.transpose(), epsilon = 1e-12);
    }

    #[test]
    fn test_skips_update_without_curvature() {
        let mut bfgs = BfgsDirection::new();
        bfgs.reset(2);
        let x0 = DVector::from_vec(vec![0.0, 0.0]);
        let x1 = DVector::from_vec(vec![1.0, 0.0]);
        let g0 = DVector::from_vec(vec![1.0, 0.0]);
        let g1 = DVector::from_vec(vec![0.5, 0.0]);
        let d = bfgs.next_direction(
            Iterate {
                x: &x0,
                gradient: &g0,
                gradient_norm_squared: 1.0,
            },
            Iterate {
                x: &x1,
                gradient: &g1,
                gradient_norm_squared: 0.25,
            },
            &DVector::zeros(2),
        );
        assert_eq!(bfgs.inverse_hessian(), &DMatrix::identity(2, 2));
        assert_relative_eq!(d, DVector::from_vec(vec![-0.5, 0.0]));
    }
}
