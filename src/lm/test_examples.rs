//! Tests with the MINPACK test functions.
//!
//! Reference minima are the ones reported by MINPACK for the same start
//! points, compared loosely since the pivoting may break ties differently.
use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};

use crate::utils::differentiate_numerically;
use crate::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};

/// TOL value used by SciPy
const TOL: f64 = 1.49012e-08;

fn check_jacobian<P: LeastSquaresProblem<f64>>(problem: &mut P, at: &[f64], epsilon: f64) {
    let x = DVector::from_column_slice(at);
    problem.set_params(&x);
    let jac_num = differentiate_numerically(problem, &x).unwrap();
    let jac_trait = problem.jacobian().unwrap();
    assert_relative_eq!(jac_num, jac_trait, epsilon = epsilon);
}

fn solve<P: LeastSquaresProblem<f64>>(
    solver: LevenbergMarquardt<f64>,
    mut problem: P,
    initial: &[f64],
) -> (P, crate::MinimizationReport<f64>) {
    problem.set_params(&DVector::from_column_slice(initial));
    solver.minimize(problem)
}

struct LinearFullRank {
    params: DVector<f64>,
    m: usize,
}

impl LeastSquaresProblem<f64> for LinearFullRank {
    fn set_params(&mut self, params: &DVector<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let mut residuals =
            DVector::from_element(self.m, -2. * self.params.sum() / self.m as f64 - 1.);
        for (el, p) in residuals
            .rows_range_mut(..self.params.len())
            .iter_mut()
            .zip(self.params.iter())
        {
            *el += p;
        }
        Some(residuals)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let n = self.params.len();
        let mut jacobian = DMatrix::from_element(self.m, n, -2. / self.m as f64);
        for i in 0..n {
            jacobian[(i, i)] += 1.;
        }
        Some(jacobian)
    }
}

#[test]
fn test_linear_full_rank() {
    let mut problem = LinearFullRank {
        params: DVector::zeros(5),
        m: 10,
    };
    check_jacobian(&mut problem, &[0.3, -1.2, 4., 0.5, 2.], 1e-9);

    let (problem, report) = solve(LevenbergMarquardt::new().with_tol(TOL), problem, &[1.; 5]);
    assert!(report.termination.was_successful(), "{:?}", report);
    assert_relative_eq!(report.objective_function, 2.5, epsilon = 1e-12);
    assert_relative_eq!(problem.params, DVector::from_element(5, -1.), epsilon = 1e-12);

    let problem = LinearFullRank {
        params: DVector::zeros(5),
        m: 50,
    };
    let (problem, report) = solve(LevenbergMarquardt::new().with_tol(TOL), problem, &[1.; 5]);
    assert!(report.termination.was_successful());
    assert_relative_eq!(report.objective_function, 22.5, epsilon = 1e-10);
    assert_relative_eq!(problem.params, DVector::from_element(5, -1.), epsilon = 1e-10);
}

#[test]
fn test_linear_full_rank_forward_differences() {
    let problem = LinearFullRank {
        params: DVector::zeros(5),
        m: 10,
    };
    let (problem, report) = solve(LevenbergMarquardt::minpack(), problem, &[1.; 5]);
    assert!(report.termination.was_successful(), "{:?}", report);
    // every Jacobian costs five extra evaluations
    assert!(report.number_of_evaluations > 5);
    assert_relative_eq!(report.objective_function, 2.5, epsilon = 1e-8);
    assert_relative_eq!(problem.params, DVector::from_element(5, -1.), epsilon = 1e-6);
}

/// Straight line `a + b x` through samples of `0.7 - 1.3 x`.
struct StraightLine {
    params: DVector<f64>,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl LeastSquaresProblem<f64> for StraightLine {
    fn set_params(&mut self, params: &DVector<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let (a, b) = (self.params[0], self.params[1]);
        Some(DVector::from_iterator(
            self.x.len(),
            self.x.iter().zip(self.y.iter()).map(|(x, y)| a + b * x - y),
        ))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(DMatrix::from_fn(self.x.len(), 2, |i, j| {
            if j == 0 {
                1.
            } else {
                self.x[i]
            }
        }))
    }
}

#[test]
fn test_straight_line() {
    let mut problem = StraightLine {
        params: DVector::zeros(2),
        x: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8],
        y: vec![0.57, 0.44, 0.31, 0.18, 0.05, -0.08, -0.21, -0.34],
    };
    check_jacobian(&mut problem, &[1.5, 0.5], 1e-8);

    // gtol = 0 as in SciPy's leastsq
    let solver = LevenbergMarquardt::new().with_tol(TOL).with_gtol(0.);
    let (problem, report) = solve(solver, problem, &[0., 0.]);
    assert!(
        matches!(report.termination.info(), 1..=3),
        "{:?}",
        report.termination
    );
    assert_relative_eq!(
        problem.params,
        DVector::from_vec(vec![0.7, -1.3]),
        epsilon = 1e-6
    );
    assert!(report.objective_function < 1e-20);
}

#[derive(Clone)]
struct Rosenbrock {
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64> for Rosenbrock {
    fn set_params(&mut self, params: &DVector<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let p = &self.params;
        Some(DVector::from_vec(vec![10. * (p[1] - p[0] * p[0]), 1. - p[0]]))
    }

    #[rustfmt::skip]
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let p = &self.params;
        Some(DMatrix::from_row_slice(2, 2, &[
            -20. * p[0], 10.,
                    -1.,  0.,
        ]))
    }
}

#[test]
fn test_rosenbrock() {
    let mut problem = Rosenbrock {
        params: DVector::zeros(2),
    };
    check_jacobian(&mut problem, &[0.7, -0.4], 1e-8);

    for &factor in [1., 10., 100.].iter() {
        let initial = [-1.2 * factor, factor];
        let (problem, report) =
            solve(LevenbergMarquardt::new().with_tol(TOL), problem.clone(), &initial);
        assert!(report.termination.was_successful(), "{:?}", report);
        assert_relative_eq!(report.objective_function, 0., epsilon = 1e-20);
        assert_relative_eq!(problem.params, DVector::from_element(2, 1.), epsilon = 1e-10);
    }
}

#[derive(Clone)]
struct HelicalValley {
    params: DVector<f64>,
}

const TPI: f64 = ::core::f64::consts::PI * 2.;

impl LeastSquaresProblem<f64> for HelicalValley {
    fn set_params(&mut self, params: &DVector<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let p = &self.params;
        let tmp1 = if p[0] == 0. {
            (0.25f64).copysign(p[1])
        } else if p[0] > 0. {
            (p[1] / p[0]).atan() / TPI
        } else {
            (p[1] / p[0]).atan() / TPI + 0.5
        };
        let tmp2 = (p[0] * p[0] + p[1] * p[1]).sqrt();
        Some(DVector::from_vec(vec![
            10. * (p[2] - 10. * tmp1),
            10. * (tmp2 - 1.),
            p[2],
        ]))
    }

    #[rustfmt::skip]
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let p = &self.params;
        let temp = p[0] * p[0] + p[1] * p[1];
        let tmp1 = TPI * temp;
        let tmp2 = temp.sqrt();
        Some(DMatrix::from_row_slice(3, 3, &[
            100. * p[1] / tmp1, -100. * p[0] / tmp1, 10.,
             10. * p[0] / tmp2,   10. * p[1] / tmp2,  0.,
                            0.,                  0.,  1.,
        ]))
    }
}

#[test]
fn test_helical_valley() {
    let mut problem = HelicalValley {
        params: DVector::zeros(3),
    };
    check_jacobian(&mut problem, &[0.8, 0.3, -0.2], 1e-7);

    for &factor in [1., 10., 100.].iter() {
        let (problem, report) = solve(
            LevenbergMarquardt::new().with_tol(TOL),
            problem.clone(),
            &[-factor, 0., 0.],
        );
        assert!(report.termination.was_successful(), "{:?}", report);
        assert!(report.objective_function < 1e-30);
        assert_relative_eq!(
            problem.params,
            DVector::from_vec(vec![1., 0., 0.]),
            epsilon = 1e-12
        );
    }
}

#[derive(Clone)]
struct FreudensteinRoth {
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64> for FreudensteinRoth {
    fn set_params(&mut self, params: &DVector<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let p = &self.params;
        Some(DVector::from_vec(vec![
            -13. + p[0] + ((5. - p[1]) * p[1] - 2.) * p[1],
            -29. + p[0] + ((1. + p[1]) * p[1] - 14.) * p[1],
        ]))
    }

    #[rustfmt::skip]
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let p = &self.params;
        Some(DMatrix::from_row_slice(2, 2, &[
            1., p[1] * (10. - 3. * p[1]) - 2.,
            1., p[1] * (2. + 3. * p[1]) - 14.,
        ]))
    }
}

#[test]
fn test_freudenstein_roth_local_minimum() {
    let mut problem = FreudensteinRoth {
        params: DVector::zeros(2),
    };
    check_jacobian(&mut problem, &[1.5, -0.7], 1e-8);

    let (problem, report) = solve(
        LevenbergMarquardt::new().with_tol(TOL),
        problem,
        &[0.5, -2.],
    );
    // the local minimum, not the zero residual solution (5, 4)
    assert!(report.termination.was_successful(), "{:?}", report);
    assert_relative_eq!(report.objective_function, 24.492126863534953, epsilon = 1e-6);
    assert_relative_eq!(
        problem.params,
        DVector::from_vec(vec![11.412484465499368, -0.8968279137315035]),
        epsilon = 1e-2
    );
}

#[test]
fn test_patience() {
    let problem = Rosenbrock {
        params: DVector::zeros(2),
    };
    let (problem, report) = solve(
        LevenbergMarquardt::new().with_tol(TOL).with_patience(3),
        problem,
        &[-120., 100.],
    );
    assert_eq!(report.termination, TerminationReason::LostPatience);
    assert_eq!(report.number_of_evaluations, 3);
    // the parameters are those of the best residuals seen
    let objective = problem.residuals().unwrap().norm_squared() * 0.5;
    assert_relative_eq!(objective, report.objective_function);
}

#[test]
fn test_unscaled_diagonal() {
    let problem = Rosenbrock {
        params: DVector::zeros(2),
    };
    let (problem, report) = solve(
        LevenbergMarquardt::new().with_tol(TOL).with_scale_diag(false),
        problem,
        &[-1.2, 1.],
    );
    assert!(report.termination.was_successful(), "{:?}", report);
    assert_relative_eq!(problem.params, DVector::from_element(2, 1.), epsilon = 1e-8);
}
