use approx::assert_relative_eq;
#[cfg(not(feature = "minpack-compat"))]
use core::f64::{INFINITY, MIN_POSITIVE, NAN};

use nalgebra::{DMatrix, DVector};

use super::test_helpers::{MockCall, MockProblem};
use super::{LevenbergMarquardt, TerminationReason};
use crate::LeastSquaresProblem;

fn vector(values: &[f64]) -> DVector<f64> {
    DVector::from_column_slice(values)
}

#[test]
#[cfg(not(feature = "minpack-compat"))]
fn nan_or_inf_none_residual() {
    // residuals return None
    let problem = MockProblem::new(DVector::zeros(2), vec![]);
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(report.termination, TerminationReason::User("residuals"));
    assert_eq!(report.number_of_evaluations, 1);
    assert_eq!(problem.calls(), [MockCall::Residuals]);
    assert!(report.objective_function.is_nan());

    // residuals return inf
    let problem = MockProblem::new(DVector::zeros(2), vec![Some(vector(&[1., 1., INFINITY]))]);
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(
        report.termination,
        TerminationReason::Numerical("residuals norm")
    );
    assert_eq!(report.number_of_evaluations, 1);
    assert_eq!(problem.calls(), [MockCall::Residuals]);
    assert_eq!(report.objective_function, INFINITY);

    // residuals return nan
    let problem = MockProblem::new(DVector::zeros(2), vec![Some(vector(&[1., 1., NAN]))]);
    let (_, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(
        report.termination,
        TerminationReason::Numerical("residuals norm")
    );
    assert!(report.objective_function.is_nan());
    assert!(!report.termination.was_successful());
    assert_eq!(report.termination.info(), -2);
}

#[test]
#[cfg(not(feature = "minpack-compat"))]
fn already_zero() {
    let problem = MockProblem::new(DVector::zeros(2), vec![Some(DVector::zeros(3))]);
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(report.termination, TerminationReason::ResidualsZero);
    assert_eq!(report.number_of_evaluations, 1);
    assert_eq!(problem.calls(), [MockCall::Residuals]);
    assert_eq!(report.objective_function, 0.);

    let problem = MockProblem::new(vector(&[10.]), vec![Some(vector(&[MIN_POSITIVE]))]);
    let (_, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(report.termination, TerminationReason::ResidualsZero);
    assert!(report.termination.was_successful());
}

#[test]
fn no_params() {
    let problem = MockProblem::new(DVector::zeros(0), vec![Some(DVector::from_element(3, 1.))]);
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(report.termination, TerminationReason::NoParameters);
    assert_eq!(report.number_of_evaluations, 1);
    assert_eq!(problem.calls(), [MockCall::Residuals]);
    assert!(report.termination.was_bad_input());
    assert_eq!(report.termination.info(), 0);
}

#[test]
fn too_few_residuals() {
    let problem = MockProblem::new(DVector::zeros(3), vec![Some(DVector::from_element(2, 1.))]);
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(report.termination, TerminationReason::NotEnoughResiduals);
    assert_eq!(report.number_of_evaluations, 1);
    assert_eq!(problem.calls(), [MockCall::Residuals]);
}

#[test]
fn jacobian_failures() {
    let problem = MockProblem::new(vector(&[2., 2.]), vec![Some(vector(&[0.5, 1.]))]);
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(report.termination, TerminationReason::User("jacobian"));
    assert_eq!(problem.calls(), [MockCall::Residuals, MockCall::Jacobian]);
    assert_relative_eq!(
        report.objective_function,
        vector(&[0.5, 1.]).norm_squared() * 0.5
    );

    let problem = MockProblem::new(vector(&[2., 2.]), vec![Some(vector(&[0.5, 1.]))])
        .with_jacobians(vec![Some(DMatrix::identity(3, 2))]);
    let (_, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(
        report.termination,
        TerminationReason::WrongDimensions("jacobian")
    );

    let mut jacobian = DMatrix::identity(2, 2);
    jacobian[(1, 0)] = f64::NAN;
    let problem = MockProblem::new(vector(&[2., 2.]), vec![Some(vector(&[0.5, 1.]))])
        .with_jacobians(vec![Some(jacobian)]);
    let (_, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(report.termination, TerminationReason::Numerical("jacobian"));
}

#[test]
fn orthogonal_residuals() {
    let problem = MockProblem::new(vector(&[1.]), vec![Some(vector(&[1., 0.]))])
        .with_jacobians(vec![Some(DMatrix::from_column_slice(2, 1, &[0., 1.]))]);
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(report.termination, TerminationReason::Orthogonal);
    assert_eq!(report.termination.info(), 4);
    assert_eq!(problem.calls(), [MockCall::Residuals, MockCall::Jacobian]);
}

#[test]
fn forward_differences_restore_params() {
    // constant residuals give a zero Jacobian
    let problem = MockProblem::new(
        vector(&[3.]),
        vec![Some(vector(&[2.])), Some(vector(&[2.]))],
    );
    let (problem, report) = LevenbergMarquardt::new().with_epsfcn(1e-8).minimize(problem);
    assert_eq!(report.termination, TerminationReason::Orthogonal);
    assert_eq!(report.number_of_evaluations, 2);
    assert_eq!(
        problem.calls(),
        [
            MockCall::Residuals,
            MockCall::SetParams,
            MockCall::Residuals,
            MockCall::SetParams
        ]
    );
    assert_eq!(problem.params()[0], 3.);
}

#[test]
fn rejected_step_restores_params() {
    // the trial step makes things worse, then the user aborts
    let problem = MockProblem::new(
        vector(&[1.]),
        vec![Some(vector(&[1.])), Some(vector(&[10.]))],
    )
    .with_jacobians(vec![Some(DMatrix::from_element(1, 1, 1.))]);
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    assert_eq!(report.termination, TerminationReason::User("residuals"));
    assert_eq!(
        problem.calls(),
        [
            MockCall::Residuals,
            MockCall::Jacobian,
            MockCall::SetParams,
            MockCall::Residuals,
            MockCall::SetParams,
            MockCall::SetParams,
            MockCall::Residuals,
        ]
    );
    // the second, shorter trial step is left in place by the abort
    assert!(problem.params()[0] < 1.);
}

#[test]
fn info_codes() {
    let cases = [
        (TerminationReason::Converged { ftol: true, xtol: false }, 1),
        (TerminationReason::Converged { ftol: false, xtol: true }, 2),
        (TerminationReason::Converged { ftol: true, xtol: true }, 3),
        (TerminationReason::LostPatience, 5),
        (TerminationReason::NoImprovementPossible("ftol"), 6),
        (TerminationReason::NoImprovementPossible("xtol"), 7),
        (TerminationReason::NoImprovementPossible("gtol"), 8),
        (TerminationReason::User("jacobian"), -1),
    ];
    for (reason, info) in cases.iter() {
        assert_eq!(reason.info(), *info, "{:?}", reason);
    }
}
