use core::cell::{Cell, RefCell};

use nalgebra::{DMatrix, DVector};

use crate::LeastSquaresProblem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    SetParams,
    Residuals,
    Jacobian,
}

/// Replays scripted residuals and Jacobians, `None` once a script runs out.
pub struct MockProblem {
    call_history: RefCell<Vec<MockCall>>,
    params: DVector<f64>,
    residuals: Vec<Option<DVector<f64>>>,
    residuals_index: Cell<usize>,
    jacobians: Vec<Option<DMatrix<f64>>>,
    jacobians_index: Cell<usize>,
}

impl MockProblem {
    pub fn new(params: DVector<f64>, residuals: Vec<Option<DVector<f64>>>) -> Self {
        Self {
            call_history: RefCell::new(vec![]),
            params,
            residuals,
            residuals_index: Cell::new(0),
            jacobians: vec![],
            jacobians_index: Cell::new(0),
        }
    }

    pub fn with_jacobians(self, jacobians: Vec<Option<DMatrix<f64>>>) -> Self {
        Self { jacobians, ..self }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.call_history.borrow().clone()
    }

    fn next<T: Clone>(script: &[Option<T>], index: &Cell<usize>) -> Option<T> {
        let i = index.get();
        index.set(i + 1);
        script.get(i).cloned().flatten()
    }
}

impl LeastSquaresProblem<f64> for MockProblem {
    fn set_params(&mut self, params: &DVector<f64>) {
        self.params = params.clone();
        self.call_history.borrow_mut().push(MockCall::SetParams);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.call_history.borrow_mut().push(MockCall::Residuals);
        Self::next(&self.residuals, &self.residuals_index)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        self.call_history.borrow_mut().push(MockCall::Jacobian);
        Self::next(&self.jacobians, &self.jacobians_index)
    }
}
