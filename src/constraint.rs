//! Feasible regions for the optimization methods.
//!
//! A [`Constraint`] decides feasibility with [`test`](Constraint::test) and
//! projects proposed steps back into the feasible region with
//! [`update`](Constraint::update), which halves the step until the new
//! point is feasible.
use nalgebra::DVector;

use crate::{Error, Result};

/// How often [`Constraint::update`] halves a step before giving up.
pub const MAX_STEP_HALVINGS: usize = 200;

pub trait Constraint {
    /// Whether `params` lies in the feasible region.
    fn test(&self, params: &DVector<f64>) -> bool;

    /// Per-coordinate upper bounds around `params`. These are component bounds
    /// and need not be tight for non-box regions.
    fn upper_bound(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(params.len(), f64::MAX)
    }

    /// Per-coordinate lower bounds around `params`.
    fn lower_bound(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(params.len(), -f64::MAX)
    }

    /// Move `params` to `params + step * direction`, halving `step` until the
    /// result is feasible. Returns the step actually taken.
    ///
    /// # Errors
    ///
    /// [`Error::InfeasibleStep`] after [`MAX_STEP_HALVINGS`] halvings. `params`
    /// is left untouched in that case.
    fn update(&self, params: &mut DVector<f64>, direction: &DVector<f64>, step: f64) -> Result<f64> {
        let mut step = step;
        let mut halvings = 0;
        let mut new_params = &*params + direction * step;
        while !self.test(&new_params) {
            if halvings == MAX_STEP_HALVINGS {
                return Err(Error::InfeasibleStep { attempts: halvings });
            }
            step *= 0.5;
            halvings += 1;
            new_params = &*params + direction * step;
        }
        *params = new_params;
        Ok(step)
    }
}

/// The whole space.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConstraint;

impl Constraint for NoConstraint {
    fn test(&self, _: &DVector<f64>) -> bool {
        true
    }
}

/// All coordinates strictly positive.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositiveConstraint;

impl Constraint for PositiveConstraint {
    fn test(&self, params: &DVector<f64>) -> bool {
        params.iter().all(|p| *p > 0.0)
    }

    fn upper_bound(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(params.len(), f64::MAX)
    }

    fn lower_bound(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::zeros(params.len())
    }
}

/// All coordinates in the same closed interval `[low, high]`.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundaryConstraint {
    low: f64,
    high: f64,
}

impl BoundaryConstraint {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        if low > high || low.is_nan() || high.is_nan() {
            return Err(Error::InvalidArgument(format!(
                "lower bound {} must not exceed upper bound {}",
                low, high
            )));
        }
        Ok(Self { low, high })
    }
}

impl Constraint for BoundaryConstraint {
    fn test(&self, params: &DVector<f64>) -> bool {
        params.iter().all(|p| *p >= self.low && *p <= self.high)
    }

    fn upper_bound(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(params.len(), self.high)
    }

    fn lower_bound(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(params.len(), self.low)
    }
}

/// Coordinate `i` in `[low[i], high[i]]`.
#[derive(Debug, Clone)]
pub struct NonhomogeneousBoundaryConstraint {
    low: DVector<f64>,
    high: DVector<f64>,
}

impl NonhomogeneousBoundaryConstraint {
    pub fn new(low: DVector<f64>, high: DVector<f64>) -> Result<Self> {
        if low.len() != high.len() {
            return Err(Error::InvalidArgument(format!(
                "upper and lower boundaries sizes are inconsistent ({} vs {})",
                low.len(),
                high.len()
            )));
        }
        Ok(Self { low, high })
    }
}

impl Constraint for NonhomogeneousBoundaryConstraint {
    fn test(&self, params: &DVector<f64>) -> bool {
        params.len() == self.low.len()
            && params
                .iter()
                .zip(self.low.iter().zip(self.high.iter()))
                .all(|(p, (l, h))| p >= l && p <= h)
    }

    fn upper_bound(&self, _: &DVector<f64>) -> DVector<f64> {
        self.high.clone()
    }

    fn lower_bound(&self, _: &DVector<f64>) -> DVector<f64> {
        self.low.clone()
    }
}

/// Intersection of two constraints.
#[derive(Debug, Clone)]
pub struct CompositeConstraint<A, B> {
    first: A,
    second: B,
}

impl<A: Constraint, B: Constraint> CompositeConstraint<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: Constraint, B: Constraint> Constraint for CompositeConstraint<A, B> {
    fn test(&self, params: &DVector<f64>) -> bool {
        self.first.test(params) && self.second.test(params)
    }

    fn upper_bound(&self, params: &DVector<f64>) -> DVector<f64> {
        self.first
            .upper_bound(params)
            .zip_map(&self.second.upper_bound(params), f64::min)
    }

    fn lower_bound(&self, params: &DVector<f64>) -> DVector<f64> {
        self.first
            .lower_bound(params)
            .zip_map(&self.second.lower_bound(params), f64::max)
    }
}

/// Maps between the full parameter vector and the subspace of free
/// parameters.
#[derive(Debug, Clone)]
pub struct Projection {
    actual_parameters: DVector<f64>,
    fix_parameters: Vec<bool>,
    number_of_free_parameters: usize,
}

impl Projection {
    /// `fix_parameters[i]` pins coordinate `i` to `parameter_values[i]`.
    pub fn new(parameter_values: DVector<f64>, fix_parameters: Vec<bool>) -> Result<Self> {
        if parameter_values.len() != fix_parameters.len() {
            return Err(Error::InvalidArgument(format!(
                "fix_parameters size ({}) does not match number of parameters ({})",
                fix_parameters.len(),
                parameter_values.len()
            )));
        }
        let number_of_free_parameters = fix_parameters.iter().filter(|fixed| !**fixed).count();
        if number_of_free_parameters == 0 {
            return Err(Error::InvalidArgument(
                "all parameters are fixed".to_string(),
            ));
        }
        Ok(Self {
            actual_parameters: parameter_values,
            fix_parameters,
            number_of_free_parameters,
        })
    }

    pub fn number_of_free_parameters(&self) -> usize {
        self.number_of_free_parameters
    }

    /// Free coordinates of a full parameter vector.
    pub fn project(&self, parameters: &DVector<f64>) -> Result<DVector<f64>> {
        if parameters.len() != self.fix_parameters.len() {
            return Err(Error::InvalidArgument(format!(
                "parameters size ({}) does not match projection size ({})",
                parameters.len(),
                self.fix_parameters.len()
            )));
        }
        let free = parameters
            .iter()
            .zip(&self.fix_parameters)
            .filter(|(_, fixed)| !**fixed)
            .map(|(p, _)| *p);
        Ok(DVector::from_iterator(self.number_of_free_parameters, free))
    }

    /// Full parameter vector with the fixed coordinates filled in.
    pub fn include(&self, projected_parameters: &DVector<f64>) -> Result<DVector<f64>> {
        if projected_parameters.len() != self.number_of_free_parameters {
            return Err(Error::InvalidArgument(format!(
                "projected parameters size ({}) does not match number of free parameters ({})",
                projected_parameters.len(),
                self.number_of_free_parameters
            )));
        }
        let mut parameters = self.actual_parameters.clone();
        let mut free = projected_parameters.iter();
        for (p, fixed) in parameters.iter_mut().zip(&self.fix_parameters) {
            if !fixed {
                if let Some(value) = free.next() {
                    *p = *value;
                }
            }
        }
        Ok(parameters)
    }
}

/// A constraint on the full space seen through a [`Projection`].
#[derive(Debug, Clone)]
pub struct ProjectedConstraint<C> {
    constraint: C,
    projection: Projection,
}

impl<C: Constraint> ProjectedConstraint<C> {
    pub fn new(constraint: C, projection: Projection) -> Self {
        Self {
            constraint,
            projection,
        }
    }

    fn projected_bound(
        &self,
        params: &DVector<f64>,
        bound: impl Fn(&C, &DVector<f64>) -> DVector<f64>,
        fallback: f64,
    ) -> DVector<f64> {
        self.projection
            .include(params)
            .and_then(|full| self.projection.project(&bound(&self.constraint, &full)))
            .unwrap_or_else(|_| DVector::from_element(params.len(), fallback))
    }
}

impl<C: Constraint> Constraint for ProjectedConstraint<C> {
    fn test(&self, params: &DVector<f64>) -> bool {
        self.projection
            .include(params)
            .map(|full| self.constraint.test(&full))
            .unwrap_or(false)
    }

    fn upper_bound(&self, params: &DVector<f64>) -> DVector<f64> {
        self.projected_bound(params, C::upper_bound, f64::MAX)
    }

    fn lower_bound(&self, params: &DVector<f64>) -> DVector<f64> {
        self.projected_bound(params, C::lower_bound, -f64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vector(values: &[f64]) -> DVector<f64> {
        DVector::from_column_slice(values)
    }

    #[test]
    fn test_positive_is_strict() {
        assert!(PositiveConstraint.test(&vector(&[1.0, 1e-300])));
        assert!(!PositiveConstraint.test(&vector(&[1.0, 0.0])));
        assert_eq!(PositiveConstraint.lower_bound(&vector(&[3.0])), vector(&[0.0]));
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let constraint = BoundaryConstraint::new(-1.0, 1.0).unwrap();
        assert!(constraint.test(&vector(&[-1.0, 1.0])));
        assert!(!constraint.test(&vector(&[-1.0, 1.0 + 1e-12])));
        assert!(BoundaryConstraint::new(1.0, -1.0).is_err());
    }

    #[test]
    fn test_update_halves_step() {
        let constraint = BoundaryConstraint::new(0.0, 1.0).unwrap();
        let mut params = vector(&[0.5]);
        let step = constraint.update(&mut params, &vector(&[1.0]), 2.0).unwrap();
        // 2 -> 1 -> 0.5 is the first feasible step
        assert_eq!(step, 0.5);
        assert_eq!(params, vector(&[1.0]));
    }

    #[test]
    fn test_update_gives_up() {
        let mut params = vector(&[1.0]);
        let result = PositiveConstraint.update(&mut params, &vector(&[f64::NAN]), 1.0);
        assert_eq!(
            result,
            Err(Error::InfeasibleStep {
                attempts: MAX_STEP_HALVINGS
            })
        );
        assert_eq!(params, vector(&[1.0]));
    }

    #[test]
    fn test_nonhomogeneous_boundary() {
        let constraint =
            NonhomogeneousBoundaryConstraint::new(vector(&[0.0, -2.0]), vector(&[1.0, 2.0]))
                .unwrap();
        assert!(constraint.test(&vector(&[0.5, -2.0])));
        assert!(!constraint.test(&vector(&[0.5, 2.5])));
        assert!(!constraint.test(&vector(&[0.5])));
        assert!(NonhomogeneousBoundaryConstraint::new(vector(&[0.0]), vector(&[1.0, 2.0])).is_err());
    }

    #[test]
    fn test_composite_bounds_intersect() {
        let composite = CompositeConstraint::new(
            PositiveConstraint,
            NonhomogeneousBoundaryConstraint::new(vector(&[-1.0, 0.5]), vector(&[3.0, 4.0]))
                .unwrap(),
        );
        let x = vector(&[1.0, 1.0]);
        assert!(composite.test(&x));
        assert!(!composite.test(&vector(&[-0.5, 1.0])));
        assert_eq!(composite.lower_bound(&x), vector(&[0.0, 0.5]));
        assert_eq!(composite.upper_bound(&x), vector(&[3.0, 4.0]));
    }

    #[test]
    fn test_projection_round_trip() {
        let projection =
            Projection::new(vector(&[1.0, 2.0, 3.0]), vec![false, true, false]).unwrap();
        assert_eq!(projection.number_of_free_parameters(), 2);
        let projected = projection.project(&vector(&[4.0, 5.0, 6.0])).unwrap();
        assert_eq!(projected, vector(&[4.0, 6.0]));
        assert_eq!(projection.include(&projected).unwrap(), vector(&[4.0, 2.0, 6.0]));
        assert!(projection.include(&vector(&[1.0])).is_err());
        assert!(Projection::new(vector(&[1.0]), vec![true]).is_err());
    }

    #[test]
    fn test_projected_constraint() {
        let projection = Projection::new(vector(&[-1.0, 2.0]), vec![true, false]).unwrap();
        let bounds =
            NonhomogeneousBoundaryConstraint::new(vector(&[-2.0, 0.0]), vector(&[0.0, 5.0]))
                .unwrap();
        let constraint = ProjectedConstraint::new(bounds, projection);
        assert!(constraint.test(&vector(&[4.0])));
        assert!(!constraint.test(&vector(&[6.0])));
        assert_eq!(constraint.upper_bound(&vector(&[1.0])), vector(&[5.0]));
        assert_eq!(constraint.lower_bound(&vector(&[1.0])), vector(&[0.0]));
    }

    proptest! {
        #[test]
        fn accepted_steps_are_feasible(
            start in proptest::collection::vec(0.01f64..10.0, 1..5),
            seed in proptest::collection::vec(-100.0f64..100.0, 5),
            step in 0.0f64..10.0,
        ) {
            let constraint = CompositeConstraint::new(
                PositiveConstraint,
                BoundaryConstraint::new(0.0, 10.0).unwrap(),
            );
            let mut params = DVector::from_vec(start.clone());
            let direction = DVector::from_iterator(start.len(), seed.iter().copied().take(start.len()));
            let taken = constraint.update(&mut params, &direction, step).unwrap();
            prop_assert!(constraint.test(&params));
            prop_assert!(taken <= step);
        }
    }
}
