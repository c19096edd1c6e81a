use nalgebra::DVector;

use super::{DirectionStrategy, Iterate};

/// Always search along the negative gradient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SteepestDescentDirection;

impl DirectionStrategy for SteepestDescentDirection {
    fn name(&self) -> &'static str {
        "steepest descent"
    }

    fn next_direction(
        &mut self,
        _previous: Iterate<'_>,
        current: Iterate<'_>,
        _direction: &DVector<f64>,
    ) -> DVector<f64> {
        -current.gradient
    }
}
