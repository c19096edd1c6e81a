use crate::{EndCriteria, EndCriteriaType, Problem, Result};

/// Common interface of the optimization methods.
///
/// `minimize` starts from [`Problem::current_value`] and leaves the best
/// point it found there, together with its function value. Running out of
/// iterations is reported through the returned [`EndCriteriaType`], not as
/// an error.
pub trait OptimizationMethod {
    fn minimize(
        &mut self,
        problem: &mut Problem<'_>,
        end_criteria: &mut EndCriteria,
    ) -> Result<EndCriteriaType>;
}
