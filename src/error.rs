//! Error types of the optimization framework.
//!
//! Running out of iterations is not an error. It is reported through
//! [`EndCriteriaType`](crate::EndCriteriaType) or
//! [`TerminationReason`](crate::TerminationReason) and must be inspected by
//! the caller.

use thiserror::Error;

/// Failures that stop an optimization run.
///
/// # Examples
///
/// ```
/// use calibration_optim::Error;
///
/// let err = Error::InfeasibleStep { attempts: 200 };
/// assert_eq!(format!("{}", err), "can't update parameter vector after 200 step halvings");
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A precondition was violated (dimensions, configuration ranges).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The step could not be shrunk into the feasible region.
    #[error("can't update parameter vector after {attempts} step halvings")]
    InfeasibleStep {
        /// Number of halvings performed before giving up
        attempts: usize,
    },

    /// The starting point violates the constraint.
    #[error("initial guess is not in the feasible region")]
    InfeasibleStart,

    /// The cost function could not be evaluated.
    #[error("cost function failed: {0}")]
    CostFunction(String),

    /// The residual callback asked the solver to stop.
    #[error("user requested termination")]
    UserAbort,

    /// The least-squares driver finished with an info code that cannot be
    /// mapped onto an end criterion.
    #[error("MINPACK: {reason} (info = {info})")]
    Minpack {
        /// MINPACK style `info` code
        info: i32,
        /// Human readable description of the code
        reason: &'static str,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::InvalidArgument("dimensions of A and b don't match".to_string());
        assert_eq!(
            format!("{}", err),
            "invalid argument: dimensions of A and b don't match"
        );
        let err = Error::Minpack {
            info: 7,
            reason: "xtol is too small",
        };
        assert_eq!(format!("{}", err), "MINPACK: xtol is too small (info = 7)");
    }
}
