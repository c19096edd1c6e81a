use nalgebra::DVector;

use super::{DirectionStrategy, Iterate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConjugateGradientFormula {
    /// `beta = |g_new|^2 / |g_old|^2`
    #[default]
    FletcherReeves,
    /// `beta = max(0, g_new·(g_new - g_old) / |g_old|^2)`
    PolakRibiere,
}

/// Nonlinear conjugate gradient: `d = -g_new + beta d_old`.
///
/// Each line search starts at the minimizer of the quadratic model along `d`,
/// `-g·d / (c |d|^2)`, where `c = s·y / |s|^2` is the curvature seen over the
/// last step. Without a positive curvature estimate the first trial step is 1.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConjugateGradientDirection {
    formula: ConjugateGradientFormula,
    curvature: Option<f64>,
}

impl ConjugateGradientDirection {
    pub fn new(formula: ConjugateGradientFormula) -> Self {
        Self {
            formula,
            curvature: None,
        }
    }

    pub fn formula(&self) -> ConjugateGradientFormula {
        self.formula
    }
}

impl DirectionStrategy for ConjugateGradientDirection {
    fn name(&self) -> &'static str {
        match self.formula {
            ConjugateGradientFormula::FletcherReeves => "conjugate gradient (Fletcher-Reeves)",
            ConjugateGradientFormula::PolakRibiere => "conjugate gradient (Polak-Ribiere)",
        }
    }

    fn reset(&mut self, _dimension: usize) {
        self.curvature = None;
    }

    fn initial_step(
        &self,
        _previous_step: f64,
        gradient: &DVector<f64>,
        direction: &DVector<f64>,
    ) -> f64 {
        match self.curvature {
            Some(curvature) if curvature > 0.0 => {
                -gradient.dot(direction) / (curvature * direction.norm_squared())
            }
            _ => 1.0,
        }
    }

    fn next_direction(
        &mut self,
        previous: Iterate<'_>,
        current: Iterate<'_>,
        direction: &DVector<f64>,
    ) -> DVector<f64> {
        let s = current.x - previous.x;
        let y = current.gradient - previous.gradient;
        let s_norm_squared = s.norm_squared();
        self.curvature = (s_norm_squared > 0.0).then(|| s.dot(&y) / s_norm_squared);

        if previous.gradient_norm_squared == 0.0 {
            return -current.gradient;
        }
        let beta = match self.formula {
            ConjugateGradientFormula::FletcherReeves => {
                current.gradient_norm_squared / previous.gradient_norm_squared
            }
            ConjugateGradientFormula::PolakRibiere => {
                (current.gradient.dot(&y) / previous.gradient_norm_squared).max(0.0)
            }
        };
        direction * beta - current.gradient
    }
}
