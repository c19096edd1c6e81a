use nalgebra::{storage::RawStorage, Dim, Matrix, RealField};
use num_traits::Float;

mod finite_difference;

pub use finite_difference::differentiate_numerically;
pub(crate) use finite_difference::{central_difference_gradient, central_difference_jacobian};
pub(crate) use finite_difference::forward_difference_jacobian;

/// Machine epsilon of `F`.
#[inline]
pub(crate) fn epsmch<F: Float>() -> F {
    F::epsilon()
}

/// Dot product of two vector-shaped matrices of the same length.
///
/// Unlike `Matrix::dot` this accepts a row and a column view.
pub(crate) fn dot<F, R1, C1, S1, R2, C2, S2>(a: &Matrix<F, R1, C1, S1>, b: &Matrix<F, R2, C2, S2>) -> F
where
    F: RealField + Copy,
    R1: Dim,
    C1: Dim,
    S1: RawStorage<F, R1, C1>,
    R2: Dim,
    C2: Dim,
    S2: RawStorage<F, R2, C2>,
{
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .fold(F::zero(), |acc, (x, y)| acc + *x * *y)
}

/// Euclidean norm.
///
/// With the `minpack-compat` feature this is MINPACK's `ENORM`, which sums
/// small, intermediate and large components separately to avoid underflow and
/// overflow.
pub(crate) fn enorm<F, R, C, S>(v: &Matrix<F, R, C, S>) -> F
where
    F: RealField + Float,
    R: Dim,
    C: Dim,
    S: RawStorage<F, R, C>,
{
    cfg_if::cfg_if! {
        if #[cfg(feature = "minpack-compat")] {
            minpack_enorm(v)
        } else {
            Float::sqrt(v.iter().fold(F::zero(), |acc, x| acc + *x * *x))
        }
    }
}

#[cfg(feature = "minpack-compat")]
fn minpack_enorm<F, R, C, S>(v: &Matrix<F, R, C, S>) -> F
where
    F: RealField + Float,
    R: Dim,
    C: Dim,
    S: RawStorage<F, R, C>,
{
    use nalgebra::convert;

    let rdwarf: F = convert(3.834e-20);
    let rgiant: F = convert(1.304e19);
    let agiant = rgiant / convert(v.len() as f64);

    let (mut s1, mut s2, mut s3) = (F::zero(), F::zero(), F::zero());
    let (mut x1max, mut x3max) = (F::zero(), F::zero());
    for x in v.iter() {
        let xabs = Float::abs(*x);
        if xabs > rdwarf && xabs < agiant {
            s2 += xabs * xabs;
        } else if xabs <= rdwarf {
            if xabs > x3max {
                s3 = F::one() + s3 * Float::powi(x3max / xabs, 2);
                x3max = xabs;
            } else if !xabs.is_zero() {
                s3 += Float::powi(xabs / x3max, 2);
            }
        } else if xabs > x1max {
            s1 = F::one() + s1 * Float::powi(x1max / xabs, 2);
            x1max = xabs;
        } else {
            s1 += Float::powi(xabs / x1max, 2);
        }
    }

    if !s1.is_zero() {
        x1max * Float::sqrt(s1 + (s2 / x1max) / x1max)
    } else if !s2.is_zero() {
        if s2 >= x3max {
            Float::sqrt(s2 * (F::one() + (x3max / s2) * (x3max * s3)))
        } else {
            Float::sqrt(x3max * ((s2 / x3max) + (x3max * s3)))
        }
    } else {
        x3max * Float::sqrt(s3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn test_enorm() {
        let v = DVector::from_vec(vec![3.0f64, -4.0]);
        assert_relative_eq!(enorm(&v), 5.0);
        assert_eq!(enorm(&DVector::<f64>::zeros(3)), 0.0);
        let tiny = DVector::from_vec(vec![1e-200f64, 1e-200]);
        assert!(enorm(&tiny) >= 0.0);
    }

    #[test]
    fn test_dot_row_and_column() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0f64, 2.0, 3.0, 4.0]);
        let v = DVector::from_vec(vec![1.0f64, 1.0]);
        assert_relative_eq!(dot(&m.row(1), &v), 7.0);
        assert_relative_eq!(dot(&m.column(1), &v), 6.0);
    }
}
