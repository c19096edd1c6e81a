//! Pivoted QR factorization and a specialized LLS solver.
//!
//! The QR factorization is used to implement an efficient solver for the
//! linear least squares problem which is repeatedly required to be
//! solved in the LM algorithm. The same machinery backs the standalone
//! [`qr_decomposition`] and [`qr_solve`] entry points.
use nalgebra::{convert, DMatrix, DMatrixView, DVector, RealField};
use num_traits::Float;

use crate::utils::{dot, enorm, epsmch};
use crate::{Error, Result};

/// Pivoted QR decomposition.
///
/// Let `$\mathbf{A}\in\R^{m\times n}$` with `$m\geq n$`.
/// Then this algorithm computes a permutation matrix `$\mathbf{P}$`,
/// a matrix `$\mathbf{Q}\in\R^{m\times n}$` with orthonormal columns
/// and an upper triangular matrix `$\mathbf{R}\in\R^{n\times n}$` such that
/// ```math
/// \mathbf{A} \mathbf{P} = \mathbf{Q}\mathbf{R}.
/// ```
/// The diagonal of `$\mathbf{R}$` is non-increasing in magnitude when
/// pivoting is enabled.
#[derive(Debug, Clone)]
pub struct PivotedQR<F: RealField + Float> {
    /// The column norms of the input matrix `$\mathbf{A}$`
    column_norms: DVector<F>,
    /// Strictly upper part of `$\mathbf{R}$` and the Householder transformations,
    /// combined in one matrix.
    qr: DMatrix<F>,
    /// Diagonal entries of R
    r_diag: DVector<F>,
    /// Entry `$j$` is the column of `$\mathbf{A}$` moved to position `$j$`.
    permutation: Vec<usize>,
    work: DVector<F>,
}

impl<F: RealField + Float> PivotedQR<F> {
    /// Create a pivoted QR decomposition of a matrix `$\mathbf{A}\in\R^{m\times n}$`
    /// with `$m \geq n$`.
    ///
    /// # Errors
    ///
    /// Only returns `Err` when `$m < n$`.
    pub fn new(a: DMatrix<F>) -> Result<Self> {
        Self::with_pivoting(a, true)
    }

    /// Same as [`new`](#method.new) but column pivoting can be switched off,
    /// in which case the permutation is the identity.
    pub fn with_pivoting(mut a: DMatrix<F>, pivot: bool) -> Result<Self> {
        // The implementation is based more or less on LAPACK's "xGEQPF"
        let n = a.ncols();
        if a.nrows() < n {
            return Err(Error::InvalidArgument(format!(
                "QR factorization needs at least as many rows as columns, got {}x{}",
                a.nrows(),
                n
            )));
        }
        let column_norms = DVector::from_iterator(n, a.column_iter().map(|c| enorm(&c)));
        let mut r_diag = column_norms.clone();
        let mut work = column_norms.clone();
        let mut permutation: Vec<usize> = (0..n).collect();
        let z05: F = convert(0.05f64);
        for j in 0..n {
            if pivot {
                let kmax = r_diag.rows_range(j..).imax() + j;
                if kmax != j {
                    a.swap_columns(j, kmax);
                    permutation.swap(j, kmax);
                    r_diag[kmax] = r_diag[j];
                    work[kmax] = work[j];
                }
            }
            // compute Householder reflection vector w_j to
            // reduce the j-th column
            let mut lower = a.rows_range_mut(j..);
            let (left, mut right) = lower.columns_range_pair_mut(j, j + 1..);
            let w_j = {
                let mut axis = left;
                let mut aj_norm = enorm(&axis);
                if aj_norm.is_zero() {
                    r_diag[j] = F::zero();
                    continue;
                }
                if axis[0].is_negative() {
                    aj_norm = -aj_norm;
                }
                r_diag[j] = -aj_norm;
                axis /= aj_norm;
                axis[0] += F::one();
                axis
            };
            // apply reflection to remaining columns
            for (k, mut col) in right.column_iter_mut().enumerate() {
                let k = k + j + 1;
                col.axpy(-(dot(&col, &w_j) / w_j[0]), &w_j, F::one());
                // update partial column norms
                // see "Lapack Working Note 176"
                if r_diag[k].is_zero() {
                    continue;
                }
                let temp = Float::powi(col[0] / r_diag[k], 2);
                r_diag[k] *= Float::sqrt(Float::max(F::one() - temp, F::zero()));
                if z05 * Float::powi(r_diag[k] / work[k], 2) <= epsmch() {
                    r_diag[k] = enorm(&col.rows_range(1..));
                    work[k] = r_diag[k];
                }
            }
        }
        Ok(Self {
            column_norms,
            qr: a,
            permutation,
            r_diag,
            work,
        })
    }

    /// The column permutation. Column `$j$` of `$\mathbf{A}\mathbf{P}$` is
    /// column `permutation()[j]` of `$\mathbf{A}$`.
    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    /// Norms of the columns of `$\mathbf{A}$` before pivoting.
    pub fn column_norms(&self) -> &DVector<F> {
        &self.column_norms
    }

    /// The upper triangular factor `$\mathbf{R}\in\R^{n\times n}$`.
    pub fn r(&self) -> DMatrix<F> {
        let n = self.qr.ncols();
        let mut r = self.qr.view((0, 0), (n, n)).upper_triangle();
        r.set_diagonal(&self.r_diag);
        r
    }

    /// Accumulate the Householder reflections into `$\mathbf{Q}\in\R^{m\times n}$`.
    pub fn q(&self) -> DMatrix<F> {
        let (m, n) = self.qr.shape();
        let mut q = DMatrix::identity(m, n);
        for j in (0..n).rev() {
            let w_j = self.qr.view_range(j.., j);
            if w_j[0].is_zero() {
                continue;
            }
            for mut col in q.column_iter_mut() {
                let mut part = col.rows_range_mut(j..);
                let scale = -(dot(&part, &w_j) / w_j[0]);
                part.axpy(scale, &w_j, F::one());
            }
        }
        q
    }

    /// Consume the QR-decomposition and transform it into
    /// a parametrized least squares problem.
    ///
    /// See [`LinearLeastSquaresDiagonalProblem`](struct.LinearLeastSquaresDiagonalProblem.html)
    /// for details.
    pub fn into_least_squares_diagonal_problem(
        mut self,
        mut b: DVector<F>,
    ) -> LinearLeastSquaresDiagonalProblem<F> {
        debug_assert_eq!(b.nrows(), self.qr.nrows());
        // compute first n-entries of Q^T * b
        let n = self.qr.ncols();
        let mut qt_b = DVector::zeros(n);
        for j in 0..n {
            let axis = self.qr.view_range(j.., j);
            if !axis[0].is_zero() {
                let temp = -dot(&b.rows_range(j..), &axis) / axis[0];
                b.rows_range_mut(j..).axpy(temp, &axis, F::one());
            }
            qt_b[j] = b[j];
        }
        self.qr.set_diagonal(&self.r_diag);
        LinearLeastSquaresDiagonalProblem {
            qt_b,
            column_norms: self.column_norms,
            upper_r: self.qr,
            l_diag: self.r_diag,
            permutation: self.permutation,
            work: self.work,
        }
    }
}

/// Parametrized linear least squares problem for the LM algorithm.
///
/// The problem is of the form
/// ```math
///   \min_{\vec{x}\in\R^n}\frac{1}{2}\Bigl\|
///     \begin{bmatrix}
///        \mathbf{A} \\
///        \mathbf{D}
///     \end{bmatrix}\vec{x} -
///     \begin{bmatrix}
///         \vec{b} \\
///         \vec{0}
///     \end{bmatrix}
///   \Bigr\|^2,
/// ```
/// for a matrix `$\mathbf{A}\in\R^{m \times n}$`, diagonal matrix
/// `$\mathbf{D}\in\R^n$` and vector `$\vec{b}\in\R^m$`.
/// Everything except the diagonal matrix `$\mathbf{D}$` is considered
/// fixed.
///
/// The problem can be efficiently solved for a sequence of diagonal
/// matrices `$\mathbf{D}$`.
///
/// You must create an instance of this by first computing a pivotized
/// QR decomposition of `$\mathbf{A}$`, then use
/// [`into_least_squares_diagonal_problem`](struct.PivotedQR.html#method.into_least_squares_diagonal_problem).
#[derive(Debug, Clone)]
pub struct LinearLeastSquaresDiagonalProblem<F: RealField + Float> {
    /// The first `$n$` entries of `$\mathbf{Q}^\top \vec{b}$`.
    qt_b: DVector<F>,
    /// Upper part of `$\mathbf{R}$`, also used to store strictly lower part of `$\mathbf{L}$`.
    upper_r: DMatrix<F>,
    /// Diagonal entries of `$\mathbf{L}$`.
    l_diag: DVector<F>,
    permutation: Vec<usize>,
    pub(crate) column_norms: DVector<F>,
    work: DVector<F>,
}

/// Triangular factor returned by the solvers of
/// [`LinearLeastSquaresDiagonalProblem`](struct.LinearLeastSquaresDiagonalProblem.html).
///
/// It is either `$\mathbf{R}$` of the QR decomposition (for a zero diagonal)
/// or the lower triangular `$\mathbf{L}$` with
/// `$\mathbf{P}^\top(\mathbf{A}^\top\mathbf{A} + \mathbf{D}\mathbf{D})\mathbf{P} = \mathbf{L}\mathbf{L}^\top$`.
pub struct CholeskyFactor<'a, F: RealField + Float> {
    pub permutation: &'a [usize],
    l: DMatrixView<'a, F>,
    work: &'a mut DVector<F>,
    qt_b: &'a DVector<F>,
    lower: bool,
    l_diag: &'a DVector<F>,
}

impl<F: RealField + Float> CholeskyFactor<'_, F> {
    /// Solve the equation `$\mathbf{L}\vec{x} = \mathbf{P}^\top \vec{b}$`.
    pub fn solve(&mut self, mut rhs: DVector<F>) -> DVector<F> {
        for i in 0..self.work.nrows() {
            self.work[i] = rhs[self.permutation[i]];
        }
        if self.lower {
            let n = self.work.nrows();
            for j in 0..n {
                self.work[j] /= self.l_diag[j];
                let x = self.work[j];
                self.work
                    .rows_range_mut(j + 1..)
                    .axpy(-x, &self.l.view_range(j + 1.., j), F::one());
            }
        } else {
            for (j, col) in self.l.column_iter().enumerate() {
                let sum = if j == 0 {
                    F::zero()
                } else {
                    dot(&self.work.rows_range(..j), &col.rows_range(..j))
                };
                self.work[j] = (self.work[j] - sum) / col[j];
            }
        }
        core::mem::swap(self.work, &mut rhs);
        rhs
    }

    /// Computes `$\mathbf{L}\mathbf{Q}^\top\vec{b}$`.
    pub fn mul_qt_b(&mut self, mut out: DVector<F>) -> DVector<F> {
        out.fill(F::zero());
        if self.lower {
            for (i, col) in self.l.column_iter().enumerate() {
                out.rows_range_mut(i + 1..)
                    .axpy(self.qt_b[i], &col.rows_range(i + 1..), F::one());
                out[i] += self.qt_b[i] * self.l_diag[i];
            }
        } else {
            for (i, col) in self.l.column_iter().enumerate() {
                out[i] = dot(&self.qt_b.rows_range(..i + 1), &col.rows_range(..i + 1));
            }
        }
        out
    }

    /// Whether all diagonal entries of the factor are nonzero.
    pub fn is_non_singular(&self) -> bool {
        if self.lower {
            self.l_diag.iter().all(|d| !d.is_zero())
        } else {
            (0..self.l.ncols()).all(|j| !self.l[(j, j)].is_zero())
        }
    }
}

impl<F: RealField + Float> LinearLeastSquaresDiagonalProblem<F> {
    /// Compute scaled maximum of dot products between `$\vec{b}$` and the columns of `$\mathbf{A}$`.
    ///
    /// It computes
    /// ```math
    ///   \max_{i=1,\ldots,n}\frac{|(\mathbf{A}^\top \vec{b})_i|}{\|\mathbf{A}\vec{e}_i\|}.
    /// ```
    ///
    /// A fraction with column norm zero is counted as zero. If any
    /// of the computations are nan, `None` is returned.
    pub fn max_a_t_b_scaled(&mut self, b_norm: F) -> Option<F> {
        // compute max column of Ab scaled by column norm of A
        let b = &mut self.work;
        b.copy_from(&self.qt_b);
        *b /= b_norm;
        let mut max = F::zero();
        for (j, col) in self.upper_r.column_iter().enumerate() {
            let scale = self.column_norms[self.permutation[j]];
            if scale.is_zero() {
                continue;
            }
            let sum = dot(&col.rows_range(..j + 1), &b.rows_range(..j + 1));
            let temp = Float::abs(sum / scale);
            if temp.is_nan() {
                return None;
            }
            max = Float::max(max, temp);
        }
        Some(max)
    }

    /// Compute `$\|\mathbf{A}\vec{x}\| = \sqrt{\vec{x}^\top\mathbf{A}^\top\mathbf{A}\vec{x}}$`.
    pub fn a_x_norm(&mut self, x: &DVector<F>) -> F {
        self.work.fill(F::zero());
        for (i, (col, idx)) in self
            .upper_r
            .column_iter()
            .zip(self.permutation.iter())
            .enumerate()
        {
            self.work
                .rows_range_mut(..i + 1)
                .axpy(x[*idx], &col.rows_range(..i + 1), F::one());
        }
        enorm(&self.work)
    }

    /// Solve the linear least squares problem
    /// for a diagonal matrix `$\mathbf{D}$` (`diag`).
    ///
    /// This is equivalent to solving
    /// ```math
    /// (\mathbf{A}^\top\mathbf{A} + \mathbf{D}\mathbf{D})\vec{x} = \mathbf{A}^\top \vec{b}.
    /// ```
    ///
    /// # Return value
    ///
    /// Returns the solution `$\vec{x}$` and a reference to a lower triangular
    /// matrix `$\mathbf{L}\in\R^{n\times n}$` with
    /// ```math
    ///   \mathbf{P}^\top(\mathbf{A}^\top\mathbf{A} + \mathbf{D}\mathbf{D})\mathbf{P} = \mathbf{L}\mathbf{L}^\top.
    /// ```
    pub fn solve_with_diagonal(
        &mut self,
        diag: &DVector<F>,
        mut out: DVector<F>,
    ) -> (DVector<F>, CholeskyFactor<'_, F>) {
        out.copy_from(&self.qt_b);
        let mut rhs = self.eliminate_diag(diag, out /* rhs */);
        core::mem::swap(&mut self.work, &mut rhs);
        self.solve_after_elimination(rhs)
    }

    /// Solve the least squares problem with a zero diagonal.
    ///
    /// If `$\mathbf{R}$` is rank deficient the components belonging to the
    /// trailing zero pivots are set to zero.
    pub fn solve_with_zero_diagonal(&mut self) -> (DVector<F>, CholeskyFactor<'_, F>) {
        let n = self.upper_r.ncols();
        let rank = self.r_rank();
        self.work.copy_from(&self.qt_b);
        self.work.rows_range_mut(rank..).fill(F::zero());
        let l = self.upper_r.view((0, 0), (n, n));
        for j in (0..rank).rev() {
            let sum = dot(
                &l.view_range(j, j + 1..rank),
                &self.work.rows_range(j + 1..rank),
            );
            self.work[j] = (self.work[j] - sum) / l[(j, j)];
        }
        let mut x = DVector::zeros(n);
        for j in 0..n {
            x[self.permutation[j]] = self.work[j];
        }
        let chol = CholeskyFactor {
            permutation: &self.permutation,
            l,
            work: &mut self.work,
            qt_b: &self.qt_b,
            lower: false,
            l_diag: &self.l_diag,
        };
        (x, chol)
    }

    #[cfg(test)]
    pub fn has_full_rank(&self) -> bool {
        let n = self.upper_r.ncols();
        !(0..n).any(|j| self.upper_r[(j, j)].is_zero())
    }

    fn r_rank(&self) -> usize {
        let n = self.upper_r.ncols();
        (0..n)
            .position(|i| self.upper_r[(i, i)].is_zero())
            .unwrap_or(n)
    }

    fn rank(&self) -> usize {
        self.l_diag
            .iter()
            .position(|d| d.is_zero())
            .unwrap_or_else(|| self.l_diag.nrows())
    }

    fn solve_after_elimination(
        &mut self,
        mut x: DVector<F>,
    ) -> (DVector<F>, CholeskyFactor<'_, F>) {
        let rank = self.rank();
        let rhs = &mut self.work;
        rhs.rows_range_mut(rank..).fill(F::zero());

        let n = self.upper_r.ncols();
        let l = self.upper_r.view((0, 0), (n, n));

        // solve L^T * x = rhs
        for j in (0..rank).rev() {
            let dot = dot(&l.view_range(j + 1..rank, j), &rhs.rows_range(j + 1..rank));
            rhs[j] = (rhs[j] - dot) / self.l_diag[j];
        }

        for j in 0..n {
            x[self.permutation[j]] = rhs[j];
        }
        let cholesky_factor = CholeskyFactor {
            l,
            work: &mut self.work,
            permutation: &self.permutation,
            qt_b: &self.qt_b,
            lower: true,
            l_diag: &self.l_diag,
        };
        (x, cholesky_factor)
    }

    fn eliminate_diag(&mut self, diag: &DVector<F>, mut rhs: DVector<F>) -> DVector<F> {
        // only the lower triangular part is used, it is filled with R^T
        // and then iteratively overwritten with L.
        let n = self.upper_r.ncols();
        let mut r_and_l = self.upper_r.view_mut((0, 0), (n, n));
        r_and_l.fill_lower_triangle_with_upper_triangle();
        for j in 0..n {
            // save diagonal of R
            self.work[j] = r_and_l[(j, j)];
        }
        // eliminate the diagonal entries from D using Givens rotations
        let p5: F = convert(0.5);
        let p25: F = convert(0.25);
        for j in 0..n {
            let diag_entry = diag[self.permutation[j]];
            if !diag_entry.is_zero() {
                self.l_diag[j] = diag_entry;
                self.l_diag.rows_range_mut(j + 1..).fill(F::zero());

                let mut qtbpj = F::zero();
                for k in j..n {
                    if self.l_diag[k].is_zero() {
                        continue;
                    }
                    let r_kk = r_and_l[(k, k)];
                    // determine the Givens rotation
                    let (sin, cos) = if Float::abs(r_kk) < Float::abs(self.l_diag[k]) {
                        let cot = r_kk / self.l_diag[k];
                        let sin = p5 / Float::sqrt(p25 + p25 * (cot * cot));
                        (sin, sin * cot)
                    } else {
                        let tan = self.l_diag[k] / r_kk;
                        let cos = p5 / Float::sqrt(p25 + p25 * (tan * tan));
                        (cos * tan, cos)
                    };
                    // compute the modified diagonal element of R and (Q^T*b,0)
                    r_and_l[(k, k)] = cos * r_kk + sin * self.l_diag[k];
                    let temp = cos * rhs[k] + sin * qtbpj;
                    qtbpj = -sin * rhs[k] + cos * qtbpj;
                    rhs[k] = temp;

                    // accumulate the transformation in the row of L
                    for i in k + 1..n {
                        let r_ik = r_and_l[(i, k)];
                        let temp = cos * r_ik + sin * self.l_diag[i];
                        self.l_diag[i] = -sin * r_ik + cos * self.l_diag[i];
                        r_and_l[(i, k)] = temp;
                    }
                }
            }
            self.l_diag[j] = r_and_l[(j, j)];
            r_and_l[(j, j)] = self.work[j];
        }
        rhs
    }
}

/// Result of [`qr_decomposition`].
#[derive(Debug, Clone, PartialEq)]
pub struct QrDecomposition<F: RealField> {
    /// `$m\times n$` factor with orthonormal columns (if `$m\geq n$`).
    pub q: DMatrix<F>,
    /// Upper triangular `$n\times n$` factor.
    pub r: DMatrix<F>,
    /// Column permutation, see [`PivotedQR::permutation`].
    pub permutation: Vec<usize>,
}

/// QR decomposition `$\mathbf{A}\mathbf{P} = \mathbf{Q}\mathbf{R}$` of an arbitrary matrix.
///
/// If `$m < n$` the matrix is padded with zero rows before factorizing and
/// `$\mathbf{Q}$` is truncated to the first `$m$` rows afterwards, so the
/// product still reproduces `$\mathbf{A}\mathbf{P}$`.
///
/// # Example
///
/// ```
/// # use approx::assert_relative_eq;
/// # use nalgebra::DMatrix;
/// use calibration_optim::qr_decomposition;
///
/// let a = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
/// let qr = qr_decomposition(&a, true);
/// let mut ap = a.clone();
/// for (j, &p) in qr.permutation.iter().enumerate() {
///     ap.set_column(j, &a.column(p));
/// }
/// assert_relative_eq!(&qr.q * &qr.r, ap, epsilon = 1e-12);
/// ```
pub fn qr_decomposition<F: RealField + Float>(a: &DMatrix<F>, pivot: bool) -> QrDecomposition<F> {
    let (m, n) = a.shape();
    let padded = if m < n {
        let mut padded = DMatrix::zeros(n, n);
        padded.rows_mut(0, m).copy_from(a);
        padded
    } else {
        a.clone()
    };
    // m >= n holds after padding
    let qr = match PivotedQR::with_pivoting(padded, pivot) {
        Ok(qr) => qr,
        Err(_) => unreachable!("matrix was padded to at least as many rows as columns"),
    };
    let mut q = qr.q();
    if m < n {
        q = q.rows(0, m).into_owned();
    }
    QrDecomposition {
        r: qr.r(),
        permutation: qr.permutation,
        q,
    }
}

/// Solve `$\min_{\vec{x}}\|\mathbf{A}\vec{x} - \vec{b}\|^2 + \|\mathbf{D}\vec{x}\|^2$`
/// using a (pivoted) QR decomposition of `$\mathbf{A}$`.
///
/// `d` is the diagonal of `$\mathbf{D}$`, `None` means zero. With a zero
/// diagonal and a square, non-singular `$\mathbf{A}$` this is the solution of
/// `$\mathbf{A}\vec{x} = \vec{b}$`. Underdetermined systems are padded with
/// zero rows.
///
/// # Errors
///
/// Fails with [`Error::InvalidArgument`] if the dimensions of `a`, `b` and `d`
/// are inconsistent.
pub fn qr_solve<F: RealField + Float>(
    a: &DMatrix<F>,
    b: &DVector<F>,
    pivot: bool,
    d: Option<&DVector<F>>,
) -> Result<DVector<F>> {
    let (m, n) = a.shape();
    if b.nrows() != m {
        return Err(Error::InvalidArgument(format!(
            "dimensions of A ({}x{}) and b ({}) don't match",
            m,
            n,
            b.nrows()
        )));
    }
    if let Some(d) = d {
        if d.nrows() != n {
            return Err(Error::InvalidArgument(format!(
                "dimensions of A ({}x{}) and d ({}) don't match",
                m,
                n,
                d.nrows()
            )));
        }
    }
    let rows = m.max(n);
    let mut padded_a = DMatrix::zeros(rows, n);
    padded_a.rows_mut(0, m).copy_from(a);
    let mut padded_b = DVector::zeros(rows);
    padded_b.rows_mut(0, m).copy_from(b);

    let qr = PivotedQR::with_pivoting(padded_a, pivot)?;
    let mut lls = qr.into_least_squares_diagonal_problem(padded_b);
    let diag = d.cloned().unwrap_or_else(|| DVector::zeros(n));
    let (x, _) = lls.solve_with_diagonal(&diag, DVector::zeros(n));
    Ok(x)
}
