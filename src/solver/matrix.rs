use nalgebra::{ComplexField, DMatrix, DVector};
use num_complex::Complex64;
use sprs::{CsMat, TriMat};

/// Scalar types the engine assembles and solves: `f64` for DC/transient,
/// `Complex64` for AC. The faer bound lets the sparse factorisations run
/// on the same scalar.
pub trait MnaScalar:
    ComplexField<RealField = f64> + faer::traits::ComplexField + Copy + Send + Sync + 'static
{
}

impl MnaScalar for f64 {}
impl MnaScalar for Complex64 {}

/// Storage chosen for the system matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Dense,
    Sparse,
}

impl Representation {
    pub fn from_flag(sparse: bool) -> Self {
        if sparse {
            Representation::Sparse
        } else {
            Representation::Dense
        }
    }
}

/// Assembled MNA matrix.
///
/// Sparse matrices are kept in CSR form; the stored non-zero count travels
/// with the matrix through [`SystemMatrix::nnz`].
#[derive(Debug, Clone)]
pub enum SystemMatrix<T: MnaScalar> {
    Dense(DMatrix<T>),
    Sparse(CsMat<T>),
}

impl<T: MnaScalar> SystemMatrix<T> {
    pub fn dim(&self) -> usize {
        match self {
            SystemMatrix::Dense(m) => m.nrows(),
            SystemMatrix::Sparse(m) => m.rows(),
        }
    }

    pub fn is_square(&self) -> bool {
        match self {
            SystemMatrix::Dense(m) => m.is_square(),
            SystemMatrix::Sparse(m) => m.rows() == m.cols(),
        }
    }

    /// Number of non-zero entries
    pub fn nnz(&self) -> usize {
        match self {
            SystemMatrix::Dense(m) => m.iter().filter(|v| **v != T::zero()).count(),
            SystemMatrix::Sparse(m) => m.nnz(),
        }
    }

    pub fn representation(&self) -> Representation {
        match self {
            SystemMatrix::Dense(_) => Representation::Dense,
            SystemMatrix::Sparse(_) => Representation::Sparse,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> T {
        match self {
            SystemMatrix::Dense(m) => m[(row, col)],
            SystemMatrix::Sparse(m) => m.get(row, col).copied().unwrap_or_else(T::zero),
        }
    }

    /// `A * x`
    pub fn mul_vec(&self, x: &DVector<T>) -> DVector<T> {
        match self {
            SystemMatrix::Dense(m) => m * x,
            SystemMatrix::Sparse(m) => {
                let mut result = DVector::zeros(m.rows());
                for (value, (row, col)) in m.iter() {
                    result[row] += *value * x[col];
                }
                result
            }
        }
    }

    /// `Aᴴ * x` (plain transpose for real matrices)
    pub fn adjoint_mul_vec(&self, x: &DVector<T>) -> DVector<T> {
        match self {
            SystemMatrix::Dense(m) => m.adjoint() * x,
            SystemMatrix::Sparse(m) => {
                let mut result = DVector::zeros(m.cols());
                for (value, (row, col)) in m.iter() {
                    result[col] += value.conjugate() * x[row];
                }
                result
            }
        }
    }

    pub fn diagonal(&self) -> DVector<T> {
        let n = self.dim();
        DVector::from_fn(n, |i, _| self.get(i, i))
    }

    /// Largest entry magnitude, used to scale pivot thresholds
    pub fn max_abs(&self) -> f64 {
        match self {
            SystemMatrix::Dense(m) => m.iter().fold(0.0f64, |acc, v| acc.max(v.modulus())),
            SystemMatrix::Sparse(m) => m.iter().fold(0.0f64, |acc, (v, _)| acc.max(v.modulus())),
        }
    }

    /// Largest `|a_ij - conj(a_ji)|`; zero for a self-adjoint matrix.
    pub fn asymmetry(&self) -> f64 {
        match self {
            SystemMatrix::Dense(m) => {
                let mut worst = 0.0f64;
                for i in 0..m.nrows() {
                    for j in (i + 1)..m.ncols() {
                        worst = worst.max((m[(i, j)] - m[(j, i)].conjugate()).modulus());
                    }
                }
                for i in 0..m.nrows() {
                    worst = worst.max(m[(i, i)].imaginary().abs());
                }
                worst
            }
            SystemMatrix::Sparse(m) => {
                let mut worst = 0.0f64;
                for (value, (row, col)) in m.iter() {
                    let mirror = m.get(col, row).copied().unwrap_or_else(T::zero);
                    worst = worst.max((*value - mirror.conjugate()).modulus());
                }
                worst
            }
        }
    }

    /// First row holding no non-zero entry, if any
    pub fn empty_row(&self) -> Option<usize> {
        match self {
            SystemMatrix::Dense(m) => {
                (0..m.nrows()).find(|&i| m.row(i).iter().all(|v| *v == T::zero()))
            }
            SystemMatrix::Sparse(m) => {
                let mut filled = vec![false; m.rows()];
                for (value, (row, _)) in m.iter() {
                    if *value != T::zero() {
                        filled[row] = true;
                    }
                }
                filled.iter().position(|f| !f)
            }
        }
    }

    pub fn to_dense(&self) -> DMatrix<T> {
        match self {
            SystemMatrix::Dense(m) => m.clone(),
            SystemMatrix::Sparse(m) => {
                let mut dense = DMatrix::zeros(m.rows(), m.cols());
                for (value, (row, col)) in m.iter() {
                    dense[(row, col)] += *value;
                }
                dense
            }
        }
    }

    pub fn to_sparse(&self) -> CsMat<T> {
        match self {
            SystemMatrix::Sparse(m) => m.clone(),
            SystemMatrix::Dense(m) => {
                let mut triplets = TriMat::new((m.nrows(), m.ncols()));
                for i in 0..m.nrows() {
                    for j in 0..m.ncols() {
                        if m[(i, j)] != T::zero() {
                            triplets.add_triplet(i, j, m[(i, j)]);
                        }
                    }
                }
                triplets.to_csr()
            }
        }
    }
}

/// Accumulates stamps before the matrix is frozen into a [`SystemMatrix`].
pub enum MatrixBuilder<T: MnaScalar> {
    Dense(DMatrix<T>),
    Triplets(TriMat<T>),
}

impl<T: MnaScalar> MatrixBuilder<T> {
    pub fn new(size: usize, representation: Representation) -> Self {
        match representation {
            Representation::Dense => MatrixBuilder::Dense(DMatrix::zeros(size, size)),
            Representation::Sparse => MatrixBuilder::Triplets(TriMat::new((size, size))),
        }
    }

    /// Add `value` at `(row, col)`; repeated positions are summed.
    pub fn add(&mut self, row: usize, col: usize, value: T) {
        match self {
            MatrixBuilder::Dense(m) => m[(row, col)] += value,
            MatrixBuilder::Triplets(t) => t.add_triplet(row, col, value),
        }
    }

    pub fn finish(self) -> SystemMatrix<T> {
        match self {
            MatrixBuilder::Dense(m) => SystemMatrix::Dense(m),
            MatrixBuilder::Triplets(t) => SystemMatrix::Sparse(t.to_csr()),
        }
    }
}
