//! Sparse direct factorisations backed by `faer`.
//!
//! The CSR matrix from the assembler is handed to faer as column-major
//! triplets. The factor is kept so a prepared system can solve many
//! right-hand sides against one factorisation.

use faer::prelude::*;
use faer::sparse::linalg::solvers::{Llt, Lu};
use faer::sparse::{SparseColMat, Triplet};
use faer::{Mat, Side};
use log::debug;
use nalgebra::DVector;
use sprs::CsMat;

use super::MnaScalar;
use crate::error::{Result, SimError};

/// Copy `matrix` into faer's compressed-column form.
///
/// Rows or columns with no stored value are reported here, because faer
/// only notices them as a symbolic failure without an index we can name.
fn to_faer<T: MnaScalar>(matrix: &CsMat<T>) -> Result<SparseColMat<usize, T>> {
    let n = matrix.rows();
    let mut row_filled = vec![false; n];
    let mut col_filled = vec![false; matrix.cols()];
    let mut triplets = Vec::with_capacity(matrix.nnz());

    for (value, (row, col)) in matrix.iter() {
        if *value == T::zero() {
            continue;
        }
        if !value.is_finite() {
            return Err(SimError::singular(format!(
                "entry ({}, {}) is not finite",
                row, col
            )));
        }
        row_filled[row] = true;
        col_filled[col] = true;
        triplets.push(Triplet::new(row, col, *value));
    }

    if let Some(row) = row_filled.iter().position(|f| !f) {
        return Err(SimError::singular(format!("row {} has no entries", row)));
    }
    if let Some(col) = col_filled.iter().position(|f| !f) {
        return Err(SimError::singular(format!("unknown {} appears in no equation", col)));
    }

    SparseColMat::<usize, T>::try_new_from_triplets(n, matrix.cols(), &triplets)
        .map_err(|e| SimError::singular(format!("sparse matrix build failed: {:?}", e)))
}

fn to_column<T: MnaScalar>(rhs: &DVector<T>) -> Mat<T> {
    Mat::<T>::from_fn(rhs.len(), 1, |i, _| rhs[i])
}

/// Copy faer's solution back, rejecting the NaN/Inf a zero pivot leaves.
fn from_column<T: MnaScalar>(x: &Mat<T>, what: &str) -> Result<DVector<T>> {
    let out = DVector::from_fn(x.nrows(), |i, _| x[(i, 0)]);
    if out.iter().any(|v| !v.is_finite()) {
        return Err(SimError::singular(format!("{} produced a non-finite solution", what)));
    }
    Ok(out)
}

/// Sparse LU with partial pivoting
pub struct SparseLu<T: MnaScalar> {
    factor: Lu<usize, T>,
}

impl<T: MnaScalar> SparseLu<T> {
    pub fn factor(matrix: &CsMat<T>) -> Result<Self> {
        let a = to_faer(matrix)?;
        let factor = a
            .sp_lu()
            .map_err(|e| SimError::singular(format!("sparse LU factorisation failed: {:?}", e)))?;
        debug!("Sparse LU factorised, n = {}, nnz = {}", matrix.rows(), matrix.nnz());
        Ok(SparseLu { factor })
    }

    pub fn solve(&self, rhs: &DVector<T>) -> Result<DVector<T>> {
        let x = self.factor.solve(to_column(rhs));
        from_column(&x, "sparse LU")
    }
}

/// Sparse Cholesky, `A = L Lᴴ`. Only the lower triangle of `A` is read.
pub struct SparseCholesky<T: MnaScalar> {
    factor: Llt<usize, T>,
}

impl<T: MnaScalar> SparseCholesky<T> {
    pub fn factor(matrix: &CsMat<T>) -> Result<Self> {
        let a = to_faer(matrix)?;
        let factor = a.sp_cholesky(Side::Lower).map_err(|e| {
            debug!("Sparse Cholesky failed: {:?}", e);
            SimError::NotPositiveDefinite
        })?;
        debug!("Sparse Cholesky factorised, n = {}, nnz = {}", matrix.rows(), matrix.nnz());
        Ok(SparseCholesky { factor })
    }

    pub fn solve(&self, rhs: &DVector<T>) -> Result<DVector<T>> {
        let x = self.factor.solve(to_column(rhs));
        from_column(&x, "sparse Cholesky")
    }
}
