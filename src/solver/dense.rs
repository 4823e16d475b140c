use log::debug;
use nalgebra::linalg::{Cholesky, LU};
use nalgebra::{DMatrix, DVector, Dyn};

use super::{MnaScalar, PIVOT_TOLERANCE};
use crate::error::{Result, SimError};

/// Dense LU factorisation with partial pivoting
pub struct DenseLu<T: MnaScalar> {
    lu: LU<T, Dyn, Dyn>,
}

impl<T: MnaScalar> DenseLu<T> {
    pub fn factor(matrix: &DMatrix<T>) -> Result<Self> {
        let scale = max_abs(matrix);
        if scale == 0.0 {
            return Err(SimError::singular("matrix has no non-zero entry"));
        }

        let lu = matrix.clone().lu();
        let u = lu.u();
        for i in 0..u.nrows() {
            let pivot = u[(i, i)].modulus();
            if !(pivot > PIVOT_TOLERANCE * scale) {
                return Err(SimError::singular(format!(
                    "pivot {:.3e} at elimination step {} (largest entry {:.3e})",
                    pivot, i, scale
                )));
            }
        }

        debug!("Dense LU factorised, n = {}", matrix.nrows());
        Ok(DenseLu { lu })
    }

    pub fn solve(&self, rhs: &DVector<T>) -> Result<DVector<T>> {
        self.lu
            .solve(rhs)
            .ok_or_else(|| SimError::singular("LU back-substitution failed"))
    }
}

/// Dense Cholesky factorisation `A = L Lᴴ`
pub struct DenseCholesky<T: MnaScalar> {
    chol: Cholesky<T, Dyn>,
}

impl<T: MnaScalar> DenseCholesky<T> {
    pub fn factor(matrix: &DMatrix<T>) -> Result<Self> {
        let scale = max_abs(matrix);
        if scale == 0.0 {
            return Err(SimError::singular("matrix has no non-zero entry"));
        }

        let chol = matrix
            .clone()
            .cholesky()
            .ok_or(SimError::NotPositiveDefinite)?;

        // A semi-definite matrix (floating node) slips through with a ~0 diagonal
        let l = chol.l();
        for i in 0..l.nrows() {
            let d = l[(i, i)].modulus();
            if !(d * d > PIVOT_TOLERANCE * scale) {
                return Err(SimError::singular(format!(
                    "Cholesky diagonal {:.3e} at row {}",
                    d, i
                )));
            }
        }

        debug!("Dense Cholesky factorised, n = {}", matrix.nrows());
        Ok(DenseCholesky { chol })
    }

    pub fn solve(&self, rhs: &DVector<T>) -> DVector<T> {
        self.chol.solve(rhs)
    }
}

fn max_abs<T: MnaScalar>(matrix: &DMatrix<T>) -> f64 {
    matrix.iter().fold(0.0f64, |acc, v| acc.max(v.modulus()))
}
