//! Linear-system backend.
//!
//! A [`LinearSolver`] picks one of six strategies from the [`SolverConfig`]
//! flags, factorises (or preconditions) a [`SystemMatrix`] once in
//! [`LinearSolver::prepare`], and then solves any number of right-hand sides
//! against the same matrix through [`PreparedSystem::solve`].

pub mod dense;
pub mod iterative;
pub mod matrix;
pub mod sparse;

use log::{debug, trace};
use nalgebra::DVector;
use serde::Serialize;
use std::fmt;
use std::time::Instant;

use crate::config::SolverConfig;
use crate::error::{Result, SimError};

pub use matrix::{MatrixBuilder, MnaScalar, Representation, SystemMatrix};

use dense::{DenseCholesky, DenseLu};
use iterative::{JacobiPreconditioner, Termination};
use sparse::{SparseCholesky, SparseLu};

/// Pivots (and Cholesky diagonals) below this fraction of the largest matrix
/// entry are treated as zero.
pub const PIVOT_TOLERANCE: f64 = 1e-13;

/// Relative asymmetry accepted when SPD is assumed
const SYMMETRY_TOLERANCE: f64 = 1e-12;

/// Solution strategy, fixed by the `sparse` / `iterative` / `assume_spd` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    DenseLu,
    DenseCholesky,
    SparseLu,
    SparseCholesky,
    ConjugateGradient,
    BiConjugateGradient,
}

impl Strategy {
    pub fn select(config: &SolverConfig) -> Self {
        match (config.iterative, config.sparse, config.assume_spd) {
            (true, _, true) => Strategy::ConjugateGradient,
            (true, _, false) => Strategy::BiConjugateGradient,
            (false, false, false) => Strategy::DenseLu,
            (false, false, true) => Strategy::DenseCholesky,
            (false, true, false) => Strategy::SparseLu,
            (false, true, true) => Strategy::SparseCholesky,
        }
    }

    pub fn is_iterative(&self) -> bool {
        matches!(self, Strategy::ConjugateGradient | Strategy::BiConjugateGradient)
    }

    pub fn requires_spd(&self) -> bool {
        matches!(
            self,
            Strategy::DenseCholesky | Strategy::SparseCholesky | Strategy::ConjugateGradient
        )
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::DenseLu => "dense LU",
            Strategy::DenseCholesky => "dense Cholesky",
            Strategy::SparseLu => "sparse LU",
            Strategy::SparseCholesky => "sparse Cholesky",
            Strategy::ConjugateGradient => "CG",
            Strategy::BiConjugateGradient => "Bi-CG",
        };
        write!(f, "{}", name)
    }
}

/// Solver statistics for one right-hand side
#[derive(Debug, Clone, Serialize)]
pub struct SolverStats {
    pub strategy: Strategy,
    /// Krylov iterations; zero for direct methods
    pub iterations: usize,
    /// `‖A x - b‖ / ‖b‖` of the returned solution
    pub residual: f64,
    /// Wall time of the solve in seconds
    pub solve_time: f64,
}

/// Solution vector together with how it was obtained
#[derive(Debug, Clone)]
pub struct Solution<T: MnaScalar> {
    pub x: DVector<T>,
    pub stats: SolverStats,
}

enum Method<T: MnaScalar> {
    DenseLu(DenseLu<T>),
    DenseCholesky(DenseCholesky<T>),
    SparseLu(SparseLu<T>),
    SparseCholesky(SparseCholesky<T>),
    ConjugateGradient(JacobiPreconditioner<T>),
    BiConjugateGradient(JacobiPreconditioner<T>),
}

/// Linear system solver
#[derive(Debug, Clone)]
pub struct LinearSolver {
    config: SolverConfig,
}

impl Default for LinearSolver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl LinearSolver {
    pub fn new(config: SolverConfig) -> Self {
        LinearSolver { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn strategy(&self) -> Strategy {
        Strategy::select(&self.config)
    }

    /// Factorise (direct) or precondition (iterative) `matrix`.
    ///
    /// A matrix held in the other representation than the strategy expects
    /// is converted first.
    pub fn prepare<T: MnaScalar>(&self, matrix: &SystemMatrix<T>) -> Result<PreparedSystem<T>> {
        self.config.validate()?;
        if !matrix.is_square() {
            return Err(SimError::Shape {
                context: "system matrix",
                expected: matrix.dim(),
                found: match matrix {
                    SystemMatrix::Dense(m) => m.ncols(),
                    SystemMatrix::Sparse(m) => m.cols(),
                },
            });
        }

        let strategy = self.strategy();
        let start = Instant::now();

        if strategy.requires_spd() {
            let asymmetry = matrix.asymmetry();
            if asymmetry > SYMMETRY_TOLERANCE * matrix.max_abs().max(1.0) {
                return Err(SimError::NotSymmetric { asymmetry });
            }
        }

        let method = match strategy {
            Strategy::DenseLu => Method::DenseLu(DenseLu::factor(&matrix.to_dense())?),
            Strategy::DenseCholesky => {
                Method::DenseCholesky(DenseCholesky::factor(&matrix.to_dense())?)
            }
            Strategy::SparseLu => Method::SparseLu(SparseLu::factor(&matrix.to_sparse())?),
            Strategy::SparseCholesky => {
                Method::SparseCholesky(SparseCholesky::factor(&matrix.to_sparse())?)
            }
            Strategy::ConjugateGradient | Strategy::BiConjugateGradient => {
                if let Some(row) = matrix.empty_row() {
                    return Err(SimError::singular(format!("row {} has no entries", row)));
                }
                let precond = JacobiPreconditioner::new(matrix);
                if strategy == Strategy::ConjugateGradient {
                    Method::ConjugateGradient(precond)
                } else {
                    Method::BiConjugateGradient(precond)
                }
            }
        };

        debug!(
            "Prepared {} for n = {} (nnz {}) in {:.3} ms",
            strategy,
            matrix.dim(),
            matrix.nnz(),
            start.elapsed().as_secs_f64() * 1e3
        );

        let max_iterations = self
            .config
            .max_iterations
            .unwrap_or_else(|| (2 * matrix.dim()).max(1));

        Ok(PreparedSystem {
            matrix: matrix.clone(),
            method,
            strategy,
            stop: Termination {
                tolerance: self.config.tolerance,
                max_iterations,
            },
        })
    }

    /// One-shot `prepare` + `solve`.
    pub fn solve<T: MnaScalar>(
        &self,
        matrix: &SystemMatrix<T>,
        rhs: &DVector<T>,
    ) -> Result<Solution<T>> {
        self.prepare(matrix)?.solve(rhs, None)
    }
}

/// A matrix ready to be solved against repeatedly.
pub struct PreparedSystem<T: MnaScalar> {
    matrix: SystemMatrix<T>,
    method: Method<T>,
    strategy: Strategy,
    stop: Termination,
}

impl<T: MnaScalar> PreparedSystem<T> {
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn matrix(&self) -> &SystemMatrix<T> {
        &self.matrix
    }

    /// Solve `A x = rhs`. Iterative strategies start from `guess` when given
    /// (warm start), otherwise from zero; direct strategies ignore it.
    pub fn solve(&self, rhs: &DVector<T>, guess: Option<&DVector<T>>) -> Result<Solution<T>> {
        let n = self.matrix.dim();
        if rhs.len() != n {
            return Err(SimError::Shape {
                context: "right-hand side",
                expected: n,
                found: rhs.len(),
            });
        }
        if let Some(g) = guess {
            if g.len() != n {
                return Err(SimError::Shape {
                    context: "initial guess",
                    expected: n,
                    found: g.len(),
                });
            }
        }

        let start = Instant::now();
        let initial = || guess.cloned().unwrap_or_else(|| DVector::zeros(n));

        let (x, iterations) = match &self.method {
            Method::DenseLu(lu) => (lu.solve(rhs)?, 0),
            Method::DenseCholesky(chol) => (chol.solve(rhs), 0),
            Method::SparseLu(lu) => (lu.solve(rhs)?, 0),
            Method::SparseCholesky(chol) => (chol.solve(rhs)?, 0),
            Method::ConjugateGradient(precond) => {
                let result =
                    iterative::conjugate_gradient(&self.matrix, precond, rhs, initial(), self.stop)?;
                (result.x, result.iterations)
            }
            Method::BiConjugateGradient(precond) => {
                let result = iterative::biconjugate_gradient(
                    &self.matrix,
                    precond,
                    rhs,
                    initial(),
                    self.stop,
                )?;
                (result.x, result.iterations)
            }
        };

        let residual = relative_residual(&self.matrix, &x, rhs);
        if !residual.is_finite() {
            return Err(SimError::singular("solution is not finite"));
        }

        let stats = SolverStats {
            strategy: self.strategy,
            iterations,
            residual,
            solve_time: start.elapsed().as_secs_f64(),
        };
        trace!(
            "{} solve: {} iterations, residual {:.3e}",
            stats.strategy,
            stats.iterations,
            stats.residual
        );

        Ok(Solution { x, stats })
    }
}

/// `‖A x - b‖ / ‖b‖`, with `‖b‖ = 0` treated as 1
pub fn relative_residual<T: MnaScalar>(
    matrix: &SystemMatrix<T>,
    x: &DVector<T>,
    b: &DVector<T>,
) -> f64 {
    let norm_b = b.norm();
    let scale = if norm_b == 0.0 { 1.0 } else { norm_b };
    (matrix.mul_vec(x) - b).norm() / scale
}
