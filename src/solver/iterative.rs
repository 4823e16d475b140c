//! Jacobi-preconditioned Krylov solvers, generic over real and complex scalars.
//!
//! Inner products conjugate their left operand, so the same code serves
//! Hermitian (CG) and general (Bi-CG) complex systems.

use log::trace;
use nalgebra::DVector;

use super::{MnaScalar, Strategy, SystemMatrix};
use crate::error::{Result, SimError};

/// Diagonal (Jacobi) preconditioner `M = diag(A)`.
///
/// Zero diagonal entries, such as voltage-source branch rows, are replaced by one.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner<T: MnaScalar> {
    inv_diag: DVector<T>,
}

impl<T: MnaScalar> JacobiPreconditioner<T> {
    pub fn new(matrix: &SystemMatrix<T>) -> Self {
        let inv_diag = matrix.diagonal().map(|d| {
            if d == T::zero() {
                T::one()
            } else {
                T::one() / d
            }
        });
        JacobiPreconditioner { inv_diag }
    }

    /// `M⁻¹ r`
    pub fn apply(&self, r: &DVector<T>) -> DVector<T> {
        r.component_mul(&self.inv_diag)
    }

    /// `M⁻ᴴ r`
    pub fn apply_adjoint(&self, r: &DVector<T>) -> DVector<T> {
        r.zip_map(&self.inv_diag, |v, d| v * d.conjugate())
    }
}

/// Outcome of a converged Krylov run
#[derive(Debug, Clone)]
pub struct KrylovResult<T: MnaScalar> {
    pub x: DVector<T>,
    pub iterations: usize,
    /// Relative residual of the recurrence at exit
    pub residual: f64,
}

/// Stopping rule shared by both methods
#[derive(Debug, Clone, Copy)]
pub struct Termination {
    pub tolerance: f64,
    pub max_iterations: usize,
}

fn rhs_scale<T: MnaScalar>(b: &DVector<T>) -> f64 {
    let norm = b.norm();
    if norm == 0.0 {
        1.0
    } else {
        norm
    }
}

fn breakdown(strategy: Strategy, iteration: usize, reason: &str) -> SimError {
    SimError::Breakdown {
        strategy,
        iteration,
        reason: reason.to_string(),
    }
}

/// Preconditioned conjugate gradient for SPD (Hermitian positive definite) systems.
pub fn conjugate_gradient<T: MnaScalar>(
    matrix: &SystemMatrix<T>,
    precond: &JacobiPreconditioner<T>,
    b: &DVector<T>,
    x0: DVector<T>,
    stop: Termination,
) -> Result<KrylovResult<T>> {
    let strategy = Strategy::ConjugateGradient;
    let norm_b = rhs_scale(b);
    let mut x = x0;
    let mut r = b - matrix.mul_vec(&x);
    let mut p = DVector::zeros(b.len());
    let mut rho_prev = T::one();
    let mut residual = r.norm() / norm_b;
    let mut iterations = 0;

    while residual >= stop.tolerance {
        if iterations == stop.max_iterations {
            return Err(SimError::NoConvergence {
                strategy,
                iterations,
                residual,
            });
        }
        iterations += 1;

        let z = precond.apply(&r);
        let rho = r.dotc(&z);
        if rho == T::zero() {
            return Err(breakdown(strategy, iterations, "rho vanished"));
        }

        if iterations == 1 {
            p = z;
        } else {
            let beta = rho / rho_prev;
            p = z + p * beta;
        }
        rho_prev = rho;

        let q = matrix.mul_vec(&p);
        let curvature = p.dotc(&q);
        if curvature == T::zero() {
            return Err(breakdown(strategy, iterations, "search direction has zero curvature"));
        }
        let alpha = rho / curvature;

        x.axpy(alpha, &p, T::one());
        r.axpy(-alpha, &q, T::one());

        residual = r.norm() / norm_b;
        if !residual.is_finite() {
            return Err(breakdown(strategy, iterations, "residual is not finite"));
        }
        trace!("CG iteration {}: relative residual {:.3e}", iterations, residual);
    }

    Ok(KrylovResult {
        x,
        iterations,
        residual,
    })
}

/// Preconditioned bi-conjugate gradient for general square systems.
///
/// The shadow sequence runs on `Aᴴ` with the adjoint preconditioner.
pub fn biconjugate_gradient<T: MnaScalar>(
    matrix: &SystemMatrix<T>,
    precond: &JacobiPreconditioner<T>,
    b: &DVector<T>,
    x0: DVector<T>,
    stop: Termination,
) -> Result<KrylovResult<T>> {
    let strategy = Strategy::BiConjugateGradient;
    let norm_b = rhs_scale(b);
    let mut x = x0;
    let mut r = b - matrix.mul_vec(&x);
    // r0 alone is orthogonal to A·M⁻¹·r0 when b only drives voltage-source
    // rows, so the shadow also carries that product.
    let mut r_shadow = &r + matrix.mul_vec(&precond.apply(&r));
    let mut p = DVector::zeros(b.len());
    let mut p_shadow = DVector::zeros(b.len());
    let mut rho_prev = T::one();
    let mut residual = r.norm() / norm_b;
    let mut iterations = 0;

    while residual >= stop.tolerance {
        if iterations == stop.max_iterations {
            return Err(SimError::NoConvergence {
                strategy,
                iterations,
                residual,
            });
        }
        iterations += 1;

        let z = precond.apply(&r);
        let z_shadow = precond.apply_adjoint(&r_shadow);
        let rho = r_shadow.dotc(&z);
        if rho == T::zero() {
            return Err(breakdown(strategy, iterations, "rho vanished"));
        }

        if iterations == 1 {
            p = z;
            p_shadow = z_shadow;
        } else {
            let beta = rho / rho_prev;
            p = z + p * beta;
            p_shadow = z_shadow + p_shadow * beta.conjugate();
        }
        rho_prev = rho;

        let q = matrix.mul_vec(&p);
        let q_shadow = matrix.adjoint_mul_vec(&p_shadow);
        let omega = p_shadow.dotc(&q);
        if omega == T::zero() {
            return Err(breakdown(strategy, iterations, "shadow direction is orthogonal"));
        }
        let alpha = rho / omega;

        x.axpy(alpha, &p, T::one());
        r.axpy(-alpha, &q, T::one());
        r_shadow.axpy(-alpha.conjugate(), &q_shadow, T::one());

        residual = r.norm() / norm_b;
        if !residual.is_finite() {
            return Err(breakdown(strategy, iterations, "residual is not finite"));
        }
        trace!("Bi-CG iteration {}: relative residual {:.3e}", iterations, residual);
    }

    Ok(KrylovResult {
        x,
        iterations,
        residual,
    })
}
