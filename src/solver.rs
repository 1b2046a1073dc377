//! Outer Krylov and stationary iterations driven by a preconditioner, usually
//! the AMG cycle.

use crate::error::{AmgError, Result};
use crate::parallel_ops::{residual, spmv};
use crate::smoother::Smoother;
use crate::{CsrMatrix, Vector};

/// Action of an approximate inverse on a residual, in place.
pub trait Preconditioner {
    fn apply(&mut self, r: &mut Vector) -> Result<()>;
}

/// Any initialised smoother can be used as a (weak) preconditioner.
impl<S: Smoother> Preconditioner for S {
    fn apply(&mut self, r: &mut Vector) -> Result<()> {
        let mut c = Vector::zeros(r.len());
        self.apply_update_defect(&mut c, r)?;
        r.assign(&c);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SolveInfo {
    pub solution: Vector,
    pub converged: bool,
    pub iterations: usize,
    /// Relative residual (stationary) or relative preconditioned residual (PCG)
    /// after every iteration.
    pub history: Vec<f64>,
}

fn check_system(mat: &CsrMatrix, rhs: &Vector, initial_iterate: &Vector) -> Result<()> {
    if rhs.len() != mat.rows() {
        return Err(AmgError::DimensionMismatch {
            context: "right hand side",
            expected: mat.rows(),
            got: rhs.len(),
        });
    }
    if initial_iterate.len() != mat.cols() {
        return Err(AmgError::DimensionMismatch {
            context: "initial iterate",
            expected: mat.cols(),
            got: initial_iterate.len(),
        });
    }
    Ok(())
}

/// Stationary iterative method based on the preconditioner. Solves the
/// system Ax = b for x where 'mat' is A and 'rhs' is b, stopping once the
/// residual is reduced by 'epsilon'.
pub fn stationary(
    mat: &CsrMatrix,
    rhs: &Vector,
    initial_iterate: &Vector,
    max_iter: usize,
    epsilon: f64,
    preconditioner: &mut dyn Preconditioner,
) -> Result<SolveInfo> {
    check_system(mat, rhs, initial_iterate)?;
    let mut x = initial_iterate.clone();
    let mut r = residual(mat, rhs, &x);
    let r0_norm = r.dot(&r);
    let epsilon_squared = epsilon * epsilon;
    let mut history = Vec::new();

    for iter in 0..max_iter {
        let r_norm = r.dot(&r);
        if r0_norm > 0.0 {
            history.push((r_norm / r0_norm).sqrt());
        }

        if iter % 10 == 0 {
            trace!("squared norm iter {iter}: {r_norm:.3e}");
        }

        if r_norm <= epsilon_squared * r0_norm {
            info!("converged in {iter} iterations");
            return Ok(SolveInfo {
                solution: x,
                converged: true,
                iterations: iter,
                history,
            });
        }

        preconditioner.apply(&mut r)?;
        x += &r;
        r = residual(mat, rhs, &x);
    }

    let converged = r.dot(&r) <= epsilon_squared * r0_norm;
    if !converged {
        warn!("stationary iteration did not converge in {max_iter} iterations");
    }
    Ok(SolveInfo {
        solution: x,
        converged,
        iterations: max_iter,
        history,
    })
}

/// Preconditioned conjugate gradient. Solves the system Ax = b for x where
/// 'mat' is A and 'rhs' is b. The preconditioner has to be symmetric positive
/// definite.
pub fn pcg(
    mat: &CsrMatrix,
    rhs: &Vector,
    initial_iterate: &Vector,
    max_iter: usize,
    epsilon: f64,
    preconditioner: &mut dyn Preconditioner,
) -> Result<SolveInfo> {
    check_system(mat, rhs, initial_iterate)?;
    let mut x = initial_iterate.clone();
    let mut r = residual(mat, rhs, &x);
    let mut r_bar = r.clone();
    preconditioner.apply(&mut r_bar)?;
    let d0 = r.dot(&r_bar);
    let mut d = d0;
    let mut p = r_bar.clone();
    let mut history = Vec::new();

    if d0 <= 0.0 {
        return Ok(SolveInfo {
            solution: x,
            converged: d0 == 0.0,
            iterations: 0,
            history,
        });
    }

    for i in 0..max_iter {
        let mut g = spmv(mat, &p);
        let alpha = d / p.dot(&g);
        g *= alpha;
        x += &(alpha * &p);
        r -= &g;
        r_bar = r.clone();
        preconditioner.apply(&mut r_bar)?;
        let d_old = d;
        d = r.dot(&r_bar);
        history.push((d.abs() / d0).sqrt());

        if i % 10 == 0 {
            trace!("squared norm iter {i}: {d:.3e}");
        }

        if d < epsilon * epsilon * d0 {
            info!("converged in {} iterations", i + 1);
            return Ok(SolveInfo {
                solution: x,
                converged: true,
                iterations: i + 1,
                history,
            });
        }

        let beta = d / d_old;
        p *= beta;
        p += &r_bar;
    }

    warn!("PCG did not converge in {max_iter} iterations");
    Ok(SolveInfo {
        solution: x,
        converged: false,
        iterations: max_iter,
        history,
    })
}
