//! Direct solvers for the coarsest level.

use std::sync::Arc;

use sprs_ldl::{Ldl, LdlNumeric};

use crate::error::{AmgError, Result};
use crate::parallel_ops::matmul_minus;
use crate::{CsrMatrix, Matrix, Vector};

pub trait BaseSolver: Send {
    fn name(&self) -> String;

    fn init(&mut self, mat: Arc<CsrMatrix>) -> Result<()>;

    /// Solves `A c = d` for `c` and updates the defect to `d - A c`.
    fn apply_return_defect(&mut self, correction: &mut Vector, defect: &mut Vector)
        -> Result<()>;
}

fn check_sizes(mat: &CsrMatrix, correction: &Vector, defect: &Vector) -> Result<()> {
    for (context, vec) in [("coarse correction", correction), ("coarse defect", defect)] {
        if vec.len() != mat.rows() {
            return Err(AmgError::DimensionMismatch {
                context,
                expected: mat.rows(),
                got: vec.len(),
            });
        }
    }
    Ok(())
}

enum Factorization {
    Sparse(LdlNumeric<f64, usize>),
    /// Inverse of the single entry of a `1 x 1` matrix (zero for an empty one).
    Scalar(f64),
}

/// Sparse `L D L^T` factorization, for symmetric coarse matrices.
#[derive(Default)]
pub struct LdlSolver {
    mat: Option<Arc<CsrMatrix>>,
    factorization: Option<Factorization>,
}

impl LdlSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BaseSolver for LdlSolver {
    fn name(&self) -> String {
        String::from("sparse LDL")
    }

    fn init(&mut self, mat: Arc<CsrMatrix>) -> Result<()> {
        self.factorization = None;
        self.mat = None;
        // the sparse factorization needs at least two rows
        let factorization = if mat.rows() <= 1 {
            if mat.rows() != mat.cols() {
                return Err(AmgError::NotSquare {
                    level: 0,
                    rows: mat.rows(),
                    cols: mat.cols(),
                });
            }
            match mat.rows() {
                0 => Factorization::Scalar(0.0),
                _ => match mat.get(0, 0).copied().unwrap_or(0.0) {
                    diag if diag == 0.0 => return Err(AmgError::SingularMatrix { column: 0 }),
                    diag => Factorization::Scalar(1.0 / diag),
                },
            }
        } else {
            Factorization::Sparse(
                Ldl::new()
                    .check_symmetry(sprs::SymmetryCheck::DontCheckSymmetry)
                    .numeric(mat.view())
                    .map_err(|e| AmgError::Factorization {
                        rows: mat.rows(),
                        reason: format!("{e:?}"),
                    })?,
            )
        };
        debug!("factorized coarse matrix with {} rows", mat.rows());
        self.factorization = Some(factorization);
        self.mat = Some(mat);
        Ok(())
    }

    fn apply_return_defect(
        &mut self,
        correction: &mut Vector,
        defect: &mut Vector,
    ) -> Result<()> {
        let (mat, factorization) = match (&self.mat, &self.factorization) {
            (Some(mat), Some(factorization)) => (mat, factorization),
            _ => return Err(AmgError::BaseSolverNotInitialized(self.name())),
        };
        check_sizes(mat, correction, defect)?;
        match factorization {
            Factorization::Sparse(ldl) => {
                let rhs = defect.to_vec();
                correction.assign(&Vector::from(ldl.solve(&rhs[..])));
            }
            Factorization::Scalar(inverse) => correction.assign(&(&*defect * *inverse)),
        }
        matmul_minus(mat, defect, correction);
        Ok(())
    }
}

/// Dense LU factorization with partial pivoting. Meant for small coarse
/// matrices, including non-symmetric ones.
#[derive(Default)]
pub struct DenseLu {
    mat: Option<Arc<CsrMatrix>>,
    lu: Matrix,
    pivots: Vec<usize>,
}

impl DenseLu {
    pub fn new() -> Self {
        Self::default()
    }

    fn factorize(mut lu: Matrix) -> Result<(Matrix, Vec<usize>)> {
        let n = lu.nrows();
        let mut pivots: Vec<usize> = (0..n).collect();
        for k in 0..n {
            let (pivot_row, pivot_val) = (k..n)
                .map(|i| (i, lu[[i, k]].abs()))
                .fold((k, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });
            if pivot_val == 0.0 {
                return Err(AmgError::SingularMatrix { column: k });
            }
            if pivot_row != k {
                for j in 0..n {
                    lu.swap([k, j], [pivot_row, j]);
                }
                pivots.swap(k, pivot_row);
            }
            let pivot = lu[[k, k]];
            for i in (k + 1)..n {
                let factor = lu[[i, k]] / pivot;
                lu[[i, k]] = factor;
                if factor != 0.0 {
                    for j in (k + 1)..n {
                        lu[[i, j]] -= factor * lu[[k, j]];
                    }
                }
            }
        }
        Ok((lu, pivots))
    }
}

impl BaseSolver for DenseLu {
    fn name(&self) -> String {
        String::from("dense LU")
    }

    fn init(&mut self, mat: Arc<CsrMatrix>) -> Result<()> {
        if mat.rows() != mat.cols() {
            return Err(AmgError::NotSquare {
                level: 0,
                rows: mat.rows(),
                cols: mat.cols(),
            });
        }
        if mat.rows() > 2000 {
            warn!(
                "dense LU of a coarse matrix with {} rows, consider a smaller base size",
                mat.rows()
            );
        }
        let (lu, pivots) = Self::factorize(mat.to_dense())?;
        self.lu = lu;
        self.pivots = pivots;
        self.mat = Some(mat);
        Ok(())
    }

    fn apply_return_defect(
        &mut self,
        correction: &mut Vector,
        defect: &mut Vector,
    ) -> Result<()> {
        let mat = self
            .mat
            .as_ref()
            .ok_or_else(|| AmgError::BaseSolverNotInitialized(self.name()))?;
        check_sizes(mat, correction, defect)?;
        let n = mat.rows();
        for (i, &p) in self.pivots.iter().enumerate() {
            correction[i] = defect[p];
        }
        for i in 0..n {
            let mut acc = correction[i];
            for j in 0..i {
                acc -= self.lu[[i, j]] * correction[j];
            }
            correction[i] = acc;
        }
        for i in (0..n).rev() {
            let mut acc = correction[i];
            for j in (i + 1)..n {
                acc -= self.lu[[i, j]] * correction[j];
            }
            correction[i] = acc / self.lu[[i, i]];
        }
        matmul_minus(mat, defect, correction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{laplace_2d, random_vec, two_norm};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn solves_exactly(solver: &mut dyn BaseSolver, mat: CsrMatrix) {
        let mat = Arc::new(mat);
        solver.init(mat.clone()).unwrap();
        let mut defect = random_vec(mat.rows());
        let mut correction = Vector::zeros(mat.rows());
        solver
            .apply_return_defect(&mut correction, &mut defect)
            .unwrap();
        assert!(two_norm(&defect) < 1e-10, "{} left a defect", solver.name());
    }

    #[test]
    fn ldl_and_lu_solve_laplacian() {
        solves_exactly(&mut LdlSolver::new(), laplace_2d(7, 6));
        solves_exactly(&mut DenseLu::new(), laplace_2d(7, 6));
    }

    #[test]
    fn lu_pivots_nonsymmetric_systems() {
        let mut tri = sprs::TriMat::new((3, 3));
        tri.add_triplet(0, 1, 1.0);
        tri.add_triplet(0, 2, 2.0);
        tri.add_triplet(1, 0, 3.0);
        tri.add_triplet(1, 2, 1.0);
        tri.add_triplet(2, 0, 1.0);
        tri.add_triplet(2, 1, 1.0);
        let mut lu = DenseLu::new();
        lu.init(Arc::new(tri.to_csr())).unwrap();
        // A [1, 2, 3]^T
        let mut defect = array![8.0, 6.0, 3.0];
        let mut correction = Vector::zeros(3);
        lu.apply_return_defect(&mut correction, &mut defect).unwrap();
        assert_relative_eq!(correction, array![1.0, 2.0, 3.0], epsilon = 1e-12);
    }

    #[test]
    fn singular_matrix_is_reported() {
        let mut tri = sprs::TriMat::new((2, 2));
        tri.add_triplet(0, 0, 1.0);
        tri.add_triplet(0, 1, 1.0);
        tri.add_triplet(1, 0, 1.0);
        tri.add_triplet(1, 1, 1.0);
        let mut lu = DenseLu::new();
        assert!(matches!(
            lu.init(Arc::new(tri.to_csr())),
            Err(AmgError::SingularMatrix { column: 1 })
        ));
    }

    #[test]
    fn ldl_handles_single_row() {
        let mut ldl = LdlSolver::new();
        let mut tri = sprs::TriMat::new((1, 1));
        tri.add_triplet(0, 0, 4.0);
        ldl.init(Arc::new(tri.to_csr())).unwrap();
        let mut defect = array![2.0];
        let mut correction = Vector::zeros(1);
        ldl.apply_return_defect(&mut correction, &mut defect).unwrap();
        assert_relative_eq!(correction, array![0.5]);
        assert_relative_eq!(defect, array![0.0]);

        let zero: CsrMatrix = sprs::TriMat::<f64>::new((1, 1)).to_csr();
        assert!(matches!(
            ldl.init(Arc::new(zero)),
            Err(AmgError::SingularMatrix { column: 0 })
        ));
        assert!(matches!(
            ldl.apply_return_defect(&mut correction, &mut defect),
            Err(AmgError::BaseSolverNotInitialized(_))
        ));
    }

    #[test]
    fn apply_before_init_fails() {
        let mut ldl = LdlSolver::new();
        let mut c = Vector::zeros(1);
        let mut d = Vector::zeros(1);
        assert!(matches!(
            ldl.apply_return_defect(&mut c, &mut d),
            Err(AmgError::BaseSolverNotInitialized(_))
        ));
    }
}
