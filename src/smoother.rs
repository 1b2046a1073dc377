//! Smoothers used on every level but the coarsest.
//!
//! A smoother is handed to the hierarchy as a template. For each level the
//! hierarchy clones the template with [`Smoother::boxed_clone`] and initialises
//! the copy against that level's matrix.

use std::sync::Arc;

use crate::error::{AmgError, Result};
use crate::parallel_ops::{diagonal, matmul_minus};
use crate::{CsrMatrix, Vector};

pub trait Smoother: Send + Sync {
    fn name(&self) -> String;

    /// Fresh, uninitialised copy carrying the same parameters.
    fn boxed_clone(&self) -> Box<dyn Smoother>;

    fn init(&mut self, mat: Arc<CsrMatrix>) -> Result<()>;

    /// Computes a correction `c` from the defect `d` and updates `d -= A c`.
    /// `c` is overwritten.
    fn apply_update_defect(&self, correction: &mut Vector, defect: &mut Vector) -> Result<()>;
}

fn check_len(context: &'static str, expected: usize, vec: &Vector) -> Result<()> {
    if vec.len() != expected {
        return Err(AmgError::DimensionMismatch {
            context,
            expected,
            got: vec.len(),
        });
    }
    Ok(())
}

/// Inverts `values`, leaving zeros where the entry vanishes.
fn safe_inverse(values: &Vector, what: &str) -> Vector {
    let zeros = values.iter().filter(|&&v| v == 0.0).count();
    if zeros > 0 {
        warn!("{zeros} rows with zero {what}, these unknowns are not smoothed");
    }
    values.mapv(|v| if v == 0.0 { 0.0 } else { 1.0 / v })
}

/// Damped Jacobi, `c = omega D^{-1} d`.
#[derive(Clone, Debug)]
pub struct Jacobi {
    omega: f64,
    mat: Option<Arc<CsrMatrix>>,
    inverse_diagonal: Vector,
}

impl Jacobi {
    pub fn new(omega: f64) -> Self {
        Self {
            omega,
            mat: None,
            inverse_diagonal: Vector::zeros(0),
        }
    }
}

impl Default for Jacobi {
    fn default() -> Self {
        Self::new(2.0 / 3.0)
    }
}

impl Smoother for Jacobi {
    fn name(&self) -> String {
        format!("Jacobi (omega = {:.3})", self.omega)
    }

    fn boxed_clone(&self) -> Box<dyn Smoother> {
        Box::new(Self::new(self.omega))
    }

    fn init(&mut self, mat: Arc<CsrMatrix>) -> Result<()> {
        self.inverse_diagonal = safe_inverse(&diagonal(&mat), "diagonal");
        self.mat = Some(mat);
        Ok(())
    }

    fn apply_update_defect(&self, correction: &mut Vector, defect: &mut Vector) -> Result<()> {
        let mat = self
            .mat
            .as_ref()
            .ok_or_else(|| AmgError::SmootherNotInitialized(self.name()))?;
        check_len("Jacobi defect", mat.rows(), defect)?;
        check_len("Jacobi correction", mat.rows(), correction)?;
        correction.assign(&(&*defect * &self.inverse_diagonal));
        *correction *= self.omega;
        matmul_minus(mat, defect, correction);
        Ok(())
    }
}

/// l1-Jacobi, `c_i = d_i / sum_j |a_ij|`. Convergent for SPD matrices without
/// damping.
#[derive(Clone, Debug, Default)]
pub struct L1 {
    mat: Option<Arc<CsrMatrix>>,
    l1_inverse: Vector,
}

impl L1 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Smoother for L1 {
    fn name(&self) -> String {
        String::from("l1-Jacobi")
    }

    fn boxed_clone(&self) -> Box<dyn Smoother> {
        Box::new(Self::new())
    }

    fn init(&mut self, mat: Arc<CsrMatrix>) -> Result<()> {
        let row_sums: Vector = mat
            .outer_iterator()
            .map(|row_vec| row_vec.data().iter().map(|val| val.abs()).sum::<f64>())
            .collect();
        self.l1_inverse = safe_inverse(&row_sums, "l1 row sum");
        self.mat = Some(mat);
        Ok(())
    }

    fn apply_update_defect(&self, correction: &mut Vector, defect: &mut Vector) -> Result<()> {
        let mat = self
            .mat
            .as_ref()
            .ok_or_else(|| AmgError::SmootherNotInitialized(self.name()))?;
        check_len("l1 defect", mat.rows(), defect)?;
        check_len("l1 correction", mat.rows(), correction)?;
        correction.assign(&(&*defect * &self.l1_inverse));
        matmul_minus(mat, defect, correction);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepDirection {
    Forward,
    Backward,
    /// A forward sweep followed by a backward sweep on the updated defect.
    Symmetric,
}

#[derive(Clone, Debug)]
pub struct GaussSeidel {
    direction: SweepDirection,
    mat: Option<Arc<CsrMatrix>>,
    inverse_diagonal: Vector,
}

impl GaussSeidel {
    pub fn new(direction: SweepDirection) -> Self {
        Self {
            direction,
            mat: None,
            inverse_diagonal: Vector::zeros(0),
        }
    }

    pub fn forward() -> Self {
        Self::new(SweepDirection::Forward)
    }

    pub fn backward() -> Self {
        Self::new(SweepDirection::Backward)
    }

    pub fn symmetric() -> Self {
        Self::new(SweepDirection::Symmetric)
    }

    /// Solves `(D + L) c = d`.
    fn lsolve(&self, mat: &CsrMatrix, d: &Vector, c: &mut Vector) {
        for (i, row) in mat.outer_iterator().enumerate() {
            let mut acc = d[i];
            for (j, &val) in row.iter() {
                if j < i {
                    acc -= val * c[j];
                }
            }
            c[i] = acc * self.inverse_diagonal[i];
        }
    }

    /// Solves `(D + U) c = d`.
    fn usolve(&self, mat: &CsrMatrix, d: &Vector, c: &mut Vector) {
        for i in (0..mat.rows()).rev() {
            let mut acc = d[i];
            if let Some(row) = mat.outer_view(i) {
                for (j, &val) in row.iter() {
                    if j > i {
                        acc -= val * c[j];
                    }
                }
            }
            c[i] = acc * self.inverse_diagonal[i];
        }
    }
}

impl GaussSeidel {
    /// Backward sweep on top of an existing correction, against the defect `d`
    /// from before `c` was applied.
    fn backward_update(&self, mat: &CsrMatrix, d: &Vector, c: &mut Vector) {
        for i in (0..mat.rows()).rev() {
            let mut acc = d[i];
            if let Some(row) = mat.outer_view(i) {
                for (j, &val) in row.iter() {
                    acc -= val * c[j];
                }
            }
            c[i] += acc * self.inverse_diagonal[i];
        }
    }
}

impl Smoother for GaussSeidel {
    fn name(&self) -> String {
        format!("{:?} Gauss-Seidel", self.direction)
    }

    fn boxed_clone(&self) -> Box<dyn Smoother> {
        Box::new(Self::new(self.direction))
    }

    fn init(&mut self, mat: Arc<CsrMatrix>) -> Result<()> {
        self.inverse_diagonal = safe_inverse(&diagonal(&mat), "diagonal");
        self.mat = Some(mat);
        Ok(())
    }

    fn apply_update_defect(&self, correction: &mut Vector, defect: &mut Vector) -> Result<()> {
        let mat = self
            .mat
            .as_ref()
            .ok_or_else(|| AmgError::SmootherNotInitialized(self.name()))?;
        check_len("Gauss-Seidel defect", mat.rows(), defect)?;
        check_len("Gauss-Seidel correction", mat.rows(), correction)?;
        match self.direction {
            SweepDirection::Forward => self.lsolve(mat, defect, correction),
            SweepDirection::Backward => self.usolve(mat, defect, correction),
            SweepDirection::Symmetric => {
                self.lsolve(mat, defect, correction);
                self.backward_update(mat, defect, correction);
            }
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

    fn reduces_defect(smoother: &dyn Smoother) {
        let mat = Arc::new(laplace_2d(10, 10));
        let mut instance = smoother.boxed_clone();
        instance.init(mat.clone()).unwrap();
        let mut defect = random_vec(mat.rows());
        let start = two_norm(&defect);
        let mut correction = Vector::zeros(mat.rows());
        for _ in 0..5 {
            instance
                .apply_update_defect(&mut correction, &mut defect)
                .unwrap();
        }
        assert!(two_norm(&defect) < start, "{} did not reduce the defect", instance.name());
    }

    #[test]
    fn all_smoothers_reduce_the_defect() {
        reduces_defect(&Jacobi::default());
        reduces_defect(&L1::new());
        reduces_defect(&GaussSeidel::forward());
        reduces_defect(&GaussSeidel::backward());
        reduces_defect(&GaussSeidel::symmetric());
    }

    #[test]
    fn gauss_seidel_is_exact_for_triangular_matrices() {
        let mut tri = sprs::TriMat::new((3, 3));
        tri.add_triplet(0, 0, 2.0);
        tri.add_triplet(1, 0, -1.0);
        tri.add_triplet(1, 1, 4.0);
        tri.add_triplet(2, 1, 1.0);
        tri.add_triplet(2, 2, 1.0);
        let mat: CsrMatrix = tri.to_csr();
        let mut gs = GaussSeidel::forward();
        gs.init(Arc::new(mat)).unwrap();
        let mut defect = array![2.0, 3.0, 2.0];
        let mut correction = Vector::zeros(3);
        gs.apply_update_defect(&mut correction, &mut defect).unwrap();
        assert_relative_eq!(correction, array![1.0, 1.0, 1.0]);
        assert_relative_eq!(defect, array![0.0, 0.0, 0.0]);
    }

    #[test]
    fn correction_matches_defect_update() {
        let mat = Arc::new(laplace_2d(4, 4));
        let mut gs = GaussSeidel::symmetric();
        gs.init(mat.clone()).unwrap();
        let d0 = random_vec(16);
        let mut defect = d0.clone();
        let mut correction = Vector::zeros(16);
        gs.apply_update_defect(&mut correction, &mut defect).unwrap();
        let expected = crate::parallel_ops::residual(&mat, &d0, &correction);
        assert_relative_eq!(defect, expected, epsilon = 1e-12);
    }

    #[test]
    fn symmetric_sweep_is_forward_then_backward() {
        let mat = Arc::new(laplace_2d(5, 3));
        let mut symmetric = GaussSeidel::symmetric();
        let mut forward = GaussSeidel::forward();
        let mut backward = GaussSeidel::backward();
        for gs in [&mut symmetric, &mut forward, &mut backward] {
            gs.init(mat.clone()).unwrap();
        }
        let d0 = random_vec(15);

        let mut defect = d0.clone();
        let mut correction = Vector::zeros(15);
        symmetric
            .apply_update_defect(&mut correction, &mut defect)
            .unwrap();

        let mut split_defect = d0;
        let mut first = Vector::zeros(15);
        let mut second = Vector::zeros(15);
        forward
            .apply_update_defect(&mut first, &mut split_defect)
            .unwrap();
        backward
            .apply_update_defect(&mut second, &mut split_defect)
            .unwrap();
        assert_relative_eq!(correction, first + second, epsilon = 1e-12);
        assert_relative_eq!(defect, split_defect, epsilon = 1e-12);
    }

    #[test]
    fn zero_diagonal_rows_are_skipped() {
        let mut tri = sprs::TriMat::new((2, 2));
        tri.add_triplet(0, 0, 2.0);
        tri.add_triplet(1, 0, 1.0);
        let mut jacobi = Jacobi::new(1.0);
        jacobi.init(Arc::new(tri.to_csr())).unwrap();
        let mut defect = array![2.0, 5.0];
        let mut correction = Vector::zeros(2);
        jacobi
            .apply_update_defect(&mut correction, &mut defect)
            .unwrap();
        assert_relative_eq!(correction, array![1.0, 0.0]);
        assert!(correction.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn uninitialised_smoother_fails() {
        let gs = GaussSeidel::symmetric();
        let mut d = Vector::zeros(2);
        let mut c = Vector::zeros(2);
        assert!(matches!(
            gs.apply_update_defect(&mut c, &mut d),
            Err(AmgError::SmootherNotInitialized(_))
        ));
    }
}
