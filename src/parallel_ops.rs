//! Some parallel implementations of basic sparse linear algebra methods
//! that are used heavily in the cycle. These need to be fast.

use ndarray::Zip;
use rayon::prelude::*;

use crate::{CsrMatrix, Vector};

fn row_dot(a: &CsrMatrix, i: usize, x: &Vector) -> f64 {
    match a.outer_view(i) {
        Some(row) => row.iter().map(|(j, val)| x[j] * val).sum::<f64>(),
        None => 0.0,
    }
}

pub fn spmv(a: &CsrMatrix, b: &Vector) -> Vector {
    let mut c = Vector::zeros(a.rows());
    spmv_into(a, b, &mut c);
    c
}

/// `out = A * x`, reusing the storage of `out`.
pub fn spmv_into(a: &CsrMatrix, x: &Vector, out: &mut Vector) {
    assert!(a.is_csr());
    assert_eq!(a.cols(), x.len());
    assert_eq!(a.rows(), out.len());
    Zip::indexed(out).par_for_each(|i, o| *o = row_dot(a, i, x));
}

/// `d -= A * c`, the defect update after adding `c` to the iterate.
pub fn matmul_minus(a: &CsrMatrix, d: &mut Vector, c: &Vector) {
    assert!(a.is_csr());
    assert_eq!(a.cols(), c.len());
    assert_eq!(a.rows(), d.len());
    Zip::indexed(d).par_for_each(|i, di| *di -= row_dot(a, i, c));
}

/// Residual `b - A x`.
pub fn residual(a: &CsrMatrix, b: &Vector, x: &Vector) -> Vector {
    let mut r = b.clone();
    matmul_minus(a, &mut r, x);
    r
}

/// Transpose of a CSR matrix, again in CSR storage with sorted column indices.
pub fn transpose(a: &CsrMatrix) -> CsrMatrix {
    let (rows, cols) = (a.rows(), a.cols());
    let mut counts = vec![0usize; cols + 1];
    for (_, (_, j)) in a.iter() {
        counts[j + 1] += 1;
    }
    for j in 0..cols {
        counts[j + 1] += counts[j];
    }
    let indptr = counts.clone();
    let mut next = counts;
    let mut indices = vec![0usize; a.nnz()];
    let mut data = vec![0.0; a.nnz()];
    // Visiting rows in order keeps the column indices of the transpose sorted.
    for (i, row) in a.outer_iterator().enumerate() {
        for (j, &val) in row.iter() {
            let pos = next[j];
            indices[pos] = i;
            data[pos] = val;
            next[j] += 1;
        }
    }
    CsrMatrix::new((cols, rows), indptr, indices, data)
}

/// The main diagonal, with zeros where a row stores no diagonal entry.
pub fn diagonal(a: &CsrMatrix) -> Vector {
    let n = a.rows().min(a.cols());
    let diag: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| a.get(i, i).copied().unwrap_or(0.0))
        .collect();
    Vector::from(diag)
}

/// `nnz / rows^2`, the fill ratio used to decide when to stop coarsening.
pub fn density(a: &CsrMatrix) -> f64 {
    let rows = a.rows() as f64;
    if rows == 0.0 {
        return 0.0;
    }
    a.nnz() as f64 / (rows * rows)
}
