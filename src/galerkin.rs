//! Galerkin coarse operators `A_H = R A P`.

use indexmap::IndexMap;
use rayon::prelude::*;

use crate::error::{AmgError, Result};
use crate::CsrMatrix;

/// Sparse product `a * b` of two CSR matrices.
///
/// Every row of the result is accumulated separately (rows in parallel), so no
/// dense intermediate is ever formed. Column indices of the result are sorted and
/// exact zeros produced by cancellation are kept.
pub fn spgemm(a: &CsrMatrix, b: &CsrMatrix) -> Result<CsrMatrix> {
    if a.cols() != b.rows() {
        return Err(AmgError::DimensionMismatch {
            context: "inner dimension of a sparse product",
            expected: a.cols(),
            got: b.rows(),
        });
    }
    let rows: Vec<Vec<(usize, f64)>> = a
        .outer_iterator()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|row_a| {
            let mut acc: IndexMap<usize, f64> = IndexMap::new();
            for (k, &a_ik) in row_a.iter() {
                if let Some(row_b) = b.outer_view(k) {
                    for (j, &b_kj) in row_b.iter() {
                        *acc.entry(j).or_insert(0.0) += a_ik * b_kj;
                    }
                }
            }
            let mut row: Vec<(usize, f64)> = acc.into_iter().collect();
            row.sort_unstable_by_key(|(j, _)| *j);
            row
        })
        .collect();

    let mut indptr = Vec::with_capacity(a.rows() + 1);
    indptr.push(0);
    let nnz = rows.iter().map(Vec::len).sum();
    let mut indices = Vec::with_capacity(nnz);
    let mut data = Vec::with_capacity(nnz);
    for row in rows {
        for (j, val) in row {
            indices.push(j);
            data.push(val);
        }
        indptr.push(indices.len());
    }
    Ok(CsrMatrix::new((a.rows(), b.cols()), indptr, indices, data))
}

/// Coarse operator `R A P` of `level`.
pub fn galerkin_product(
    r: &CsrMatrix,
    a: &CsrMatrix,
    p: &CsrMatrix,
    level: usize,
) -> Result<CsrMatrix> {
    if a.rows() != a.cols() {
        return Err(AmgError::NotSquare {
            level,
            rows: a.rows(),
            cols: a.cols(),
        });
    }
    if p.rows() != a.cols() {
        return Err(AmgError::DimensionMismatch {
            context: "rows of P",
            expected: a.cols(),
            got: p.rows(),
        });
    }
    if r.cols() != a.rows() || r.rows() != p.cols() {
        return Err(AmgError::DimensionMismatch {
            context: "shape of R",
            expected: p.cols(),
            got: r.rows(),
        });
    }
    let ap = spgemm(a, p)?;
    let coarse = spgemm(r, &ap)?;
    trace!(
        "level {level}: Galerkin product {} x {} with {} nonzeros",
        coarse.rows(),
        coarse.cols(),
        coarse.nnz()
    );
    Ok(coarse)
}
