//! Classical interpolation and restriction operators.
//!
//! Coarse points are injected (identity rows of `P`). A fine point `i` is
//! interpolated from its interpolatory set `C_i` with weights
//!
//! ```text
//! w_ij = -( a_ij + sum_{k in F_i} a_ik a_kj / sum_{m in C_i} a_km ) / ( a_ii + sum_{n in W_i} a_in )
//! ```
//!
//! where `F_i` are the strong fine neighbours whose connections are distributed to
//! `C_i` and `W_i` the weak connections, which are lumped onto the diagonal.
//! Standard interpolation uses the strong coarse neighbours as `C_i`; extended
//! interpolation also adds the strong coarse neighbours of the strong fine
//! neighbours, which is needed after aggressive coarsening.

use indexmap::IndexMap;
use rayon::prelude::*;

use crate::coarsening::{CoarseFineSplit, NodeKind};
use crate::parallel_ops::transpose;
use crate::strength::StrengthGraph;
use crate::CsrMatrix;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterpolationType {
    Standard,
    Extended,
}

/// Prolongation `P`, restriction `R = P^T`, and the number of fine rows whose
/// interpolation came out empty.
#[derive(Debug, Clone)]
pub struct Interpolation {
    pub prolongation: CsrMatrix,
    pub restriction: CsrMatrix,
    pub empty_rows: usize,
}

pub fn classical(
    mat: &CsrMatrix,
    strength: &StrengthGraph,
    split: &CoarseFineSplit,
    interpolation_type: InterpolationType,
    truncation: f64,
) -> Interpolation {
    let n_fine = mat.rows();
    let n_coarse = split.num_coarse();

    let rows: Vec<Vec<(usize, f64)>> = (0..n_fine)
        .into_par_iter()
        .map(|i| match split.kind(i) {
            NodeKind::Coarse => split
                .coarse_index(i)
                .map(|ci| vec![(ci, 1.0)])
                .unwrap_or_default(),
            NodeKind::Isolated => Vec::new(),
            NodeKind::Fine => {
                let mut row = fine_row(mat, strength, split, i, interpolation_type);
                if truncation > 0.0 {
                    truncate(&mut row, truncation);
                }
                row.sort_unstable_by_key(|(ci, _)| *ci);
                row
            }
        })
        .collect();

    let empty_rows = rows.iter().filter(|row| row.is_empty()).count();
    if empty_rows > 0 {
        debug!("{empty_rows} of {n_fine} rows of P are empty");
    }

    let mut indptr = Vec::with_capacity(n_fine + 1);
    indptr.push(0);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    for row in rows {
        for (ci, w) in row {
            indices.push(ci);
            data.push(w);
        }
        indptr.push(indices.len());
    }
    let prolongation = CsrMatrix::new((n_fine, n_coarse), indptr, indices, data);
    let restriction = transpose(&prolongation);

    Interpolation {
        prolongation,
        restriction,
        empty_rows,
    }
}

fn fine_row(
    mat: &CsrMatrix,
    strength: &StrengthGraph,
    split: &CoarseFineSplit,
    i: usize,
    interpolation_type: InterpolationType,
) -> Vec<(usize, f64)> {
    let row_i = match mat.outer_view(i) {
        Some(row) => row,
        None => return Vec::new(),
    };

    // interpolatory set, keyed by fine index, valued by the numerator of w_ij
    let mut numerators: IndexMap<usize, f64> = IndexMap::new();
    for &j in strength.neighbors(i) {
        if split.kind(j).is_coarse() {
            numerators.insert(j, 0.0);
        }
    }
    if interpolation_type == InterpolationType::Extended {
        for &k in strength.neighbors(i) {
            if split.kind(k) == NodeKind::Fine {
                for &j in strength.neighbors(k) {
                    if split.kind(j).is_coarse() {
                        numerators.entry(j).or_insert(0.0);
                    }
                }
            }
        }
    }
    if numerators.is_empty() {
        return Vec::new();
    }

    let mut diagonal = 0.0;
    let mut strong_fine = Vec::new();
    for (j, &a_ij) in row_i.iter() {
        if j == i {
            diagonal += a_ij;
        } else if let Some(num) = numerators.get_mut(&j) {
            *num += a_ij;
        } else if strength.is_strong(i, j) && split.kind(j) == NodeKind::Fine {
            strong_fine.push((j, a_ij));
        } else {
            // weak connections are lumped onto the diagonal
            diagonal += a_ij;
        }
    }

    for (k, a_ik) in strong_fine {
        let row_k = match mat.outer_view(k) {
            Some(row) => row,
            None => continue,
        };
        let denominator: f64 = row_k
            .iter()
            .filter(|(m, _)| numerators.contains_key(m))
            .map(|(_, &a_km)| a_km)
            .sum();
        if denominator == 0.0 {
            // k has no connection into C_i, fall back to lumping
            diagonal += a_ik;
            continue;
        }
        for (j, &a_kj) in row_k.iter() {
            if let Some(num) = numerators.get_mut(&j) {
                *num += a_ik * a_kj / denominator;
            }
        }
    }

    if diagonal == 0.0 {
        return Vec::new();
    }

    numerators
        .into_iter()
        .filter_map(|(j, num)| {
            let w = -num / diagonal;
            match (split.coarse_index(j), w != 0.0) {
                (Some(cj), true) => Some((cj, w)),
                _ => None,
            }
        })
        .collect()
}

/// Drops weights below `eps * max |w|` and rescales the remaining ones so that
/// the row sum is unchanged.
fn truncate(row: &mut Vec<(usize, f64)>, eps: f64) {
    let max = row.iter().map(|(_, w)| w.abs()).fold(0.0_f64, f64::max);
    let total: f64 = row.iter().map(|(_, w)| w).sum();
    row.retain(|(_, w)| w.abs() >= eps * max);
    let kept: f64 = row.iter().map(|(_, w)| w).sum();
    if kept != 0.0 {
        let scale = total / kept;
        row.iter_mut().for_each(|(_, w)| *w *= scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coarsening::{aggressive_split, ruge_stueben};
    use crate::config::{AggressiveCoarsening, StrengthMeasure};
    use crate::utils::{laplace_1d, laplace_2d};
    use approx::assert_relative_eq;

    fn standard(mat: &CsrMatrix) -> (CoarseFineSplit, Interpolation) {
        let strength = StrengthGraph::from_matrix(mat, 0.25, StrengthMeasure::Classical);
        let split = ruge_stueben(&strength, true);
        let interp = classical(mat, &strength, &split, InterpolationType::Standard, 0.0);
        (split, interp)
    }

    #[test]
    fn tridiagonal_interpolation_is_linear() {
        let (_, interp) = standard(&laplace_1d(4));
        let p = &interp.prolongation;
        assert_eq!(p.shape(), (4, 2));
        assert_relative_eq!(*p.get(0, 0).unwrap(), 0.5);
        assert_relative_eq!(*p.get(1, 0).unwrap(), 1.0);
        assert_relative_eq!(*p.get(2, 0).unwrap(), 0.5);
        assert_relative_eq!(*p.get(2, 1).unwrap(), 0.5);
        assert_relative_eq!(*p.get(3, 1).unwrap(), 1.0);
        assert_eq!(p.nnz(), 5);
        assert_eq!(interp.empty_rows, 0);
    }

    #[test]
    fn restriction_is_transpose() {
        let (_, interp) = standard(&laplace_2d(6, 5));
        let (p, r) = (&interp.prolongation, &interp.restriction);
        assert_eq!(r.shape(), (p.cols(), p.rows()));
        for (val, (i, j)) in p.iter() {
            assert_eq!(r.get(j, i), Some(val));
        }
        assert_eq!(r.nnz(), p.nnz());
    }

    #[test]
    fn interior_rows_preserve_constants() {
        let mat = laplace_2d(8, 8);
        let (split, interp) = standard(&mat);
        for (i, (row, p_row)) in mat
            .outer_iterator()
            .zip(interp.prolongation.outer_iterator())
            .enumerate()
        {
            let row_sum: f64 = row.data().iter().sum();
            if row_sum.abs() < 1e-12 {
                let p_sum: f64 = p_row.data().iter().sum();
                assert_relative_eq!(p_sum, 1.0, epsilon = 1e-12);
            }
            if split.kind(i).is_coarse() {
                assert_eq!(p_row.nnz(), 1);
            }
        }
    }

    #[test]
    fn extended_interpolation_covers_aggressive_splitting() {
        let mat = laplace_1d(9);
        let strength = StrengthGraph::from_matrix(&mat, 0.25, StrengthMeasure::Classical);
        let split = aggressive_split(&strength, AggressiveCoarsening::OnePath);
        assert_eq!(split.coarse_to_fine(), &[2, 5, 8]);
        let interp = classical(&mat, &strength, &split, InterpolationType::Extended, 0.0);
        assert_eq!(interp.empty_rows, 0);
        assert_relative_eq!(*interp.prolongation.get(0, 0).unwrap(), 0.5);
        assert_relative_eq!(*interp.prolongation.get(1, 0).unwrap(), 1.0);

        // standard interpolation cannot reach coarse points two steps away
        let standard = classical(&mat, &strength, &split, InterpolationType::Standard, 0.0);
        assert!(standard.empty_rows > 0);
    }

    #[test]
    fn truncation_keeps_row_sums() {
        let mut row = vec![(0, 0.6), (1, 0.35), (2, 0.05)];
        truncate(&mut row, 0.2);
        assert_eq!(row.len(), 2);
        assert_relative_eq!(row.iter().map(|(_, w)| w).sum::<f64>(), 1.0);
    }
}
