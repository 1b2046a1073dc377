//! Strength-of-connection graphs.
//!
//! Row `i` of a [`StrengthGraph`] lists the unknowns `j` that `i` strongly depends
//! on, i.e. the off-diagonal couplings `a_ij` that are large relative to the
//! largest coupling in that row. The graph is generally not symmetric, so the
//! transpose ("which unknowns depend on `i`") is kept around as well.

use rayon::prelude::*;

use crate::config::StrengthMeasure;
use crate::CsrMatrix;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrengthGraph {
    offsets: Vec<usize>,
    targets: Vec<usize>,
}

impl StrengthGraph {
    /// Builds the strength graph of `mat` for threshold `theta`.
    pub fn from_matrix(mat: &CsrMatrix, theta: f64, measure: StrengthMeasure) -> Self {
        let rows: Vec<Vec<usize>> = (0..mat.rows())
            .into_par_iter()
            .map(|i| {
                let row = match mat.outer_view(i) {
                    Some(row) => row,
                    None => return Vec::new(),
                };
                let coupling = |val: f64| match measure {
                    StrengthMeasure::Classical => -val,
                    StrengthMeasure::Absolute => val.abs(),
                };
                let max_coupling = row
                    .iter()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, &val)| coupling(val))
                    .fold(0.0_f64, f64::max);
                if max_coupling <= 0.0 {
                    return Vec::new();
                }
                let threshold = theta * max_coupling;
                row.iter()
                    .filter(|&(j, &val)| j != i && coupling(val) >= threshold)
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();
        Self::from_rows(rows)
    }

    pub fn from_rows(rows: Vec<Vec<usize>>) -> Self {
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        offsets.push(0);
        let mut targets = Vec::with_capacity(rows.iter().map(Vec::len).sum());
        for row in rows {
            targets.extend(row);
            offsets.push(targets.len());
        }
        Self { offsets, targets }
    }

    pub fn num_nodes(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn num_edges(&self) -> usize {
        self.targets.len()
    }

    /// The unknowns that `i` strongly depends on.
    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.targets[self.offsets[i]..self.offsets[i + 1]]
    }

    pub fn is_strong(&self, i: usize, j: usize) -> bool {
        self.neighbors(i).contains(&j)
    }

    /// Drops every connection from or to an unknown marked in `excluded`, leaving
    /// those unknowns without strong neighbours.
    pub fn without_nodes(&self, excluded: &[bool]) -> Self {
        let rows = (0..self.num_nodes())
            .map(|i| {
                if excluded[i] {
                    Vec::new()
                } else {
                    self.neighbors(i)
                        .iter()
                        .copied()
                        .filter(|&j| !excluded[j])
                        .collect()
                }
            })
            .collect();
        Self::from_rows(rows)
    }

    pub fn transpose(&self) -> Self {
        let n = self.num_nodes();
        let mut rows = vec![Vec::new(); n];
        for i in 0..n {
            for &j in self.neighbors(i) {
                rows[j].push(i);
            }
        }
        Self::from_rows(rows)
    }

    /// Graph of strong paths of length one or two: `j` is a neighbour of `i` if it
    /// is a strong neighbour already, or if at least `min_paths` paths `i -> k -> j`
    /// run over strong connections. Used for aggressive coarsening.
    pub fn with_long_paths(&self, min_paths: usize) -> Self {
        let n = self.num_nodes();
        let rows: Vec<Vec<usize>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut paths: indexmap::IndexMap<usize, usize> = indexmap::IndexMap::new();
                for &k in self.neighbors(i) {
                    for &j in self.neighbors(k) {
                        if j != i {
                            *paths.entry(j).or_insert(0) += 1;
                        }
                    }
                }
                let mut row: Vec<usize> = self.neighbors(i).to_vec();
                row.extend(
                    paths
                        .into_iter()
                        .filter(|(j, count)| *count >= min_paths && !self.is_strong(i, *j))
                        .map(|(j, _)| j),
                );
                row.sort_unstable();
                row
            })
            .collect();
        Self::from_rows(rows)
    }
}
