//! Coarse/fine splitting (Ruge-Stueben coarsening).
//!
//! The first pass greedily picks coarse points with the largest number of
//! unknowns that strongly depend on them and turns those dependants into fine
//! points. The optional second pass makes sure that two strongly connected fine
//! points share at least one strong coarse neighbour, which the classical
//! interpolation formula relies on.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use crate::config::{AggressiveCoarsening, AmgConfig};
use crate::error::{AmgError, Result};
use crate::strength::StrengthGraph;
use crate::CsrMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Coarse,
    Fine,
    /// No strong connection in either direction. Treated as a fine point that
    /// interpolates from nothing, which loses the coarse grid correction for that
    /// unknown: a known approximation, left to the smoother.
    Isolated,
}

impl NodeKind {
    pub fn is_coarse(&self) -> bool {
        matches!(self, NodeKind::Coarse)
    }

    pub fn is_fine(&self) -> bool {
        !self.is_coarse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Undecided,
    Decided(NodeKind),
}

/// Result of coarsening one level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoarseFineSplit {
    kinds: Vec<NodeKind>,
    new_index: Vec<Option<usize>>,
    coarse_to_fine: Vec<usize>,
}

impl CoarseFineSplit {
    pub fn from_kinds(kinds: Vec<NodeKind>) -> Self {
        let mut new_index = vec![None; kinds.len()];
        let mut coarse_to_fine = Vec::new();
        for (i, kind) in kinds.iter().enumerate() {
            if kind.is_coarse() {
                new_index[i] = Some(coarse_to_fine.len());
                coarse_to_fine.push(i);
            }
        }
        Self {
            kinds,
            new_index,
            coarse_to_fine,
        }
    }

    pub fn kinds(&self) -> &[NodeKind] {
        &self.kinds
    }

    pub fn kind(&self, i: usize) -> NodeKind {
        self.kinds[i]
    }

    /// Index of fine unknown `i` on the coarse level, if it is a coarse point.
    pub fn coarse_index(&self, i: usize) -> Option<usize> {
        self.new_index[i]
    }

    /// `coarse_to_fine()[k]` is the fine index of coarse unknown `k`.
    pub fn coarse_to_fine(&self) -> &[usize] {
        &self.coarse_to_fine
    }

    pub fn num_fine_grid(&self) -> usize {
        self.kinds.len()
    }

    pub fn num_coarse(&self) -> usize {
        self.coarse_to_fine.len()
    }

    pub fn num_isolated(&self) -> usize {
        self.kinds
            .iter()
            .filter(|kind| matches!(kind, NodeKind::Isolated))
            .count()
    }

    /// Markers for F-smoothing: `true` for every unknown that is not coarse.
    pub fn fine_markers(&self) -> Vec<bool> {
        self.kinds.iter().map(NodeKind::is_fine).collect()
    }
}

/// Strength graph and splitting of one level, plus whether the aggressive
/// variant was used (which changes the interpolation that has to follow).
#[derive(Debug, Clone)]
pub struct Coarsening {
    pub strength: StrengthGraph,
    pub split: CoarseFineSplit,
    pub aggressive: bool,
}

/// Coarsens `mat`, the matrix of `level`. Aggressive coarsening is only applied on
/// the finest level.
///
/// Unknowns with a zero diagonal take no part in the splitting: they end up
/// isolated, i.e. fine with an empty interpolation row.
pub fn coarsen(mat: &CsrMatrix, config: &AmgConfig, level: usize) -> Result<Coarsening> {
    let mut strength = StrengthGraph::from_matrix(mat, config.theta, config.strength_measure);
    let zero_diagonal: Vec<bool> = (0..mat.rows())
        .map(|i| mat.get(i, i).map_or(true, |&v| v == 0.0))
        .collect();
    let num_zero_diagonal = zero_diagonal.iter().filter(|&&zero| zero).count();
    if num_zero_diagonal > 0 {
        warn!("level {level}: {num_zero_diagonal} unknowns with zero diagonal are kept fine");
        strength = strength.without_nodes(&zero_diagonal);
    }
    trace!(
        "level {level}: strength graph with {} strong connections",
        strength.num_edges()
    );

    let (split, aggressive) = match (level, config.aggressive_coarsening) {
        (0, Some(variant)) => (aggressive_split(&strength, variant), true),
        _ => (ruge_stueben(&strength, config.second_pass), false),
    };

    let fine = split.num_fine_grid() - split.num_coarse();
    if split.num_coarse() == 0 && fine > 0 {
        return Err(AmgError::EmptyCoarseSet { level, fine });
    }
    if split.num_isolated() > 0 {
        warn!(
            "level {level}: {} unknowns without strong connections are interpolated as zero",
            split.num_isolated()
        );
    }
    Ok(Coarsening {
        strength,
        split,
        aggressive,
    })
}

/// Classical Ruge-Stueben splitting of the unknowns of `strength`.
pub fn ruge_stueben(strength: &StrengthGraph, second_pass: bool) -> CoarseFineSplit {
    let dependants = strength.transpose();
    let mut marks = first_pass(strength, &dependants);
    if second_pass {
        fix_fine_fine_connections(strength, &mut marks);
    }
    CoarseFineSplit::from_kinds(marks)
}

/// Aggressive splitting: the first pass is run on the graph of long strong paths.
pub fn aggressive_split(strength: &StrengthGraph, variant: AggressiveCoarsening) -> CoarseFineSplit {
    let long = strength.with_long_paths(variant.min_paths());
    let dependants = long.transpose();
    CoarseFineSplit::from_kinds(first_pass(&long, &dependants))
}

fn first_pass(strength: &StrengthGraph, dependants: &StrengthGraph) -> Vec<NodeKind> {
    let n = strength.num_nodes();
    let mut marks = vec![Mark::Undecided; n];
    let mut lambda: Vec<usize> = (0..n).map(|i| dependants.neighbors(i).len()).collect();

    for i in 0..n {
        if strength.neighbors(i).is_empty() && dependants.neighbors(i).is_empty() {
            marks[i] = Mark::Decided(NodeKind::Isolated);
        }
    }

    // Largest lambda first, ties broken towards the smallest index.
    let mut queue: BTreeSet<(usize, Reverse<usize>)> = (0..n)
        .filter(|&i| marks[i] == Mark::Undecided)
        .map(|i| (lambda[i], Reverse(i)))
        .collect();

    while let Some((_, Reverse(i))) = queue.pop_last() {
        marks[i] = Mark::Decided(NodeKind::Coarse);

        for &j in dependants.neighbors(i) {
            if marks[j] != Mark::Undecided {
                continue;
            }
            queue.remove(&(lambda[j], Reverse(j)));
            marks[j] = Mark::Decided(NodeKind::Fine);
            // whatever the new fine point depends on becomes a better coarse candidate
            for &k in strength.neighbors(j) {
                if marks[k] == Mark::Undecided {
                    queue.remove(&(lambda[k], Reverse(k)));
                    lambda[k] += 1;
                    queue.insert((lambda[k], Reverse(k)));
                }
            }
        }

        for &k in strength.neighbors(i) {
            if marks[k] == Mark::Undecided {
                queue.remove(&(lambda[k], Reverse(k)));
                lambda[k] = lambda[k].saturating_sub(1);
                queue.insert((lambda[k], Reverse(k)));
            }
        }
    }

    marks
        .into_iter()
        .map(|mark| match mark {
            Mark::Decided(kind) => kind,
            Mark::Undecided => NodeKind::Fine,
        })
        .collect()
}

fn fix_fine_fine_connections(strength: &StrengthGraph, kinds: &mut [NodeKind]) {
    let n = kinds.len();
    let mut marker = vec![usize::MAX; n];
    let mut promoted = 0;

    for i in 0..n {
        if kinds[i] != NodeKind::Fine {
            continue;
        }
        for &k in strength.neighbors(i) {
            if kinds[k].is_coarse() {
                marker[k] = i;
            }
        }
        for &j in strength.neighbors(i) {
            if kinds[j] != NodeKind::Fine {
                continue;
            }
            let shares_coarse = strength.neighbors(j).iter().any(|&k| marker[k] == i);
            if !shares_coarse {
                kinds[j] = NodeKind::Coarse;
                marker[j] = i;
                promoted += 1;
            }
        }
    }

    if promoted > 0 {
        trace!("second pass promoted {promoted} fine points to coarse");
    }
}
