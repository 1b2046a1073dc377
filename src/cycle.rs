//! The recursive multigrid cycle.
//!
//! One routine serves normal solves, the reduction diagnostics of
//! [`AmgBase::check`](crate::amg::AmgBase::check) and the debug dumps: the
//! latter two are [`CycleObserver`]s that are shown the defect after every stage.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::base_solver::BaseSolver;
use crate::coarsening::CoarseFineSplit;
use crate::config::AmgConfig;
use crate::error::Result;
use crate::parallel_ops::{matmul_minus, spmv_into};
use crate::smoother::Smoother;
use crate::utils::two_norm;
use crate::{CsrMatrix, Vector};

/// Pre- and post-smoother of a level. Both point to the same instance when the
/// hierarchy was configured with one smoother for both.
#[derive(Clone)]
pub struct LevelSmoothers {
    pub pre: Arc<dyn Smoother>,
    pub post: Arc<dyn Smoother>,
}

impl LevelSmoothers {
    pub fn shared(&self) -> bool {
        Arc::ptr_eq(&self.pre, &self.post)
    }
}

/// Transfer to the next coarser level.
#[derive(Debug, Clone)]
pub struct GridTransfer {
    pub prolongation: CsrMatrix,
    pub restriction: CsrMatrix,
    pub split: CoarseFineSplit,
    /// `1 / a_ii` on fine points, zero on coarse points and zero diagonals.
    pub(crate) f_inverse_diagonal: Vector,
}

impl GridTransfer {
    pub fn new(
        prolongation: CsrMatrix,
        restriction: CsrMatrix,
        split: CoarseFineSplit,
        mat: &CsrMatrix,
    ) -> Self {
        let f_inverse_diagonal: Vector = split
            .fine_markers()
            .into_iter()
            .enumerate()
            .map(|(i, fine)| match (fine, mat.get(i, i)) {
                (true, Some(&a_ii)) if a_ii != 0.0 => 1.0 / a_ii,
                _ => 0.0,
            })
            .collect();
        Self {
            prolongation,
            restriction,
            split,
            f_inverse_diagonal,
        }
    }
}

/// Vectors reused by every cycle through a level.
#[derive(Debug, Clone)]
pub(crate) struct Scratch {
    correction: Vector,
    coarse_defect: Vector,
    coarse_correction: Vector,
    coarse_accumulator: Vector,
}

impl Scratch {
    pub(crate) fn new(fine: usize, coarse: usize) -> Self {
        Self {
            correction: Vector::zeros(fine),
            coarse_defect: Vector::zeros(coarse),
            coarse_correction: Vector::zeros(coarse),
            coarse_accumulator: Vector::zeros(coarse),
        }
    }
}

/// One level of the hierarchy. The coarsest level has neither smoothers nor a
/// transfer and is handled by the base solver.
pub struct AmgLevel {
    pub(crate) matrix: Arc<CsrMatrix>,
    pub(crate) smoothers: Option<LevelSmoothers>,
    pub(crate) transfer: Option<GridTransfer>,
    pub(crate) scratch: Option<Scratch>,
}

impl AmgLevel {
    pub(crate) fn new(matrix: Arc<CsrMatrix>) -> Self {
        Self {
            matrix,
            smoothers: None,
            transfer: None,
            scratch: None,
        }
    }

    pub fn matrix(&self) -> &Arc<CsrMatrix> {
        &self.matrix
    }

    pub fn smoothers(&self) -> Option<&LevelSmoothers> {
        self.smoothers.as_ref()
    }

    pub fn transfer(&self) -> Option<&GridTransfer> {
        self.transfer.as_ref()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CycleStage {
    Start,
    AfterPreSmoothing,
    AfterPreFSmoothing,
    AfterCoarseCorrection,
    AfterPostFSmoothing,
    AfterPostSmoothing,
    AfterBaseSolve,
}

/// Sees the defect of `level` after every stage of the cycle.
pub trait CycleObserver {
    fn observe(&mut self, level: usize, stage: CycleStage, defect: &Vector) -> Result<()>;
}

impl CycleObserver for () {
    fn observe(&mut self, _level: usize, _stage: CycleStage, _defect: &Vector) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReduction {
    pub level: usize,
    pub stage: CycleStage,
    pub norm: f64,
    /// Relative to the defect norm when the level was entered.
    pub total: f64,
    /// Relative to the previous stage.
    pub step: f64,
}

/// Logs and records how much every stage reduces the defect.
#[derive(Debug, Default)]
pub struct ReductionLogger {
    start_norms: Vec<f64>,
    last_norms: Vec<f64>,
    pub reductions: Vec<StageReduction>,
}

impl ReductionLogger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

impl CycleObserver for ReductionLogger {
    fn observe(&mut self, level: usize, stage: CycleStage, defect: &Vector) -> Result<()> {
        if self.start_norms.len() <= level {
            self.start_norms.resize(level + 1, 0.0);
            self.last_norms.resize(level + 1, 0.0);
        }
        let norm = two_norm(defect);
        if stage == CycleStage::Start {
            info!("level {level}: prenorm = {norm:.3e}");
            self.start_norms[level] = norm;
            self.last_norms[level] = norm;
            return Ok(());
        }
        let total = ratio(norm, self.start_norms[level]);
        let step = ratio(norm, self.last_norms[level]);
        info!("level {level}: {stage:?}: {total:.3e}\t{step:.3e}");
        self.last_norms[level] = norm;
        self.reductions.push(StageReduction {
            level,
            stage,
            norm,
            total,
            step,
        });
        Ok(())
    }
}

/// Dumps defects in the connection viewer format used for the matrix dumps
/// written during setup.
pub struct DebugWriter<'a> {
    pub(crate) prefix: PathBuf,
    pub(crate) matrices: Vec<Arc<CsrMatrix>>,
    pub(crate) positions: &'a [Vec<[f64; 3]>],
    pub(crate) original_indices: &'a [Vec<usize>],
    pub(crate) dimension: usize,
}

impl DebugWriter<'_> {
    fn path(&self, name: &str, level: usize, extension: &str) -> PathBuf {
        let mut path = self.prefix.clone().into_os_string();
        path.push(format!("{name}{level}.{extension}"));
        PathBuf::from(path)
    }

    pub(crate) fn write_vector(&self, name: &str, level: usize, defect: &Vector) -> Result<()> {
        let mat_path = self.path(name, level, "mat");
        let values_path = self.path(name, level, "values");
        write_connection_matrix(
            &mat_path,
            &self.matrices[level],
            &self.positions[level],
            self.dimension,
            Some(&values_path),
        )?;
        let mut file = BufWriter::new(File::create(&values_path)?);
        for (i, value) in defect.iter().enumerate() {
            writeln!(file, "{} {}", self.original_indices[level][i], value)?;
        }
        file.flush()?;
        Ok(())
    }
}

impl CycleObserver for DebugWriter<'_> {
    fn observe(&mut self, level: usize, stage: CycleStage, defect: &Vector) -> Result<()> {
        let name = match stage {
            CycleStage::AfterPreSmoothing => "AMG_dp",
            CycleStage::AfterCoarseCorrection => "AMG_dc",
            CycleStage::AfterPostSmoothing => "AMG_d",
            _ => return Ok(()),
        };
        self.write_vector(name, level, defect)
    }
}

/// Observer that forwards to two others.
pub(crate) struct Both<'a, A: CycleObserver, B: CycleObserver>(pub &'a mut A, pub &'a mut B);

impl<A: CycleObserver, B: CycleObserver> CycleObserver for Both<'_, A, B> {
    fn observe(&mut self, level: usize, stage: CycleStage, defect: &Vector) -> Result<()> {
        self.0.observe(level, stage, defect)?;
        self.1.observe(level, stage, defect)
    }
}

/// Writes a matrix together with node positions. With `values`, a reference to a
/// vector file is appended.
pub(crate) fn write_connection_matrix(
    path: &Path,
    mat: &CsrMatrix,
    positions: &[[f64; 3]],
    dimension: usize,
    values: Option<&PathBuf>,
) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "1\n{dimension}\n{}", positions.len())?;
    for pos in positions {
        let coords: Vec<String> = pos[..dimension.min(3)].iter().map(f64::to_string).collect();
        writeln!(file, "{}", coords.join(" "))?;
    }
    writeln!(file, "1")?;
    for (val, (i, j)) in mat.iter() {
        writeln!(file, "{i} {j} {val}")?;
    }
    if let Some(values) = values {
        writeln!(file, "v {}", values.display())?;
    }
    file.flush()?;
    Ok(())
}

pub(crate) struct CycleContext<'a> {
    pub config: &'a AmgConfig,
    pub base_solver: &'a mut dyn BaseSolver,
    pub observer: &'a mut dyn CycleObserver,
}

/// Relaxes only the fine points: `corr_i = d_i / a_ii` on F, zero elsewhere.
fn f_smoothing(
    mat: &CsrMatrix,
    transfer: &GridTransfer,
    correction: &mut Vector,
    defect: &mut Vector,
) {
    correction.assign(&(&*defect * &transfer.f_inverse_diagonal));
    matmul_minus(mat, defect, correction);
}

/// Computes a correction `c` for the defect `d` on `levels[0]` (level number
/// `level`) and updates `d` to the remaining defect.
pub(crate) fn get_correction_and_update_defect(
    levels: &mut [AmgLevel],
    level: usize,
    c: &mut Vector,
    d: &mut Vector,
    ctx: &mut CycleContext<'_>,
) -> Result<()> {
    let (current, coarser) = match levels.split_first_mut() {
        Some(split) => split,
        None => return Ok(()),
    };
    ctx.observer.observe(level, CycleStage::Start, d)?;

    let AmgLevel {
        matrix: mat,
        smoothers,
        transfer,
        scratch,
    } = current;
    let (smoothers, transfer, scratch) =
        match (smoothers.as_ref(), transfer.as_ref(), scratch.as_mut()) {
            (Some(smoothers), Some(transfer), Some(scratch)) if !coarser.is_empty() => {
                (smoothers, transfer, scratch)
            }
            _ => {
                ctx.base_solver.apply_return_defect(c, d)?;
                return ctx.observer.observe(level, CycleStage::AfterBaseSolve, d);
            }
        };
    let Scratch {
        correction,
        coarse_defect,
        coarse_correction,
        coarse_accumulator,
    } = scratch;

    c.fill(0.0);
    for _ in 0..ctx.config.num_presmooth {
        smoothers.pre.apply_update_defect(correction, d)?;
        *c += &*correction;
    }
    ctx.observer.observe(level, CycleStage::AfterPreSmoothing, d)?;

    if ctx.config.f_smoothing {
        f_smoothing(mat, transfer, correction, d);
        *c += &*correction;
        ctx.observer.observe(level, CycleStage::AfterPreFSmoothing, d)?;
    }

    spmv_into(&transfer.restriction, d, coarse_defect);
    coarse_accumulator.fill(0.0);
    let repeats = if coarser.len() == 1 {
        1
    } else {
        ctx.config.cycle_type
    };
    for _ in 0..repeats {
        get_correction_and_update_defect(
            coarser,
            level + 1,
            coarse_correction,
            coarse_defect,
            ctx,
        )?;
        *coarse_accumulator += &*coarse_correction;
    }

    spmv_into(&transfer.prolongation, coarse_accumulator, correction);
    *c += &*correction;
    matmul_minus(mat, d, correction);
    ctx.observer.observe(level, CycleStage::AfterCoarseCorrection, d)?;

    if ctx.config.f_smoothing {
        f_smoothing(mat, transfer, correction, d);
        *c += &*correction;
        ctx.observer.observe(level, CycleStage::AfterPostFSmoothing, d)?;
    }

    for _ in 0..ctx.config.num_postsmooth {
        smoothers.post.apply_update_defect(correction, d)?;
        *c += &*correction;
    }
    ctx.observer.observe(level, CycleStage::AfterPostSmoothing, d)
}
