//! The AMG hierarchy: setup of the levels and the entry points of the cycle.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::base_solver::BaseSolver;
use crate::coarsening::coarsen;
use crate::config::{AggressiveCoarsening, AmgConfig};
use crate::cycle::{
    get_correction_and_update_defect, write_connection_matrix, AmgLevel, Both, CycleContext,
    DebugWriter, GridTransfer, LevelSmoothers, ReductionLogger, Scratch, StageReduction,
};
use crate::error::{AmgError, Result};
use crate::galerkin::galerkin_product;
use crate::interpolation::{classical, InterpolationType};
use crate::parallel_ops::{density, diagonal};
use crate::smoother::Smoother;
use crate::solver::Preconditioner;
use crate::utils::format_duration;
use crate::{CsrMatrix, Vector};

/// Supplies node coordinates of the finest level for the debug dumps.
pub trait PositionProvider: Send + Sync {
    fn dimension(&self) -> usize;

    /// One position per row of the finest matrix. Unused coordinates are zero.
    fn positions(&self) -> Vec<[f64; 3]>;
}

/// Setup statistics of one level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelInformation {
    pub level: usize,
    pub setup_time: Duration,
    pub rows: usize,
    pub nnz: usize,
    pub density: f64,
    pub isolated_rows: usize,
    pub empty_interpolation_rows: usize,
    pub zero_diagonal_rows: usize,
}

impl LevelInformation {
    /// Isolated rows, empty interpolation rows and zero diagonals all lose part
    /// of the correction without failing.
    pub fn has_accuracy_concerns(&self) -> bool {
        self.isolated_rows > 0 || self.empty_interpolation_rows > 0 || self.zero_diagonal_rows > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyState {
    Uninitialized,
    Building { level: usize },
    Ready,
}

fn same_instance(a: &Arc<dyn Smoother>, b: &Arc<dyn Smoother>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Classical algebraic multigrid.
///
/// Configure the smoothers and the base solver, then hand the fine matrix to
/// [`preprocess`](Self::preprocess). Afterwards every call to
/// [`get_correction`](Self::get_correction) performs one cycle.
pub struct AmgBase {
    config: AmgConfig,
    presmoother: Option<Arc<dyn Smoother>>,
    postsmoother: Option<Arc<dyn Smoother>>,
    base_solver: Option<Box<dyn BaseSolver>>,
    position_provider: Option<Arc<dyn PositionProvider>>,

    fine_matrix: Option<Arc<CsrMatrix>>,
    levels: Vec<AmgLevel>,
    level_information: Vec<LevelInformation>,
    /// Per level, the index of every unknown on the finest level.
    original_indices: Vec<Vec<usize>>,
    /// Per level positions, only filled when writing debug output.
    positions: Vec<Vec<[f64; 3]>>,
    state: HierarchyState,
    operator_complexity: f64,
    grid_complexity: f64,
    warnings: Vec<String>,
    fine_defect: Vector,
    setup_time: Duration,
}

impl AmgBase {
    pub fn new(config: AmgConfig) -> Self {
        Self {
            config,
            presmoother: None,
            postsmoother: None,
            base_solver: None,
            position_provider: None,
            fine_matrix: None,
            levels: Vec::new(),
            level_information: Vec::new(),
            original_indices: Vec::new(),
            positions: Vec::new(),
            state: HierarchyState::Uninitialized,
            operator_complexity: 0.0,
            grid_complexity: 0.0,
            warnings: Vec::new(),
            fine_defect: Vector::zeros(0),
            setup_time: Duration::ZERO,
        }
    }

    /// Releases the old hierarchy and builds a new one for `mat`.
    pub fn preprocess(&mut self, mat: impl Into<Arc<CsrMatrix>>) -> Result<()> {
        self.cleanup();
        self.fine_matrix = Some(mat.into());
        self.init()
    }

    /// Builds the hierarchy for the stored fine matrix. On failure the hierarchy
    /// is left uninitialised.
    pub fn init(&mut self) -> Result<()> {
        self.release_levels();
        let result = self.build();
        if let Err(e) = &result {
            error!("AMG setup failed: {e}");
            self.release_levels();
        }
        result
    }

    /// Releases every level (the fine matrix stays) and resets the state.
    pub fn cleanup(&mut self) {
        self.release_levels();
    }

    fn release_levels(&mut self) {
        self.levels.clear();
        self.level_information.clear();
        self.original_indices.clear();
        self.positions.clear();
        self.warnings.clear();
        self.fine_defect = Vector::zeros(0);
        self.operator_complexity = 0.0;
        self.grid_complexity = 0.0;
        self.setup_time = Duration::ZERO;
        self.state = HierarchyState::Uninitialized;
    }

    fn build(&mut self) -> Result<()> {
        self.config.validate()?;
        let presmoother = self.presmoother.clone().ok_or(AmgError::MissingComponent {
            component: "presmoother",
            setter: "set_presmoother",
        })?;
        let postsmoother = self.postsmoother.clone().ok_or(AmgError::MissingComponent {
            component: "postsmoother",
            setter: "set_postsmoother",
        })?;
        if self.base_solver.is_none() {
            return Err(AmgError::MissingComponent {
                component: "base solver",
                setter: "set_base_solver",
            });
        }
        let fine = self.fine_matrix.clone().ok_or(AmgError::MissingComponent {
            component: "fine matrix",
            setter: "preprocess",
        })?;
        if fine.rows() != fine.cols() {
            return Err(AmgError::NotSquare {
                level: 0,
                rows: fine.rows(),
                cols: fine.cols(),
            });
        }

        let dump_prefix = self.config.write_matrices.clone();
        let dimension = match (&dump_prefix, &self.position_provider) {
            (None, _) => 0,
            (Some(_), None) => {
                return Err(AmgError::MissingComponent {
                    component: "position provider",
                    setter: "set_position_provider",
                })
            }
            (Some(_), Some(provider)) => {
                let positions = provider.positions();
                if positions.len() != fine.rows() {
                    return Err(AmgError::DimensionMismatch {
                        context: "positions",
                        expected: fine.rows(),
                        got: positions.len(),
                    });
                }
                self.positions.push(positions);
                provider.dimension()
            }
        };

        info!(
            "AMG setup: {} rows, {} nonzeros, {}, {} pre / {} post smoothing steps",
            fine.rows(),
            fine.nnz(),
            self.config.cycle_name(),
            self.config.num_presmooth,
            self.config.num_postsmooth
        );
        let setup_start = Instant::now();
        self.original_indices.push((0..fine.rows()).collect());
        let mut current = fine;
        let mut level = 0;

        loop {
            self.state = HierarchyState::Building { level };
            let level_start = Instant::now();
            let rows = current.rows();
            let fill = density(&current);
            let zero_diagonal_rows = diagonal(&current).iter().filter(|&&v| v == 0.0).count();
            if zero_diagonal_rows > 0 {
                warn!("level {level}: {zero_diagonal_rows} rows with zero diagonal");
            }
            if let Some(prefix) = &dump_prefix {
                let mut path = prefix.clone().into_os_string();
                path.push(format!("AMG_A{level}.mat"));
                write_connection_matrix(
                    &PathBuf::from(path),
                    &current,
                    &self.positions[level],
                    dimension,
                    None,
                )?;
            }

            let mut info = LevelInformation {
                level,
                setup_time: Duration::ZERO,
                rows,
                nnz: current.nnz(),
                density: fill,
                isolated_rows: 0,
                empty_interpolation_rows: 0,
                zero_diagonal_rows,
            };

            // the fill limit guards against Galerkin fill-in, so the given matrix is exempt
            if rows <= self.config.max_nodes_for_base
                || (level > 0 && fill > self.config.max_fill_before_base)
                || level + 1 >= self.config.max_levels
            {
                debug!("level {level}: {rows} rows, density {fill:.3}, handed to the base solver");
                info.setup_time = level_start.elapsed();
                self.level_information.push(info);
                self.levels.push(AmgLevel::new(current));
                break;
            }

            let coarsening = match coarsen(&current, &self.config, level).and_then(|c| {
                if c.split.num_coarse() >= rows {
                    Err(AmgError::CoarseningStagnated {
                        level,
                        rows,
                        coarse: c.split.num_coarse(),
                    })
                } else {
                    Ok(c)
                }
            }) {
                Ok(coarsening) => coarsening,
                Err(e) if !self.config.strict_coarsening => {
                    warn!("{e}; level {level} is solved directly");
                    self.warnings.push(e.to_string());
                    info.setup_time = level_start.elapsed();
                    self.level_information.push(info);
                    self.levels.push(AmgLevel::new(current));
                    break;
                }
                Err(e) => return Err(e),
            };

            let interpolation_type = if coarsening.aggressive {
                InterpolationType::Extended
            } else {
                InterpolationType::Standard
            };
            let interpolation = classical(
                &current,
                &coarsening.strength,
                &coarsening.split,
                interpolation_type,
                self.config.interpolation_truncation,
            );
            let coarse = galerkin_product(
                &interpolation.restriction,
                &current,
                &interpolation.prolongation,
                level,
            )?;
            if coarse.rows() != coarse.cols() {
                return Err(AmgError::NotSquare {
                    level: level + 1,
                    rows: coarse.rows(),
                    cols: coarse.cols(),
                });
            }

            let smoothers = Self::level_smoothers(&presmoother, &postsmoother, &current)?;
            let n_coarse = coarsening.split.num_coarse();
            debug!(
                "level {level}: {rows} -> {n_coarse} rows (rate {:.3}), density {fill:.3}",
                n_coarse as f64 / rows as f64
            );

            let parents = self.original_indices[level].clone();
            self.original_indices.push(
                coarsening
                    .split
                    .coarse_to_fine()
                    .iter()
                    .map(|&fine_index| parents[fine_index])
                    .collect(),
            );
            if dump_prefix.is_some() {
                let next: Vec<[f64; 3]> = coarsening
                    .split
                    .coarse_to_fine()
                    .iter()
                    .map(|&fine_index| self.positions[level][fine_index])
                    .collect();
                self.positions.push(next);
            }

            info.isolated_rows = coarsening.split.num_isolated();
            info.empty_interpolation_rows = interpolation.empty_rows;
            if info.empty_interpolation_rows > info.isolated_rows {
                warn!(
                    "level {level}: {} fine rows without interpolation",
                    info.empty_interpolation_rows - info.isolated_rows
                );
            }
            info.setup_time = level_start.elapsed();
            self.level_information.push(info);

            let transfer = GridTransfer::new(
                interpolation.prolongation,
                interpolation.restriction,
                coarsening.split,
                &current,
            );
            self.levels.push(AmgLevel {
                scratch: Some(Scratch::new(rows, n_coarse)),
                smoothers: Some(smoothers),
                transfer: Some(transfer),
                matrix: current,
            });
            current = Arc::new(coarse);
            level += 1;
        }

        let coarsest = self.levels.last().map(|l| l.matrix().clone());
        if let (Some(base_solver), Some(coarsest)) = (self.base_solver.as_mut(), coarsest) {
            debug!(
                "initialising {} on {} rows",
                base_solver.name(),
                coarsest.rows()
            );
            base_solver.init(coarsest)?;
        }

        let fine_rows = self.levels[0].matrix().rows().max(1) as f64;
        let fine_nnz = self.levels[0].matrix().nnz().max(1) as f64;
        self.grid_complexity =
            self.levels.iter().map(|l| l.matrix().rows()).sum::<usize>() as f64 / fine_rows;
        self.operator_complexity =
            self.levels.iter().map(|l| l.matrix().nnz()).sum::<usize>() as f64 / fine_nnz;
        let threshold = self.config.complexity_warning_threshold;
        for (name, value) in [
            ("operator", self.operator_complexity),
            ("grid", self.grid_complexity),
        ] {
            if value > threshold {
                let message = format!("{name} complexity {value:.3} exceeds {threshold:.3}");
                warn!("{message}");
                self.warnings.push(message);
            }
        }

        self.fine_defect = Vector::zeros(self.levels[0].matrix().rows());
        self.setup_time = setup_start.elapsed();
        self.state = HierarchyState::Ready;
        info!(
            "AMG setup done in {}: {} levels, operator complexity {:.3}, grid complexity {:.3}",
            format_duration(&self.setup_time),
            self.used_levels(),
            self.operator_complexity,
            self.grid_complexity
        );
        Ok(())
    }

    fn level_smoothers(
        pre: &Arc<dyn Smoother>,
        post: &Arc<dyn Smoother>,
        mat: &Arc<CsrMatrix>,
    ) -> Result<LevelSmoothers> {
        let mut pre_instance = pre.boxed_clone();
        pre_instance.init(mat.clone())?;
        let pre_instance: Arc<dyn Smoother> = Arc::from(pre_instance);
        let post_instance = if same_instance(pre, post) {
            pre_instance.clone()
        } else {
            let mut post_instance = post.boxed_clone();
            post_instance.init(mat.clone())?;
            Arc::from(post_instance)
        };
        Ok(LevelSmoothers {
            pre: pre_instance,
            post: post_instance,
        })
    }

    fn check_ready(&self, c: &Vector, d: &Vector) -> Result<()> {
        if self.state != HierarchyState::Ready {
            return Err(AmgError::NotInitialized);
        }
        let n = self.fine_defect.len();
        for (context, vec) in [("correction", c), ("defect", d)] {
            if vec.len() != n {
                return Err(AmgError::DimensionMismatch {
                    context,
                    expected: n,
                    got: vec.len(),
                });
            }
        }
        Ok(())
    }

    /// One cycle: computes a correction `c` for the defect `d`. `d` is left
    /// untouched.
    pub fn get_correction(&mut self, c: &mut Vector, d: &Vector) -> Result<()> {
        self.check_ready(c, d)?;
        self.fine_defect.assign(d);
        let base_solver = self
            .base_solver
            .as_deref_mut()
            .ok_or(AmgError::NotInitialized)?;
        let mut observer = ();
        let mut ctx = CycleContext {
            config: &self.config,
            base_solver,
            observer: &mut observer,
        };
        get_correction_and_update_defect(
            &mut self.levels,
            0,
            c,
            &mut self.fine_defect,
            &mut ctx,
        )
    }

    /// One cycle that also updates `d` to the remaining defect `d - A c`.
    pub fn get_correction_and_update_defect(
        &mut self,
        c: &mut Vector,
        d: &mut Vector,
    ) -> Result<()> {
        self.check_ready(c, d)?;
        let base_solver = self
            .base_solver
            .as_deref_mut()
            .ok_or(AmgError::NotInitialized)?;
        let mut observer = ();
        let mut ctx = CycleContext {
            config: &self.config,
            base_solver,
            observer: &mut observer,
        };
        get_correction_and_update_defect(&mut self.levels, 0, c, d, &mut ctx)
    }

    /// Runs one cycle on a copy of `d` and logs how much every stage on every
    /// level reduces the defect. Writes the intermediate defects as well when
    /// debug output is configured.
    pub fn check(&mut self, d: &Vector) -> Result<Vec<StageReduction>> {
        let mut c = Vector::zeros(d.len());
        self.check_ready(&c, d)?;
        let mut defect = d.clone();
        let mut logger = ReductionLogger::new();
        let base_solver = self
            .base_solver
            .as_deref_mut()
            .ok_or(AmgError::NotInitialized)?;

        match (&self.config.write_matrices, &self.position_provider) {
            (Some(prefix), Some(provider)) => {
                let mut writer = DebugWriter {
                    prefix: prefix.clone(),
                    matrices: self.levels.iter().map(|l| l.matrix().clone()).collect(),
                    positions: &self.positions,
                    original_indices: &self.original_indices,
                    dimension: provider.dimension(),
                };
                let mut observer = Both(&mut logger, &mut writer);
                let mut ctx = CycleContext {
                    config: &self.config,
                    base_solver,
                    observer: &mut observer,
                };
                get_correction_and_update_defect(
                    &mut self.levels,
                    0,
                    &mut c,
                    &mut defect,
                    &mut ctx,
                )?;
            }
            _ => {
                let mut ctx = CycleContext {
                    config: &self.config,
                    base_solver,
                    observer: &mut logger,
                };
                get_correction_and_update_defect(
                    &mut self.levels,
                    0,
                    &mut c,
                    &mut defect,
                    &mut ctx,
                )?;
            }
        }
        Ok(logger.reductions)
    }

    /// Multi-line summary of the configuration and, once built, the levels.
    pub fn tostring(&self) -> String {
        self.to_string()
    }

    pub fn state(&self) -> HierarchyState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == HierarchyState::Ready
    }

    pub fn used_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[AmgLevel] {
        &self.levels
    }

    pub fn level_information(&self) -> &[LevelInformation] {
        &self.level_information
    }

    pub fn operator_complexity(&self) -> f64 {
        self.operator_complexity
    }

    pub fn grid_complexity(&self) -> f64 {
        self.grid_complexity
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn setup_time(&self) -> Duration {
        self.setup_time
    }

    pub fn matrix(&self, level: usize) -> Option<&Arc<CsrMatrix>> {
        self.levels.get(level).map(AmgLevel::matrix)
    }

    pub fn prolongation(&self, level: usize) -> Option<&CsrMatrix> {
        self.transfer(level).map(|t| &t.prolongation)
    }

    pub fn restriction(&self, level: usize) -> Option<&CsrMatrix> {
        self.transfer(level).map(|t| &t.restriction)
    }

    pub fn transfer(&self, level: usize) -> Option<&GridTransfer> {
        self.levels.get(level).and_then(AmgLevel::transfer)
    }

    /// For every unknown of `level`, its index on `level - 1`.
    pub fn parent_indices(&self, level: usize) -> Option<&[usize]> {
        match level {
            0 => None,
            _ => self.transfer(level - 1).map(|t| t.split.coarse_to_fine()),
        }
    }

    /// For every unknown of `level`, its index on the finest level.
    pub fn original_indices(&self, level: usize) -> Option<&[usize]> {
        self.original_indices.get(level).map(Vec::as_slice)
    }

    pub fn config(&self) -> &AmgConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: AmgConfig) {
        self.config = config;
    }

    pub fn set_presmoother(&mut self, smoother: Arc<dyn Smoother>) {
        self.presmoother = Some(smoother);
    }

    pub fn set_postsmoother(&mut self, smoother: Arc<dyn Smoother>) {
        self.postsmoother = Some(smoother);
    }

    /// Uses `smoother` for pre- and post-smoothing. The per-level instances are
    /// shared between both.
    pub fn set_smoother(&mut self, smoother: Arc<dyn Smoother>) {
        self.presmoother = Some(smoother.clone());
        self.postsmoother = Some(smoother);
    }

    pub fn set_base_solver(&mut self, base_solver: Box<dyn BaseSolver>) {
        self.base_solver = Some(base_solver);
    }

    pub fn set_position_provider(&mut self, provider: Arc<dyn PositionProvider>) {
        self.position_provider = Some(provider);
    }

    pub fn set_num_presmooth(&mut self, steps: usize) {
        self.config.num_presmooth = steps;
    }

    pub fn num_presmooth(&self) -> usize {
        self.config.num_presmooth
    }

    pub fn set_num_postsmooth(&mut self, steps: usize) {
        self.config.num_postsmooth = steps;
    }

    pub fn num_postsmooth(&self) -> usize {
        self.config.num_postsmooth
    }

    pub fn set_cycle_type(&mut self, cycle_type: usize) {
        self.config.cycle_type = cycle_type;
    }

    pub fn cycle_type(&self) -> usize {
        self.config.cycle_type
    }

    pub fn set_max_levels(&mut self, max_levels: usize) {
        self.config.max_levels = max_levels;
    }

    pub fn max_levels(&self) -> usize {
        self.config.max_levels
    }

    pub fn set_max_nodes_for_base(&mut self, nodes: usize) {
        self.config.max_nodes_for_base = nodes;
    }

    pub fn max_nodes_for_base(&self) -> usize {
        self.config.max_nodes_for_base
    }

    pub fn set_max_fill_before_base(&mut self, fill: f64) {
        self.config.max_fill_before_base = fill;
    }

    pub fn max_fill_before_base(&self) -> f64 {
        self.config.max_fill_before_base
    }

    pub fn set_theta(&mut self, theta: f64) {
        self.config.theta = theta;
    }

    pub fn theta(&self) -> f64 {
        self.config.theta
    }

    pub fn set_f_smoothing(&mut self, enable: bool) {
        self.config.f_smoothing = enable;
    }

    pub fn f_smoothing(&self) -> bool {
        self.config.f_smoothing
    }

    pub fn set_aggressive_coarsening(&mut self, variant: Option<AggressiveCoarsening>) {
        self.config.aggressive_coarsening = variant;
    }

    pub fn aggressive_coarsening(&self) -> Option<AggressiveCoarsening> {
        self.config.aggressive_coarsening
    }

    pub fn set_write_matrices(&mut self, prefix: Option<PathBuf>) {
        self.config.write_matrices = prefix;
    }
}

impl Preconditioner for AmgBase {
    fn apply(&mut self, r: &mut Vector) -> Result<()> {
        let mut c = Vector::zeros(r.len());
        self.get_correction(&mut c, r)?;
        r.assign(&c);
        Ok(())
    }
}

impl fmt::Display for AmgBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "AMGBase:")?;
        writeln!(f, " nr of pre smoothing steps (nu1)  = {}", self.config.num_presmooth)?;
        writeln!(f, " nr of post smoothing steps (nu2) = {}", self.config.num_postsmooth)?;
        writeln!(f, " cycle type = {}", self.config.cycle_name())?;
        writeln!(f, " max levels = {}", self.config.max_levels)?;
        match &self.presmoother {
            Some(s) => writeln!(f, " presmoother is {}.", s.name())?,
            None => writeln!(f, " no presmoother set!")?,
        }
        match &self.postsmoother {
            Some(s) => writeln!(f, " postsmoother is {}.", s.name())?,
            None => writeln!(f, " no postsmoother set!")?,
        }
        match &self.base_solver {
            Some(s) => writeln!(f, " basesolver is {}.", s.name())?,
            None => writeln!(f, " no basesolver set!")?,
        }
        writeln!(
            f,
            " base solver for <= {} nodes or density > {}",
            self.config.max_nodes_for_base, self.config.max_fill_before_base
        )?;
        writeln!(f, " theta = {}", self.config.theta)?;

        if self.level_information.is_empty() {
            return writeln!(f, " hierarchy: <empty>");
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>4}  {:>9}  {:>10}  {:>8}  {:>8}  {:>8}  {:>8}  {:>10}",
            "lev", "rows", "nnz", "density", "isolated", "empty P", "zero d", "time"
        )?;
        writeln!(
            f,
            "{:-<4}  {:-<9}  {:-<10}  {:-<8}  {:-<8}  {:-<8}  {:-<8}  {:-<10}",
            "", "", "", "", "", "", "", ""
        )?;
        for info in &self.level_information {
            writeln!(
                f,
                "{:>4}  {:>9}  {:>10}  {:>8.4}  {:>8}  {:>8}  {:>8}  {:>9.3}s",
                info.level,
                info.rows,
                info.nnz,
                info.density,
                info.isolated_rows,
                info.empty_interpolation_rows,
                info.zero_diagonal_rows,
                info.setup_time.as_secs_f64()
            )?;
        }
        writeln!(f, "Operator complexity: {:.3}", self.operator_complexity)?;
        writeln!(f, "Grid complexity: {:.3}", self.grid_complexity)?;
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for AmgBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sizes: Vec<usize> = self.levels.iter().map(|l| l.matrix().rows()).collect();
        let nnzs: Vec<usize> = self.levels.iter().map(|l| l.matrix().nnz()).collect();
        f.debug_struct("AmgBase")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("sizes", &sizes)
            .field("nnz", &nnzs)
            .field("operator_complexity", &self.operator_complexity)
            .field("grid_complexity", &self.grid_complexity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_solver::{DenseLu, LdlSolver};
    use crate::cycle::CycleStage;
    use crate::coarsening::NodeKind;
    use crate::parallel_ops::{diagonal, residual, spmv, transpose};
    use crate::smoother::GaussSeidel;
    use crate::solver::pcg;
    use crate::utils::{laplace_1d, laplace_2d, random_vec, two_norm};
    use approx::assert_relative_eq;
    use test_generator::test_resources;

    fn with_gauss_seidel(config: AmgConfig) -> AmgBase {
        let mut amg = AmgBase::new(config);
        amg.set_smoother(Arc::new(GaussSeidel::symmetric()));
        amg.set_base_solver(Box::new(LdlSolver::new()));
        amg
    }

    fn toy_config() -> AmgConfig {
        AmgConfig {
            max_nodes_for_base: 5,
            max_fill_before_base: 1.0,
            ..AmgConfig::default()
        }
    }

    /// Stationary iteration `x += M^{-1}(b - A x)`, returns the residual norms.
    fn iterate(amg: &mut AmgBase, mat: &CsrMatrix, b: &Vector, steps: usize) -> Vec<f64> {
        let mut x = Vector::zeros(b.len());
        let mut c = Vector::zeros(b.len());
        let mut norms = vec![two_norm(b)];
        for _ in 0..steps {
            let r = residual(mat, b, &x);
            amg.get_correction(&mut c, &r).unwrap();
            x += &c;
            norms.push(two_norm(&residual(mat, b, &x)));
        }
        norms
    }

    #[test]
    fn missing_components_are_reported() {
        let mut amg = AmgBase::new(AmgConfig::default());
        let err = amg.preprocess(laplace_1d(10)).unwrap_err();
        assert!(matches!(
            err,
            AmgError::MissingComponent {
                component: "presmoother",
                ..
            }
        ));
        assert!(err.is_setup_error());
        assert_eq!(amg.state(), HierarchyState::Uninitialized);

        amg.set_smoother(Arc::new(GaussSeidel::symmetric()));
        assert!(matches!(
            amg.init(),
            Err(AmgError::MissingComponent {
                component: "base solver",
                ..
            })
        ));
        assert_eq!(amg.used_levels(), 0);

        let mut amg = AmgBase::new(AmgConfig::default());
        amg.set_presmoother(Arc::new(GaussSeidel::forward()));
        amg.set_base_solver(Box::new(LdlSolver::new()));
        assert!(matches!(
            amg.preprocess(laplace_1d(10)),
            Err(AmgError::MissingComponent {
                component: "postsmoother",
                setter: "set_postsmoother",
            })
        ));
        assert!(!amg.is_ready());
    }

    #[test]
    fn uninitialised_hierarchy_refuses_to_solve() {
        let mut amg = with_gauss_seidel(AmgConfig::default());
        let mut c = Vector::zeros(4);
        let d = Vector::zeros(4);
        assert!(matches!(
            amg.get_correction(&mut c, &d),
            Err(AmgError::NotInitialized)
        ));
    }

    #[test]
    fn tridiagonal_two_level() {
        let config = AmgConfig {
            theta: 0.25,
            max_nodes_for_base: 2,
            ..AmgConfig::default()
        };
        let mut amg = with_gauss_seidel(config);
        let mat = laplace_1d(4);
        amg.preprocess(mat.clone()).unwrap();
        assert!(amg.is_ready());
        assert_eq!(amg.used_levels(), 2);
        assert_eq!(amg.matrix(1).unwrap().rows(), 2);
        assert_eq!(amg.parent_indices(1), Some(&[1, 3][..]));

        let d = Vector::from(vec![1.0, 0.0, 0.0, 0.0]);
        let mut c = Vector::zeros(4);
        amg.get_correction(&mut c, &d).unwrap();
        assert!(two_norm(&residual(&mat, &d, &c)) < two_norm(&d));

        let mut d_updated = d.clone();
        let mut c_updated = Vector::zeros(4);
        amg.get_correction_and_update_defect(&mut c_updated, &mut d_updated)
            .unwrap();
        assert_relative_eq!(c_updated, c, epsilon = 1e-12);
        assert_relative_eq!(d_updated, residual(&mat, &d, &c), epsilon = 1e-12);
    }

    #[test]
    fn dense_coarse_level_goes_to_base_solver() {
        // the 4 x 4 fine matrix is denser than the limit, its 2 x 2 coarse matrix too
        let config = AmgConfig {
            max_nodes_for_base: 1,
            max_fill_before_base: 0.6,
            ..AmgConfig::default()
        };
        let mut amg = with_gauss_seidel(config);
        amg.preprocess(laplace_1d(4)).unwrap();
        assert_eq!(amg.used_levels(), 2);
        assert!(amg.level_information()[0].density > 0.6);
    }

    #[test]
    fn single_row_hierarchies() {
        let mut amg = with_gauss_seidel(AmgConfig::default());
        amg.preprocess(laplace_1d(1)).unwrap();
        assert_eq!(amg.used_levels(), 1);
        let mut c = Vector::zeros(1);
        amg.get_correction(&mut c, &Vector::from(vec![3.0])).unwrap();
        assert_relative_eq!(c[0], 1.5, epsilon = 1e-14);

        // three rows coarsen to a single one
        let mut amg = with_gauss_seidel(AmgConfig {
            max_nodes_for_base: 1,
            ..AmgConfig::default()
        });
        let mat = laplace_1d(3);
        amg.preprocess(mat.clone()).unwrap();
        assert_eq!(amg.used_levels(), 2);
        assert_eq!(amg.matrix(1).unwrap().rows(), 1);
        assert_relative_eq!(*amg.matrix(1).unwrap().get(0, 0).unwrap(), 1.0, epsilon = 1e-14);
        let b = random_vec(3);
        let norms = iterate(&mut amg, &mat, &b, 20);
        assert!(norms[20] < 1e-8 * norms[0]);
    }

    #[test]
    fn zero_diagonal_rows_are_flagged_and_kept_fine() {
        let mut tri = sprs::TriMat::new((7, 7));
        for (v, (i, j)) in laplace_1d(7).iter() {
            if (i, j) != (3, 3) {
                tri.add_triplet(i, j, *v);
            }
        }
        let mut amg = with_gauss_seidel(AmgConfig {
            max_nodes_for_base: 2,
            ..AmgConfig::default()
        });
        amg.preprocess(tri.to_csr::<usize>()).unwrap();
        assert_eq!(amg.used_levels(), 2);

        let info = &amg.level_information()[0];
        assert_eq!(info.zero_diagonal_rows, 1);
        assert_eq!(info.isolated_rows, 1);
        assert!(info.has_accuracy_concerns());
        let split = &amg.transfer(0).unwrap().split;
        assert_eq!(split.kind(3), NodeKind::Isolated);
        assert_eq!(amg.parent_indices(1), Some(&[1, 5][..]));

        let p = amg.prolongation(0).unwrap();
        assert_eq!(p.outer_view(3).unwrap().nnz(), 0);
        let coarse = amg.matrix(1).unwrap();
        assert!(diagonal(coarse).iter().all(|&v| v > 0.0));
        assert!(coarse.get(0, 1).map_or(true, |&v| v == 0.0));
    }

    #[test]
    fn complexity_above_threshold_is_a_warning() {
        let mut amg = with_gauss_seidel(AmgConfig {
            complexity_warning_threshold: 1.0,
            ..AmgConfig::default()
        });
        amg.preprocess(laplace_2d(16, 16)).unwrap();
        assert!(amg.is_ready());
        assert!(amg.used_levels() > 1);
        assert_eq!(amg.warnings().len(), 2);
        assert!(amg.warnings()[0].starts_with("operator complexity"));
        assert!(amg.warnings()[1].starts_with("grid complexity"));

        let mut amg = with_gauss_seidel(AmgConfig {
            complexity_warning_threshold: 10.0,
            ..AmgConfig::default()
        });
        amg.preprocess(laplace_2d(16, 16)).unwrap();
        assert!(amg.warnings().is_empty());
    }

    #[test]
    fn single_level_is_a_direct_solve() {
        let mut amg = with_gauss_seidel(AmgConfig::default());
        let mat = laplace_1d(30);
        amg.preprocess(mat.clone()).unwrap();
        assert_eq!(amg.used_levels(), 1);
        assert_relative_eq!(amg.operator_complexity(), 1.0);
        let d = random_vec(30);
        let mut c = Vector::zeros(30);
        amg.get_correction(&mut c, &d).unwrap();
        assert_relative_eq!(spmv(&mat, &c), d, epsilon = 1e-10);
    }

    #[test]
    fn dimensions_and_galerkin_symmetry() {
        let mut amg = with_gauss_seidel(AmgConfig::default());
        amg.preprocess(laplace_2d(32, 32)).unwrap();
        assert!(amg.used_levels() > 2);
        for level in 0..amg.used_levels() - 1 {
            let a = amg.matrix(level).unwrap();
            let a_coarse = amg.matrix(level + 1).unwrap();
            let p = amg.prolongation(level).unwrap();
            let r = amg.restriction(level).unwrap();
            assert_eq!(p.shape(), (a.rows(), a_coarse.rows()));
            assert_eq!(r.shape(), (a_coarse.rows(), a.rows()));
            assert_eq!(&transpose(p), r);
            assert_eq!(a_coarse.rows(), a_coarse.cols());
            let at = transpose(a_coarse);
            for (val, (i, j)) in a_coarse.iter() {
                assert_relative_eq!(*val, *at.get(i, j).unwrap(), epsilon = 1e-10);
            }
        }
        let info = amg.level_information();
        assert_eq!(info.len(), amg.used_levels());
        assert!(info.iter().all(|l| !l.has_accuracy_concerns()));
    }

    #[test]
    fn laplacian_complexities() {
        let mut amg = with_gauss_seidel(AmgConfig::default());
        amg.preprocess(laplace_2d(40, 40)).unwrap();
        let grid = amg.grid_complexity();
        let op = amg.operator_complexity();
        assert!(grid.is_finite() && grid > 1.0 && grid < 2.0, "grid complexity {grid}");
        assert!(op.is_finite() && op > 1.0 && op < 3.5, "operator complexity {op}");
        let summary = amg.tostring();
        assert!(summary.contains("V-cycle"));
        assert!(summary.contains("Operator complexity"));
    }

    #[test]
    fn cleanup_and_reinit_are_idempotent() {
        let mat = laplace_2d(20, 20);
        let mut amg = with_gauss_seidel(AmgConfig::default());
        amg.preprocess(mat.clone()).unwrap();
        let levels = amg.used_levels();
        let rows: Vec<usize> = amg.level_information().iter().map(|l| l.rows).collect();
        let op = amg.operator_complexity();

        amg.cleanup();
        amg.cleanup();
        assert_eq!(amg.used_levels(), 0);
        assert_eq!(amg.state(), HierarchyState::Uninitialized);
        assert!(amg.level_information().is_empty());

        amg.preprocess(mat.clone()).unwrap();
        assert_eq!(amg.used_levels(), levels);
        let rebuilt: Vec<usize> = amg.level_information().iter().map(|l| l.rows).collect();
        assert_eq!(rebuilt, rows);
        assert_relative_eq!(amg.operator_complexity(), op);

        amg.cleanup();
        amg.init().unwrap();
        assert_eq!(amg.used_levels(), levels);
        assert_eq!(amg.matrix(levels - 1).unwrap().rows(), rows[levels - 1]);
    }

    #[test]
    fn toy_problem_converges_monotonically() {
        let mat = laplace_2d(3, 3);
        let mut amg = with_gauss_seidel(toy_config());
        amg.preprocess(mat.clone()).unwrap();
        assert_eq!(amg.used_levels(), 2);

        let b = Vector::from_elem(9, 1.0);
        let norms = iterate(&mut amg, &mat, &b, 20);
        for pair in norms.windows(2) {
            assert!(pair[1] <= pair[0] || pair[1] < 1e-13);
        }
        assert!(norms[20] < 1e-10 * norms[0]);
    }

    #[test]
    fn w_cycle_is_at_least_as_fast_as_v_cycle() {
        let mat = laplace_2d(24, 24);
        let config = AmgConfig {
            max_nodes_for_base: 10,
            max_fill_before_base: 1.0,
            num_presmooth: 1,
            num_postsmooth: 1,
            ..AmgConfig::default()
        };
        let b = random_vec(mat.rows());

        let mut v_cycle = with_gauss_seidel(config.clone());
        v_cycle.preprocess(mat.clone()).unwrap();
        assert!(v_cycle.used_levels() > 2);
        let v_norms = iterate(&mut v_cycle, &mat, &b, 4);

        let mut w_cycle = with_gauss_seidel(AmgConfig {
            cycle_type: 2,
            ..config
        });
        w_cycle.preprocess(mat.clone()).unwrap();
        let w_norms = iterate(&mut w_cycle, &mat, &b, 4);

        assert!(w_norms[4] <= v_norms[4] * (1.0 + 1e-6));
    }

    #[test]
    fn aliased_smoothers_are_shared_per_level() {
        let mut shared = with_gauss_seidel(AmgConfig::default());
        shared.preprocess(laplace_2d(16, 16)).unwrap();
        let smoothers = shared.levels()[0].smoothers().unwrap();
        assert!(smoothers.shared());
        assert!(same_instance(&smoothers.pre, &smoothers.post));

        let mut separate = AmgBase::new(AmgConfig::default());
        separate.set_presmoother(Arc::new(GaussSeidel::forward()));
        separate.set_postsmoother(Arc::new(GaussSeidel::backward()));
        separate.set_base_solver(Box::new(DenseLu::new()));
        separate.preprocess(laplace_2d(16, 16)).unwrap();
        assert!(!separate.levels()[0].smoothers().unwrap().shared());
        assert!(separate.levels().last().unwrap().smoothers().is_none());
    }

    #[test]
    fn f_smoothing_and_aggressive_coarsening_still_converge() {
        let mat = laplace_2d(20, 20);
        let config = AmgConfig {
            f_smoothing: true,
            aggressive_coarsening: Some(AggressiveCoarsening::TwoPath),
            ..AmgConfig::default()
        };
        let mut amg = with_gauss_seidel(config);
        amg.preprocess(mat.clone()).unwrap();
        let b = random_vec(mat.rows());
        let norms = iterate(&mut amg, &mat, &b, 20);
        assert!(norms[20] < 1e-2 * norms[0]);
    }

    #[test]
    fn failed_coarsening_falls_back_to_base_solver() {
        let mat: CsrMatrix = CsrMatrix::eye(150);
        let mut amg = with_gauss_seidel(AmgConfig::default());
        amg.preprocess(mat.clone()).unwrap();
        assert_eq!(amg.used_levels(), 1);
        assert_eq!(amg.warnings().len(), 1);

        let mut strict = with_gauss_seidel(AmgConfig {
            strict_coarsening: true,
            ..AmgConfig::default()
        });
        assert!(matches!(
            strict.preprocess(mat),
            Err(AmgError::EmptyCoarseSet { level: 0, .. })
        ));
        assert!(!strict.is_ready());
    }

    #[test]
    fn check_reports_every_stage() {
        let mat = laplace_2d(16, 16);
        let mut amg = with_gauss_seidel(AmgConfig {
            f_smoothing: true,
            ..AmgConfig::default()
        });
        amg.preprocess(mat.clone()).unwrap();
        let d = random_vec(mat.rows());
        let reductions = amg.check(&d).unwrap();
        let fine: Vec<CycleStage> = reductions
            .iter()
            .filter(|r| r.level == 0)
            .map(|r| r.stage)
            .collect();
        assert_eq!(
            fine,
            vec![
                CycleStage::AfterPreSmoothing,
                CycleStage::AfterPreFSmoothing,
                CycleStage::AfterCoarseCorrection,
                CycleStage::AfterPostFSmoothing,
                CycleStage::AfterPostSmoothing,
            ]
        );
        let last = reductions.iter().rev().find(|r| r.level == 0).unwrap();
        assert!(last.total < 1.0);
        assert!(reductions
            .iter()
            .any(|r| r.stage == CycleStage::AfterBaseSolve));
    }

    struct GridPositions {
        nx: usize,
        ny: usize,
    }

    impl PositionProvider for GridPositions {
        fn dimension(&self) -> usize {
            2
        }

        fn positions(&self) -> Vec<[f64; 3]> {
            (0..self.ny)
                .flat_map(|y| (0..self.nx).map(move |x| [x as f64, y as f64, 0.0]))
                .collect()
        }
    }

    #[test]
    fn debug_output_is_written() {
        let dir = std::env::temp_dir().join(format!("amg_base_debug_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let prefix = dir.join("run_");
        let mat = laplace_2d(12, 12);

        let mut amg = with_gauss_seidel(AmgConfig {
            write_matrices: Some(prefix.clone()),
            ..AmgConfig::default()
        });
        assert!(matches!(
            amg.preprocess(mat.clone()),
            Err(AmgError::MissingComponent {
                component: "position provider",
                ..
            })
        ));

        amg.set_position_provider(Arc::new(GridPositions { nx: 12, ny: 12 }));
        amg.preprocess(mat.clone()).unwrap();
        assert!(dir.join("run_AMG_A0.mat").exists());
        assert!(dir.join("run_AMG_A1.mat").exists());

        amg.check(&random_vec(mat.rows())).unwrap();
        let values = std::fs::read_to_string(dir.join("run_AMG_dp0.values")).unwrap();
        assert_eq!(values.lines().count(), mat.rows());
        for (i, line) in values.lines().enumerate() {
            let index: usize = line.split_whitespace().next().unwrap().parse().unwrap();
            assert_eq!(index, i);
        }
        assert!(dir.join("run_AMG_d0.values").exists());
        // the coarsest level is solved directly and not dumped
        assert!(!dir.join("run_AMG_dp1.values").exists());
        assert_eq!(amg.original_indices(1), amg.parent_indices(1));
        let header = std::fs::read_to_string(dir.join("run_AMG_dc0.mat")).unwrap();
        assert!(header.trim_end().ends_with("run_AMG_dc0.values"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn preconditioned_cg_converges() {
        let mat = laplace_2d(32, 32);
        let mut amg = with_gauss_seidel(AmgConfig::default());
        amg.preprocess(mat.clone()).unwrap();
        let b = random_vec(mat.rows());
        let x0 = Vector::zeros(mat.rows());
        let info = pcg(&mat, &b, &x0, 30, 1e-8, &mut amg).unwrap();
        assert!(info.converged);
        assert!(info.iterations < 20);
        assert!(two_norm(&residual(&mat, &b, &info.solution)) < 1e-6 * two_norm(&b));
    }

    fn test_symmetry(preconditioner: &mut dyn Preconditioner, dim: usize) {
        for _ in 0..5 {
            let u = random_vec(dim);
            let v = random_vec(dim);
            let mut preconditioned_v = v.clone();
            let mut preconditioned_u = u.clone();
            preconditioner.apply(&mut preconditioned_v).unwrap();
            preconditioner.apply(&mut preconditioned_u).unwrap();

            let left: f64 = u.dot(&preconditioned_v);
            let right: f64 = v.dot(&preconditioned_u);
            let difference = (left - right).abs() / (left.abs() + right.abs());
            assert!(
                difference < 1e-6,
                "\nLeft and right didn't match\nleft: {}\nright: {}\nrelative difference: {:+e}\n",
                left,
                right,
                difference
            );
        }
    }

    #[test_resources("test_matrices/*.mtx")]
    fn amg_cycle_is_symmetric_and_reduces_error(mat_path: &str) {
        let mat = crate::utils::load_matrix(mat_path).unwrap();
        let dim = mat.rows();
        let mut amg = with_gauss_seidel(AmgConfig {
            max_nodes_for_base: 20,
            ..AmgConfig::default()
        });
        amg.preprocess(mat.clone()).unwrap();
        assert!(amg.used_levels() >= 2);
        test_symmetry(&mut amg, dim);

        let b = random_vec(dim);
        let norms = iterate(&mut amg, &mat, &b, 10);
        assert!(norms[10] < 1e-2 * norms[0]);
    }
}
