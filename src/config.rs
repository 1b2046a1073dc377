//! Tunable parameters of the hierarchy setup and the cycle.
//!
//! Everything that controls the behaviour of an [`AmgBase`](crate::amg::AmgBase)
//! lives in one [`AmgConfig`] value. It can be built in code, or read from a JSON
//! file where missing fields fall back to their defaults.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AmgError, Result};

/// Hard upper bound on the number of levels, which also bounds the recursion depth
/// of the cycle.
pub const MAX_LEVELS_LIMIT: usize = 32;

/// How off-diagonal couplings are compared when building the strength graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StrengthMeasure {
    /// `-a_ij >= theta * max_k(-a_ik)`: only negative couplings can be strong.
    #[default]
    Classical,
    /// `|a_ij| >= theta * max_k |a_ik|`.
    Absolute,
}

/// Aggressive coarsening of the first level.
///
/// The first coarsening pass runs on the graph of strong paths of length two,
/// where `j` is connected to `i` if there are at least one (`OnePath`) or two
/// (`TwoPath`) such paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggressiveCoarsening {
    OnePath,
    TwoPath,
}

impl AggressiveCoarsening {
    pub fn min_paths(&self) -> usize {
        match self {
            AggressiveCoarsening::OnePath => 1,
            AggressiveCoarsening::TwoPath => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmgConfig {
    /// Number of pre-smoothing steps (nu_1).
    pub num_presmooth: usize,
    /// Number of post-smoothing steps (nu_2).
    pub num_postsmooth: usize,
    /// Number of recursive coarse visits: 1 is a V-cycle, 2 a W-cycle.
    pub cycle_type: usize,
    /// Maximum number of levels, including the finest and the coarsest.
    pub max_levels: usize,
    /// A level with at most this many rows is solved directly.
    pub max_nodes_for_base: usize,
    /// A level whose density `nnz / rows^2` exceeds this is solved directly.
    pub max_fill_before_base: f64,
    /// Strength threshold theta.
    pub theta: f64,
    pub strength_measure: StrengthMeasure,
    /// Run the Ruge-Stueben second pass that fixes F-F connections without a
    /// common coarse point.
    pub second_pass: bool,
    pub aggressive_coarsening: Option<AggressiveCoarsening>,
    /// Relative threshold below which interpolation weights are dropped.
    pub interpolation_truncation: f64,
    /// Extra Jacobi-like relaxation on fine points around the coarse correction.
    pub f_smoothing: bool,
    /// Abort setup instead of falling back to the base solver when coarsening fails.
    pub strict_coarsening: bool,
    /// Operator or grid complexities above this are reported as warnings.
    pub complexity_warning_threshold: f64,
    /// Path prefix for debug matrix and vector dumps.
    pub write_matrices: Option<PathBuf>,
}

impl Default for AmgConfig {
    fn default() -> Self {
        Self {
            num_presmooth: 2,
            num_postsmooth: 2,
            cycle_type: 1,
            max_levels: MAX_LEVELS_LIMIT,
            max_nodes_for_base: 100,
            max_fill_before_base: 0.5,
            theta: 0.25,
            strength_measure: StrengthMeasure::default(),
            second_pass: true,
            aggressive_coarsening: None,
            interpolation_truncation: 0.0,
            f_smoothing: false,
            strict_coarsening: false,
            complexity_warning_threshold: 3.0,
            write_matrices: None,
        }
    }
}

impl AmgConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let config: AmgConfig = serde_json::from_reader(reader).map_err(|e| AmgError::Parse {
            what: path.as_ref().display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        // Serializing plain data into a String cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.cycle_type == 0 {
            return Err(AmgError::InvalidConfig {
                parameter: "cycle_type",
                value: self.cycle_type.to_string(),
                reason: "must be at least 1 (1 = V-cycle, 2 = W-cycle)",
            });
        }
        if self.max_levels == 0 || self.max_levels > MAX_LEVELS_LIMIT {
            return Err(AmgError::InvalidConfig {
                parameter: "max_levels",
                value: self.max_levels.to_string(),
                reason: "must be between 1 and 32",
            });
        }
        if !(self.theta > 0.0 && self.theta <= 1.0) {
            return Err(AmgError::InvalidConfig {
                parameter: "theta",
                value: self.theta.to_string(),
                reason: "must be in (0, 1]",
            });
        }
        if self.max_fill_before_base.is_nan() || self.max_fill_before_base < 0.0 {
            return Err(AmgError::InvalidConfig {
                parameter: "max_fill_before_base",
                value: self.max_fill_before_base.to_string(),
                reason: "must be non-negative",
            });
        }
        if self.interpolation_truncation.is_nan()
            || !(0.0..1.0).contains(&self.interpolation_truncation)
        {
            return Err(AmgError::InvalidConfig {
                parameter: "interpolation_truncation",
                value: self.interpolation_truncation.to_string(),
                reason: "must be in [0, 1)",
            });
        }
        Ok(())
    }

    /// Human readable name of the cycle.
    pub fn cycle_name(&self) -> String {
        match self.cycle_type {
            1 => "V-cycle".to_string(),
            2 => "W-cycle".to_string(),
            gamma => format!("gamma = {gamma}"),
        }
    }
}
