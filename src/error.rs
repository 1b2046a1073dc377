//! Error type shared by hierarchy setup and cycle execution.

use thiserror::Error;

/// Result type alias using the crate's [`AmgError`].
pub type Result<T> = std::result::Result<T, AmgError>;

/// Errors raised while building or applying an AMG hierarchy.
///
/// Setup errors leave the hierarchy uninitialised; cycle errors abort the
/// current correction and are handed straight back to the caller.
#[derive(Error, Debug)]
pub enum AmgError {
    /// A required collaborator was not configured before `init`.
    #[error("no {component} configured; call {setter} before init")]
    MissingComponent {
        component: &'static str,
        setter: &'static str,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {parameter} = {value} ({reason})")]
    InvalidConfig {
        parameter: &'static str,
        value: String,
        reason: &'static str,
    },

    /// Operators handled by the hierarchy must be square.
    #[error("matrix on level {level} is not square ({rows} x {cols})")]
    NotSquare {
        level: usize,
        rows: usize,
        cols: usize,
    },

    /// Vector or matrix sizes do not agree.
    #[error("dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// Coarsening selected no coarse points although fine points exist.
    #[error(
        "coarsening produced no coarse points on level {level} ({fine} fine points); \
         try a smaller strength threshold theta or a larger max_nodes_for_base"
    )]
    EmptyCoarseSet { level: usize, fine: usize },

    /// Coarsening did not reduce the number of unknowns.
    #[error(
        "coarsening stagnated on level {level} ({rows} rows -> {coarse} coarse); \
         try a larger strength threshold theta"
    )]
    CoarseningStagnated {
        level: usize,
        rows: usize,
        coarse: usize,
    },

    /// The hierarchy is not ready for cycling.
    #[error("hierarchy is not initialised; call preprocess first")]
    NotInitialized,

    /// A smoother was applied before `init`.
    #[error("smoother {0} applied before init")]
    SmootherNotInitialized(String),

    /// A base solver was applied before `init`.
    #[error("base solver {0} applied before init")]
    BaseSolverNotInitialized(String),

    /// Factorization of the coarsest matrix failed.
    #[error("factorization of the coarsest matrix ({rows} rows) failed: {reason}")]
    Factorization { rows: usize, reason: String },

    /// A pivot vanished in the dense coarse solve.
    #[error("coarse matrix is singular (zero pivot in column {column})")]
    SingularMatrix { column: usize },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },
}

impl AmgError {
    /// Returns `true` for errors that are raised while building the hierarchy.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            AmgError::MissingComponent { .. }
                | AmgError::InvalidConfig { .. }
                | AmgError::NotSquare { .. }
                | AmgError::EmptyCoarseSet { .. }
                | AmgError::CoarseningStagnated { .. }
                | AmgError::Factorization { .. }
        )
    }
}
