//! Classical algebraic multigrid (AMG) for sparse linear systems.
//!
//! <br>
//!
//! The solvers implemented here are intended for (nearly) symmetric positive definite
//! matrices, typically arising from discretizations of elliptic operators such as
//! diffusion. Optimal preconditioners for these systems are multigrid methods. When
//! no geometric information about the discretization is available the coarse levels
//! have to be built from the matrix coefficients alone, which is what algebraic
//! multigrid does.
//!
//! The method implemented is the classical Ruge-Stueben variant:
//!
//! 1. a strength-of-connection graph is extracted from the matrix ([`strength`]),
//! 2. the unknowns are split into coarse and fine points ([`coarsening`]),
//! 3. an interpolation `P` from the coarse points to all points is built and the
//!    restriction is taken as `R = P^T` ([`interpolation`]),
//! 4. the coarse operator is the Galerkin product `R A P` ([`galerkin`]).
//!
//! This is repeated until the coarsest matrix is small (or dense) enough to be handed
//! to a direct solver. [`amg::AmgBase`] owns the resulting hierarchy and applies
//! V-, W- or general gamma-cycles ([`cycle`]) either as a stationary iteration or
//! as a preconditioner inside [`solver::pcg`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use amg_base::{
//!     amg::AmgBase, base_solver::LdlSolver, config::AmgConfig, smoother::GaussSeidel,
//!     utils::laplace_2d, Vector,
//! };
//!
//! let mat = laplace_2d(32, 32);
//! let mut amg = AmgBase::new(AmgConfig::default());
//! amg.set_smoother(Arc::new(GaussSeidel::symmetric()));
//! amg.set_base_solver(Box::new(LdlSolver::new()));
//! amg.preprocess(mat.clone()).unwrap();
//!
//! let defect = Vector::from_elem(mat.rows(), 1.0);
//! let mut correction = Vector::zeros(mat.rows());
//! amg.get_correction(&mut correction, &defect).unwrap();
//! ```

use ndarray::{Array1, Array2};
use sprs::{CsMatBase, TriMatBase};

#[macro_use]
extern crate log;
extern crate approx;

pub mod amg;
pub mod base_solver;
pub mod coarsening;
pub mod config;
pub mod cycle;
pub mod error;
pub mod galerkin;
pub mod interpolation;
pub mod parallel_ops;
pub mod smoother;
pub mod solver;
pub mod strength;
pub mod utils;

pub type CsrMatrix = CsMatBase<f64, usize, Vec<usize>, Vec<usize>, Vec<f64>, usize>;
pub type CooMatrix = TriMatBase<Vec<usize>, Vec<f64>>;
pub type Vector = Array1<f64>;
pub type Matrix = Array2<f64>;

pub use error::{AmgError, Result};
