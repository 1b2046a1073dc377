use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use amg_base::{
    amg::AmgBase,
    base_solver::{BaseSolver, DenseLu, LdlSolver},
    config::AmgConfig,
    parallel_ops::residual,
    smoother::{GaussSeidel, Jacobi, Smoother, L1},
    solver::{pcg, stationary},
    utils::{format_duration, laplace_2d, load_matrix, load_vec, random_vec, two_norm},
    Vector,
};
use structopt::StructOpt;
use strum_macros::{Display, EnumString};

#[macro_use]
extern crate log;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "amg_base",
    about = "Solve a sparse system with classical algebraic multigrid"
)]
struct Opt {
    /// Matrix file in matrix market format. Without it a 2D Laplacian is used.
    #[structopt(short, long, parse(from_os_str))]
    matrix: Option<PathBuf>,

    /// Grid size of the generated 2D Laplacian
    #[structopt(short, long, default_value = "64")]
    grid: usize,

    /// Right hand side, whitespace separated. Random if not given.
    #[structopt(long, parse(from_os_str))]
    rhs: Option<PathBuf>,

    /// AMG configuration in JSON, missing fields take their defaults
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Outer iteration. Options are: pcg, stationary
    #[structopt(short, long, default_value = "pcg")]
    solver: SolverArg,

    /// Smoother on every level. Options are: sgs, fgs, jacobi, l1
    #[structopt(long, default_value = "sgs")]
    smoother: SmootherArg,

    /// Solver for the coarsest level. Options are: ldl, lu
    #[structopt(long, default_value = "ldl")]
    base: BaseArg,

    /// Maximum number of iterations to perform
    #[structopt(long, default_value = "100")]
    max_iter: usize,

    /// Stop once the relative residual is below the tolerance
    #[structopt(short, long, default_value = "1e-8")]
    tolerance: f64,

    /// Run one instrumented cycle and report the reduction of every stage
    #[structopt(long)]
    check: bool,
}

#[derive(Debug, Display, EnumString)]
#[strum(ascii_case_insensitive)]
enum SolverArg {
    Pcg,
    Stationary,
}

#[derive(Debug, Display, EnumString)]
#[strum(ascii_case_insensitive)]
enum SmootherArg {
    Sgs,
    Fgs,
    Jacobi,
    L1,
}

#[derive(Debug, Display, EnumString)]
#[strum(ascii_case_insensitive)]
enum BaseArg {
    Ldl,
    Lu,
}

fn main() {
    pretty_env_logger::init();
    let opt = Opt::from_args();
    if let Err(e) = run(opt) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(opt: Opt) -> amg_base::Result<()> {
    let mat = match &opt.matrix {
        Some(path) => load_matrix(path)?,
        None => {
            info!("generating {0} x {0} Laplacian", opt.grid);
            laplace_2d(opt.grid, opt.grid)
        }
    };
    let b: Vector = match &opt.rhs {
        Some(path) => load_vec(path)?,
        None => random_vec(mat.rows()),
    };
    let config = match &opt.config {
        Some(path) => AmgConfig::from_json_file(path)?,
        None => AmgConfig::default(),
    };

    let smoother: Arc<dyn Smoother> = match opt.smoother {
        SmootherArg::Sgs => Arc::new(GaussSeidel::symmetric()),
        SmootherArg::Fgs => Arc::new(GaussSeidel::forward()),
        SmootherArg::Jacobi => Arc::new(Jacobi::default()),
        SmootherArg::L1 => Arc::new(L1::new()),
    };
    let base_solver: Box<dyn BaseSolver> = match opt.base {
        BaseArg::Ldl => Box::new(LdlSolver::new()),
        BaseArg::Lu => Box::new(DenseLu::new()),
    };

    let mut amg = AmgBase::new(config);
    amg.set_smoother(smoother);
    amg.set_base_solver(base_solver);

    let timer = Instant::now();
    amg.preprocess(mat.clone())?;
    info!("setup took {}", format_duration(&timer.elapsed()));
    println!("{amg}");

    if opt.check {
        let reductions = amg.check(&b)?;
        for r in reductions.iter().filter(|r| r.level == 0) {
            println!("{:?}: {:.3e}", r.stage, r.total);
        }
    }

    let x0 = Vector::zeros(mat.rows());
    let timer = Instant::now();
    let info = match opt.solver {
        SolverArg::Pcg => pcg(&mat, &b, &x0, opt.max_iter, opt.tolerance, &mut amg)?,
        SolverArg::Stationary => stationary(&mat, &b, &x0, opt.max_iter, opt.tolerance, &mut amg)?,
    };
    let relative = two_norm(&residual(&mat, &b, &info.solution)) / two_norm(&b);
    println!(
        "{} {} after {} iterations in {}, relative residual {relative:.3e}",
        opt.solver,
        if info.converged { "converged" } else { "stopped" },
        info.iterations,
        format_duration(&timer.elapsed())
    );
    Ok(())
}
