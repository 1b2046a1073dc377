//! General utilities that don't have a specific home: random vectors, norms,
//! model problems and loading systems from disk.

use std::path::Path;
use std::time::Duration;

use rand::Rng;

use crate::error::{AmgError, Result};
use crate::{CooMatrix, CsrMatrix, Vector};

pub fn random_vec(size: usize) -> Vector {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen_range(-2.0..2.0)).collect()
}

pub fn two_norm(vec: &Vector) -> f64 {
    vec.dot(vec).sqrt()
}

/// 1D Poisson matrix `tridiag(-1, 2, -1)` with Dirichlet boundaries.
pub fn laplace_1d(n: usize) -> CsrMatrix {
    let mut mat = CooMatrix::new((n, n));
    for i in 0..n {
        if i > 0 {
            mat.add_triplet(i, i - 1, -1.0);
        }
        mat.add_triplet(i, i, 2.0);
        if i + 1 < n {
            mat.add_triplet(i, i + 1, -1.0);
        }
    }
    mat.to_csr()
}

/// 5-point Laplacian on an `nx` by `ny` grid with Dirichlet boundaries.
pub fn laplace_2d(nx: usize, ny: usize) -> CsrMatrix {
    anisotropic_2d(nx, ny, 1.0)
}

/// 5-point stencil of `-eps u_xx - u_yy` on an `nx` by `ny` grid. Unknowns are
/// numbered row by row, `x` fastest.
pub fn anisotropic_2d(nx: usize, ny: usize, eps: f64) -> CsrMatrix {
    let n = nx * ny;
    let mut mat = CooMatrix::new((n, n));
    for y in 0..ny {
        for x in 0..nx {
            let i = y * nx + x;
            mat.add_triplet(i, i, 2.0 * eps + 2.0);
            if x > 0 {
                mat.add_triplet(i, i - 1, -eps);
            }
            if x + 1 < nx {
                mat.add_triplet(i, i + 1, -eps);
            }
            if y > 0 {
                mat.add_triplet(i, i - nx, -1.0);
            }
            if y + 1 < ny {
                mat.add_triplet(i, i + nx, -1.0);
            }
        }
    }
    mat.to_csr()
}

/// Loads a matrix in matrix market format and converts it to CSR.
pub fn load_matrix<P: AsRef<Path>>(path: P) -> Result<CsrMatrix> {
    let path = path.as_ref();
    info!("Loading matrix from {}", path.display());
    let tri = sprs::io::read_matrix_market::<f64, usize, _>(path).map_err(|e| AmgError::Parse {
        what: path.display().to_string(),
        reason: format!("{e:?}"),
    })?;
    Ok(tri.to_csr())
}

/// Loads a whitespace separated vector, one or more values per line.
pub fn load_vec<P: AsRef<Path>>(path: P) -> Result<Vector> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let data = contents
        .split_whitespace()
        .map(|s| {
            s.parse::<f64>().map_err(|e| AmgError::Parse {
                what: path.display().to_string(),
                reason: format!("'{s}': {e}"),
            })
        })
        .collect::<Result<Vec<f64>>>()?;
    Ok(Vector::from(data))
}

pub fn format_duration(duration: &Duration) -> String {
    let seconds = duration.as_secs();
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let minutes = minutes % 60;
    let millis = duration.subsec_millis();
    let seconds = seconds % 60;

    format!("{hours} hours, {minutes} minutes, {seconds}.{millis:03} seconds")
}
