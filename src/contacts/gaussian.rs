//! Gaussian fitting: turns clusters into sub-pixel ellipse parameters.
//!
//! For every cluster a scaled 2D Gaussian
//! `alpha * exp(-0.5 * (v - mu)^T P (v - mu))`
//! is fitted to the heatmap restricted to the cluster bounds, using
//! iterated weighted least squares on the log-quadratic form. Overlapping
//! fits compete for intensity through per-pixel weight maps that are
//! re-normalized against the sum of all fits each iteration.
//!
//! All fitting happens in coordinates normalized to [-1, 1] to keep the
//! 6x6 normal equations well conditioned; parameters are transformed back
//! afterwards.

use super::{Cluster, Image};
use crate::math::{self, Mat2, Vec2};

/// The parameters of one Gaussian fit.
///
/// The weight map is indexed relative to `bounds` and must have matching
/// dimensions. A fit that fails numerically is marked invalid and skipped
/// by all later stages; the other fits of the frame are unaffected.
#[derive(Debug, Clone)]
pub struct Params {
    pub valid: bool,

    /// alpha
    pub scale: f64,

    /// mu
    pub mean: Vec2,

    /// The precision matrix, i.e. the inverse of the covariance matrix.
    pub prec: Mat2,

    /// The sampling window on the heatmap.
    pub bounds: Cluster,

    /// The per-pixel weights inside the sampling window.
    pub weights: Image<f64>,
}

impl Params {
    /// Initial parameters for a cluster: unit Gaussian at the cluster
    /// center.
    pub fn new(bounds: Cluster) -> Self {
        Self {
            valid: true,
            scale: 1.0,
            mean: bounds.center(),
            prec: Mat2::identity(),
            weights: Image::new(bounds.height(), bounds.width()),
            bounds,
        }
    }
}

/// The unnormalized Gaussian density at `x`.
fn gaussian_like(x: Vec2, mean: Vec2, prec: &Mat2) -> f64 {
    (-0.5 * prec.quadratic(x - mean)).exp()
}

/// Evaluates all Gaussians over their windows and normalizes the weight of
/// each fit against the total at every pixel. This splits the intensity of
/// overlapping contacts between the competing fits.
fn update_weights(params: &mut [Params], total: &mut Image<f64>, scale: Vec2) {
    total.fill(0.0);

    for p in params.iter_mut() {
        if !p.valid {
            continue;
        }

        for iy in p.bounds.min_y..=p.bounds.max_y {
            let y = iy as f64 * scale.y - 1.0;

            for ix in p.bounds.min_x..=p.bounds.max_x {
                let x = ix as f64 * scale.x - 1.0;

                let v = p.scale * gaussian_like(Vec2::new(x, y), p.mean, &p.prec);
                p.weights[(iy - p.bounds.min_y, ix - p.bounds.min_x)] = v;
            }
        }
    }

    for p in params.iter() {
        if !p.valid {
            continue;
        }

        for iy in p.bounds.min_y..=p.bounds.max_y {
            for ix in p.bounds.min_x..=p.bounds.max_x {
                total[(iy, ix)] += p.weights[(iy - p.bounds.min_y, ix - p.bounds.min_x)];
            }
        }
    }

    for p in params.iter_mut() {
        if !p.valid {
            continue;
        }

        for iy in p.bounds.min_y..=p.bounds.max_y {
            for ix in p.bounds.min_x..=p.bounds.max_x {
                let t = total[(iy, ix)];

                if t > 0.0 {
                    p.weights[(iy - p.bounds.min_y, ix - p.bounds.min_x)] /= t;
                }
            }
        }
    }
}

/// Assembles the 6x6 normal equations of the weighted log-quadratic least
/// squares problem over the sampling window.
fn assemble_system(p: &Params, data: &Image<f64>, scale: Vec2) -> ([[f64; 6]; 6], [f64; 6]) {
    let mut m = [[0.0; 6]; 6];
    let mut rhs = [0.0; 6];

    for iy in p.bounds.min_y..=p.bounds.max_y {
        let y = iy as f64 * scale.y - 1.0;

        for ix in p.bounds.min_x..=p.bounds.max_x {
            let x = ix as f64 * scale.x - 1.0;

            let w = p.weights[(iy - p.bounds.min_y, ix - p.bounds.min_x)];
            let d = w * data[(iy, ix)];
            let v = (d + math::EPS).ln() * d * d;

            let basis = [x * x, x * y, y * y, x, y, 1.0];

            for r in 0..6 {
                rhs[r] += v * basis[r];

                for c in 0..6 {
                    m[r][c] += d * d * basis[r] * basis[c];
                }
            }
        }
    }

    // The quadratic form carries the xy coefficient twice, so its column
    // picks up a factor of two relative to the plain product basis.
    for row in &mut m {
        row[1] *= 2.0;
    }

    (m, rhs)
}

/// Extracts `alpha`, `mu` and `P` from the solved polynomial coefficients.
/// Fails if the precision matrix is (close to) singular.
fn extract_params(chi: &[f64; 6], p: &mut Params) -> bool {
    p.prec = Mat2::new(-2.0 * chi[0], -2.0 * chi[1], -2.0 * chi[2]);

    let det = p.prec.det();
    if det.abs() <= math::EPS {
        return false;
    }

    // mu = P^-1 * (chi3, chi4)
    p.mean.x = (p.prec.yy * chi[3] - p.prec.xy * chi[4]) / det;
    p.mean.y = (p.prec.xx * chi[4] - p.prec.xy * chi[3]) / det;

    p.scale = (chi[5] + p.prec.quadratic(p.mean) / 2.0).exp();

    true
}

/// Runs the iterated fit over all parameter sets.
///
/// `total` is scratch storage with the dimensions of `data`. Parameters
/// are updated in place; sets that fail numerically come out with
/// `valid == false`.
pub fn fit(params: &mut [Params], data: &Image<f64>, total: &mut Image<f64>, iterations: usize) {
    if data.rows() == 0 || data.cols() == 0 {
        return;
    }

    let scale = Vec2::new(2.0 / data.cols() as f64, 2.0 / data.rows() as f64);

    // Transform into the normalized coordinate system.
    for p in params.iter_mut() {
        if !p.valid {
            continue;
        }

        p.mean.x = p.mean.x * scale.x - 1.0;
        p.mean.y = p.mean.y * scale.y - 1.0;

        // (S Sigma S^T)^-1 = S^-T P S^-1
        p.prec.xx /= scale.x * scale.x;
        p.prec.xy /= scale.x * scale.y;
        p.prec.yy /= scale.y * scale.y;
    }

    for _ in 0..iterations {
        update_weights(params, total, scale);

        for p in params.iter_mut() {
            if !p.valid {
                continue;
            }

            let (m, rhs) = assemble_system(p, data, scale);

            let Some(chi) = math::solve6(m, rhs) else {
                p.valid = false;
                continue;
            };

            p.valid = extract_params(&chi, p);
        }
    }

    // Transform back to pixel coordinates.
    for p in params.iter_mut() {
        if !p.valid {
            continue;
        }

        p.mean.x = (p.mean.x + 1.0) / scale.x;
        p.mean.y = (p.mean.y + 1.0) / scale.y;

        p.prec.xx *= scale.x * scale.x;
        p.prec.xy *= scale.x * scale.y;
        p.prec.yy *= scale.y * scale.y;
    }
}
