//! Contact detection on a single heatmap frame.

use super::gaussian::{self, Params};
use super::neutral::{self, NeutralMode};
use super::{blur, cluster, maximas, overlaps};
use super::{Cluster, Contact, DetectError, Image};
use crate::math::Vec2;

use std::f64::consts::PI;

#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Whether output dimensions should be normalized: positions to
    /// [0, 1], sizes to the heatmap diagonal, orientation to [0, 1).
    pub normalize: bool,

    pub neutral_mode: NeutralMode,

    /// An offset added to the calculated neutral value. For
    /// [`NeutralMode::Constant`] this *is* the neutral value.
    pub neutral_value_offset: f64,

    /// After how many frames the neutral value is recalculated.
    /// 1 recalculates every frame.
    pub neutral_value_backoff: usize,

    /// Cells above this value (after neutral subtraction) start a cluster
    /// search.
    pub activation_threshold: f64,

    /// Cells below this value terminate a cluster search.
    pub deactivation_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            normalize: false,
            neutral_mode: NeutralMode::Mode,
            neutral_value_offset: 0.0,
            neutral_value_backoff: 1,
            activation_threshold: 24.0 / 255.0,
            deactivation_threshold: 20.0 / 255.0,
        }
    }
}

/// How many merge passes are attempted before a frame is given up on.
const MERGE_ITERATIONS: usize = 5;

/// How many iterations of weighted least squares each fit runs.
const FIT_ITERATIONS: usize = 3;

pub struct Detector {
    config: DetectorConfig,

    // The diagonal of the heatmap, for normalizing sizes.
    input_diagonal: f64,

    // The heatmap with the neutral value subtracted.
    img_neutral: Image<f64>,

    // The blurred heatmap.
    img_blurred: Image<f64>,

    kernel_blur: [[f64; 3]; 3],

    maximas: Vec<(usize, usize)>,

    clusters: Vec<Cluster>,
    clusters_temp: Vec<Cluster>,

    // Scratch for the cluster flood fill.
    visited: Image<bool>,
    span_stack: Vec<(usize, usize, f64)>,

    fitting_params: Vec<Params>,
    fitting_temp: Image<f64>,

    // Frames left before the neutral value is recalculated.
    counter: usize,

    neutral: f64,
}

impl Detector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            input_diagonal: 0.0,
            img_neutral: Image::default(),
            img_blurred: Image::default(),
            kernel_blur: blur::gaussian_kernel(0.75),
            maximas: Vec::new(),
            clusters: Vec::new(),
            clusters_temp: Vec::new(),
            visited: Image::default(),
            span_stack: Vec::new(),
            fitting_params: Vec::new(),
            fitting_temp: Image::default(),
            counter: 0,
            neutral: 0.0,
        }
    }

    /// Searches for contacts in a heatmap.
    ///
    /// The heatmap must be normalized so that high values mean touch.
    /// Detected contacts are appended to `contacts` (which is cleared
    /// first). A cluster merge failure drops the whole frame.
    pub fn detect(
        &mut self,
        heatmap: &Image<f64>,
        contacts: &mut Vec<Contact>,
    ) -> Result<(), DetectError> {
        let rows = heatmap.rows();
        let cols = heatmap.cols();

        contacts.clear();
        self.clusters.clear();
        self.fitting_params.clear();

        if rows < 3 || cols < 3 {
            return Ok(());
        }

        if self.img_neutral.rows() != rows || self.img_neutral.cols() != cols {
            self.img_neutral.resize(rows, cols);
            self.img_blurred.resize(rows, cols);
            self.fitting_temp.resize(rows, cols);
            self.visited.resize(rows, cols);

            self.input_diagonal = ((cols - 1) as f64).hypot((rows - 1) as f64);
            self.counter = 0;
        }

        if self.counter == 0 {
            self.neutral = neutral::calculate(
                heatmap,
                self.config.neutral_mode,
                self.config.neutral_value_offset,
            );
        }

        self.counter = (self.counter + 1) % self.config.neutral_value_backoff.max(1);

        // Subtract the neutral value from the whole heatmap.
        for (out, &v) in self
            .img_neutral
            .data_mut()
            .iter_mut()
            .zip(heatmap.data().iter())
        {
            *out = (v - self.neutral).max(0.0);
        }

        blur::convolve(&self.img_neutral, &self.kernel_blur, &mut self.img_blurred);

        let athresh = self.config.activation_threshold;
        let dthresh = self.config.deactivation_threshold;

        maximas::find(&self.img_blurred, athresh, &mut self.maximas);

        for &point in &self.maximas {
            let Some(mut cluster) = cluster::span(
                &self.img_blurred,
                point,
                athresh,
                dthresh,
                &mut self.visited,
                &mut self.span_stack,
            ) else {
                continue;
            };

            // Extend the sides of the cluster by one pixel.
            cluster.min_x = cluster.min_x.saturating_sub(1);
            cluster.min_y = cluster.min_y.saturating_sub(1);
            cluster.max_x = (cluster.max_x + 1).min(cols - 1);
            cluster.max_y = (cluster.max_y + 1).min(rows - 1);

            // Gaussian fitting needs at least 3x3 pixels to work with.
            if cluster.width() < 3 || cluster.height() < 3 {
                continue;
            }

            self.clusters.push(cluster);
        }

        overlaps::merge(&mut self.clusters, &mut self.clusters_temp, MERGE_ITERATIONS)?;

        for &cluster in &self.clusters {
            self.fitting_params.push(Params::new(cluster));
        }

        gaussian::fit(
            &mut self.fitting_params,
            &self.img_blurred,
            &mut self.fitting_temp,
            FIT_ITERATIONS,
        );

        let dimensions = Vec2::new((cols - 1) as f64, (rows - 1) as f64);

        for p in &self.fitting_params {
            if !p.valid {
                continue;
            }

            let Some(cov) = p.prec.inverse() else {
                continue;
            };

            let eigen = cov.eigen();

            let mut mean = p.mean;

            // The eigenvalues are the squared radii of the ellipse; the
            // contact carries the diameters.
            let mut size = Vec2::new(
                2.0 * eigen.w[0].abs().sqrt(),
                2.0 * eigen.w[1].abs().sqrt(),
            );

            // The eigenvector of the smaller eigenvalue is normal to the
            // major axis; measuring it against the Y axis yields the
            // major axis angle against X.
            let angle = eigen.v[0].x.atan2(eigen.v[0].y);

            // A contact cannot face up or down, so fold the angle into
            // [0, pi) to be consistent.
            let mut orientation = if angle < 0.0 {
                angle + PI
            } else if angle >= PI {
                angle - PI
            } else {
                angle
            };

            if self.config.normalize {
                mean.x /= dimensions.x;
                mean.y /= dimensions.y;
                size = size * (1.0 / self.input_diagonal);
                orientation /= PI;
            }

            contacts.push(Contact {
                mean,
                size,
                orientation,
                normalized: self.config.normalize,
                index: None,
                valid: None,
                stable: None,
            });
        }

        Ok(())
    }
}
