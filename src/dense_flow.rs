use anyhow::Result;
use log::warn;
use ndarray as nd;
use serde::{Deserialize, Serialize};

use crate::image::Image;
use crate::my_types::*;
use crate::optical_flow::{usable_levels, LkParams, PyramidalLk};
use crate::pyramid::Pyramid;

/// Per-pixel motion between two frames, stored as `[row, column, (dx, dy)]`.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplacementField {
    pub data: nd::Array3<f32>,
}

impl DisplacementField {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            data: nd::Array3::zeros((height, width, 2)),
        }
    }

    /// Every pixel moves by the same vector.
    pub fn uniform(width: usize, height: usize, motion: Vector2d) -> Self {
        let mut field = Self::zeros(width, height);
        field
            .data
            .index_axis_mut(nd::Axis(2), 0)
            .fill(motion.x as f32);
        field
            .data
            .index_axis_mut(nd::Axis(2), 1)
            .fill(motion.y as f32);
        field
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn shape(&self) -> ImageShape {
        (self.width(), self.height())
    }

    pub fn motion(&self, x: usize, y: usize) -> Vector2d {
        Vector2d::new(self.data[[y, x, 0]] as f64, self.data[[y, x, 1]] as f64)
    }

    pub fn set_motion(&mut self, x: usize, y: usize, motion: Vector2d) {
        self.data[[y, x, 0]] = motion.x as f32;
        self.data[[y, x, 1]] = motion.y as f32;
    }

    /// Magnitude and angle in [0, 2π) of every vector, both `[row, column]`.
    pub fn to_polar(&self) -> (nd::Array2<f32>, nd::Array2<f32>) {
        let (h, w) = (self.height(), self.width());
        let mut magnitude = nd::Array2::zeros((h, w));
        let mut angle = nd::Array2::zeros((h, w));
        for y in 0..h {
            for x in 0..w {
                let dx = self.data[[y, x, 0]];
                let dy = self.data[[y, x, 1]];
                magnitude[[y, x]] = dx.hypot(dy);
                let mut a = dy.atan2(dx);
                if a < 0. {
                    a += std::f32::consts::TAU;
                }
                if a >= std::f32::consts::TAU {
                    a = 0.;
                }
                angle[[y, x]] = a;
            }
        }
        (magnitude, angle)
    }
}

/// Farneback-style parameter set of the dense estimator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowParams {
    pub pyr_scale: f64,
    pub levels: usize,
    pub win_size: usize,
    pub iterations: usize,
    pub poly_n: usize,
    pub poly_sigma: f64,
}

/// Estimates a motion vector for every pixel. The field has the frames' size.
pub trait DenseFlowEstimator {
    fn estimate(
        &mut self,
        prev_gray: &Image,
        curr_gray: &Image,
        params: &FlowParams,
    ) -> Result<DisplacementField>;
}

/// Dense field sampled with pyramidal Lucas-Kanade on a regular grid, each
/// sample filling its grid cell. Pixels without texture get zero motion.
pub struct GridLkFlow {
    stride: usize,
    lk: PyramidalLk,
}

impl GridLkFlow {
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
            lk: PyramidalLk::new(),
        }
    }
}

impl DenseFlowEstimator for GridLkFlow {
    fn estimate(
        &mut self,
        prev_gray: &Image,
        curr_gray: &Image,
        params: &FlowParams,
    ) -> Result<DisplacementField> {
        if (params.pyr_scale - 0.5).abs() > 1e-6 {
            warn!(
                "grid flow builds halving pyramids, pyr_scale {} is treated as 0.5",
                params.pyr_scale
            );
        }
        let lk_params = LkParams {
            win_size: params.win_size | 1,
            max_level: params.levels.saturating_sub(1),
            iters: params.iterations,
            epsilon: 0.03,
            min_eig: 1e-4,
        };
        let levels = usable_levels(prev_gray, lk_params.max_level);
        let pyramid0 = Pyramid::new(prev_gray, levels)?;
        let pyramid1 = Pyramid::new(curr_gray, levels)?;

        let (w, h) = prev_gray.shape();
        let mut field = DisplacementField::zeros(w, h);
        let half = self.stride / 2;
        for cy in (0..h).step_by(self.stride) {
            for cx in (0..w).step_by(self.stride) {
                let sx = (cx + half).min(w - 1);
                let sy = (cy + half).min(h - 1);
                let point0 = Vector2d::new(sx as f64, sy as f64);
                let motion = self
                    .lk
                    .track_point(&pyramid0, &pyramid1, point0, Vector2d::zeros(), &lk_params)
                    .map_or_else(Vector2d::zeros, |point1| point1 - point0);
                for y in cy..(cy + self.stride).min(h) {
                    for x in cx..(cx + self.stride).min(w) {
                        field.set_motion(x, y, motion);
                    }
                }
            }
        }
        Ok(field)
    }
}
