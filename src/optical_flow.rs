use anyhow::Result;
use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::image::*;
use crate::my_types::*;
use crate::pyramid::Pyramid;

type Range = [[i16; 2]; 2];

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LkParams {
    /// side of the square integration window, odd
    pub win_size: usize,
    /// number of pyramid levels above the base image
    pub max_level: usize,
    /// iterations per level
    pub iters: usize,
    /// stop iterating once the update is shorter than this, in pixels
    pub epsilon: f64,
    /// minimum eigenvalue of the spatial gradient matrix
    pub min_eig: f64,
}

/// Per-point result of the pyramidal estimator. `status[i]` is false when
/// point `i` could not be located in the current frame; `points[i]` is
/// meaningless then.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointEstimate {
    pub points: Vec<Vector2d>,
    pub status: Vec<bool>,
}

/// Sparse pyramidal motion estimation between two grayscale frames.
pub trait PointEstimator {
    fn estimate(
        &mut self,
        prev_gray: &Image,
        curr_gray: &Image,
        points: &[Vector2d],
        params: &LkParams,
    ) -> Result<PointEstimate>;
}

/// Pyramidal Lucas-Kanade.
/// ref http://robots.stanford.edu/cs223b04/algo_tracking.pdf
pub struct PyramidalLk {
    ix: Matrixd,
    iy: Matrixd,
    it: Matrixd,
    grid: Matrixd,
}

impl Default for PyramidalLk {
    fn default() -> Self {
        Self::new()
    }
}

impl PyramidalLk {
    pub fn new() -> PyramidalLk {
        PyramidalLk {
            ix: na::DMatrix::zeros(0, 0),
            iy: na::DMatrix::zeros(0, 0),
            it: na::DMatrix::zeros(0, 0),
            grid: na::DMatrix::zeros(0, 0),
        }
    }

    /// Track one point from pyramid0 to pyramid1, starting from `guess`
    /// (displacement at full resolution).
    pub fn track_point(
        &mut self,
        pyramid0: &Pyramid,
        pyramid1: &Pyramid,
        point0: Vector2d,
        guess: Vector2d,
        params: &LkParams,
    ) -> Option<Vector2d> {
        let levels = pyramid0.level_count().min(pyramid1.level_count());
        let lk_term2 = params.epsilon.powi(2);
        let r = (params.win_size - 1) / 2;

        let mut g = guess / u32::pow(2, levels as u32) as f64;
        let mut d = Vector2d::zeros();
        for level in (0..levels + 1).rev() {
            let level0 = pyramid0.get_image_at_level(level);
            let level1 = pyramid1.get_image_at_level(level);
            let u = point0 / u32::pow(2, level as u32) as f64;
            let range = integration_range(level0, u, r, 1)?;
            // compute the derivative
            scharr(level0, u, range, &mut self.ix, &mut self.iy, &mut self.grid);
            let gradient = spatial_gradient(&self.ix, &self.iy);
            if gradient.symmetric_eigenvalues().min() < params.min_eig {
                return None;
            }
            let mut nu = Vector2d::zeros();
            for _ in 0..params.iters {
                image_difference(range, r, &self.grid, &mut self.it, level1, u + g + nu)?;
                let eta = flow_vector(&gradient, &self.ix, &self.iy, &self.it)?;
                nu += eta;
                if eta.norm_squared() < lk_term2 {
                    break;
                }
            }

            d = nu;
            if level > 0 {
                g = 2. * (g + d)
            }
        }

        let point1 = point0 + g + d;
        let (w, h) = pyramid1.image.shape();
        if point1.x < 0. || point1.y < 0. || point1.x > (w - 1) as f64 || point1.y > (h - 1) as f64
        {
            return None;
        }
        Some(point1)
    }
}

impl PointEstimator for PyramidalLk {
    fn estimate(
        &mut self,
        prev_gray: &Image,
        curr_gray: &Image,
        points: &[Vector2d],
        params: &LkParams,
    ) -> Result<PointEstimate> {
        let pyramid0 = Pyramid::new(prev_gray, usable_levels(prev_gray, params.max_level))?;
        let pyramid1 = Pyramid::new(curr_gray, pyramid0.level_count())?;

        let mut estimate = PointEstimate::default();
        for &point0 in points {
            match self.track_point(&pyramid0, &pyramid1, point0, Vector2d::zeros(), params) {
                Some(point1) => {
                    estimate.points.push(point1);
                    estimate.status.push(true);
                }
                None => {
                    estimate.points.push(point0);
                    estimate.status.push(false);
                }
            }
        }
        Ok(estimate)
    }
}

/// Cap the pyramid depth so the coarsest level keeps a few pixels on each side.
pub fn usable_levels(image: &Image, max_level: usize) -> usize {
    let mut levels = 0;
    let (mut w, mut h) = image.shape();
    while levels < max_level && w >= 16 && h >= 16 {
        w /= 2;
        h /= 2;
        levels += 1;
    }
    levels
}

fn flow_vector(gradient: &Matrix2d, ix: &Matrixd, iy: &Matrixd, it: &Matrixd) -> Option<Vector2d> {
    let mut b = Vector2d::zeros();

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            b[0] += it[(y, x)] * ix[(y, x)];
            b[1] += it[(y, x)] * iy[(y, x)];
        }
    }

    gradient.try_inverse().map(|inv_g| inv_g * b)
}

fn image_difference(
    prev_range: Range,
    r: usize,
    i0: &Matrixd,
    it: &mut Matrixd,
    level: &Image,
    center: Vector2d,
) -> Option<()> {
    let range = integration_range(level, center, r, 0)?;
    if range != prev_range {
        return None;
    }
    fill_grid(level, range, center, it);
    *it *= -1.;
    *it += i0.view((1, 1), (it.nrows(), it.ncols()));
    Some(())
}

fn spatial_gradient(ix: &Matrixd, iy: &Matrixd) -> Matrix2d {
    let mut x2 = 0.;
    let mut y2 = 0.;
    let mut xy = 0.;

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            x2 += ix[(y, x)] * ix[(y, x)];
            y2 += iy[(y, x)] * iy[(y, x)];
            xy += ix[(y, x)] * iy[(y, x)];
        }
    }

    Matrix2d::new(x2, xy, xy, y2)
}

/// ref https://theailearner.com/tag/scharr-operator/
fn scharr(
    level: &Image,
    center: Vector2d,
    range: Range,
    out_x: &mut Matrixd,
    out_y: &mut Matrixd,
    grid: &mut Matrixd,
) {
    let grange = [
        [range[0][0] - 1, range[0][1] + 1],
        [range[1][0] - 1, range[1][1] + 1],
    ];
    fill_grid(level, grange, center, grid);

    *out_x = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    *out_y = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    for y in 1..(grid.nrows() - 1) {
        for x in 1..(grid.ncols() - 1) {
            out_x[(y - 1, x - 1)] =
                (10. * grid[(y, x + 1)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y - 1, x + 1)]
                    - 10. * grid[(y, x - 1)]
                    - 3. * grid[(y + 1, x - 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
            out_y[(y - 1, x - 1)] =
                (10. * grid[(y + 1, x)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y + 1, x - 1)]
                    - 10. * grid[(y - 1, x)]
                    - 3. * grid[(y - 1, x + 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
        }
    }
}

fn fill_grid(level: &Image, range: Range, center: Vector2d, grid: &mut Matrixd) {
    *grid = na::DMatrix::zeros(
        (range[1][1] - range[1][0] + 1) as usize,
        (range[0][1] - range[0][0] + 1) as usize,
    );

    for (y_ind, y) in (range[1][0]..=range[1][1]).enumerate() {
        for (x_ind, x) in (range[0][0]..=range[0][1]).enumerate() {
            grid[(y_ind, x_ind)] = bilinear(level, center + Vector2d::new(x as f64, y as f64));
        }
    }
}

/// Returns closed range of integer steps that can be taken without going outside
/// the image borders. Returns None if the center point is outside the level
/// boundaries.
fn integration_range(level: &Image, center: Vector2d, r: usize, padding: i16) -> Option<Range> {
    let r = r as i16;
    let mut range = [[0, 0], [0, 0]];
    for i in 0..2 {
        let s = if i == 0 { level.width } else { level.height };
        if center[i] < 0. || center[i] > (s - 1) as f64 {
            return None;
        }
        let n = center[i] as i16;
        let fract = if center[i].fract() > 0. { 1 } else { 0 };
        range[i] = [
            i16::max(-r, -n + padding),
            i16::min(r, s as i16 - n - padding - 1 - fract),
        ];
        if range[i][0] > range[i][1] {
            return None;
        }
    }
    Some(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> LkParams {
        LkParams {
            win_size: 15,
            max_level: 2,
            iters: 10,
            epsilon: 0.03,
            min_eig: 1e-4,
        }
    }

    fn square_scene(x: i32, y: i32) -> Image {
        let mut image = Image::filled(128, 96, 20);
        image.set_sub_image_i32(x, y, &Image::filled(20, 20, 220));
        image
    }

    #[test]
    fn test_flow() {
        let image_size: i32 = 128;
        let mut image0 = Image::filled(image_size as usize, image_size as usize, 0);
        let mut image1 = image0.clone();

        let patch = Image {
            data: vec![
                44, 44, 44, 44, 44, 44, 44, 44, 44, 44, 55, 55, 55, 55, 55, 55, 55, 44, 44, 55, 77,
                77, 77, 77, 77, 55, 44, 44, 55, 77, 88, 88, 88, 77, 55, 44, 44, 55, 77, 88, 99, 88,
                77, 55, 44, 44, 55, 77, 88, 88, 88, 77, 55, 44, 44, 55, 77, 77, 77, 77, 77, 55, 44,
                44, 55, 55, 55, 55, 55, 55, 55, 44, 44, 44, 44, 44, 44, 44, 44, 44, 44,
            ],
            width: 9,
            height: 9,
        };

        let (x, y) = (60, 60);
        let (dx, dy) = (-3, 2);
        image0.set_sub_image_i32(x, y, &patch);
        image1.set_sub_image_i32(x + dx, y + dy, &patch);

        let r = (patch.width - 1) as i32 / 2;
        let point0 = Vector2d::new((x + r) as f64, (y + r) as f64);
        let estimate = PyramidalLk::new()
            .estimate(&image0, &image1, &[point0], &params())
            .unwrap();
        assert_eq!(estimate.status, vec![true]);
        let err = (estimate.points[0] - point0) - Vector2d::new(dx as f64, dy as f64);
        assert!(err.norm() < 0.5, "optical flow err {}", err.norm());
    }

    #[test]
    fn test_square_translation() {
        let image0 = square_scene(40, 30);
        let image1 = square_scene(45, 30);
        // just inside the top-left corner of the square
        let point0 = Vector2d::new(42., 32.);
        let estimate = PyramidalLk::new()
            .estimate(&image0, &image1, &[point0], &params())
            .unwrap();
        assert_eq!(estimate.status, vec![true]);
        let motion = estimate.points[0] - point0;
        assert!((motion.x - 5.).abs() < 0.5, "motion {motion:?}");
        assert!(motion.y.abs() < 0.5, "motion {motion:?}");
    }

    #[test]
    fn test_textureless_point_is_lost() {
        let image0 = square_scene(40, 30);
        let image1 = square_scene(45, 30);
        // uniform background far from the square
        let points = [Vector2d::new(100., 80.), Vector2d::new(42., 32.)];
        let estimate = PyramidalLk::new()
            .estimate(&image0, &image1, &points, &params())
            .unwrap();
        assert_eq!(estimate.status, vec![false, true]);
        assert_eq!(estimate.points.len(), 2);
    }

    #[test]
    fn test_point_outside_is_lost() {
        let image = square_scene(40, 30);
        let estimate = PyramidalLk::new()
            .estimate(&image, &image, &[Vector2d::new(-4., 10.)], &params())
            .unwrap();
        assert_eq!(estimate.status, vec![false]);
    }

    #[test]
    fn test_scharr() {
        let mut image = Image {
            data: vec![0; 25],
            width: 5,
            height: 5,
        };

        let mut out_x = na::dmatrix!();
        let mut out_y = na::dmatrix!();
        let mut grid = na::dmatrix!();

        let center = Vector2d::new(2.0, 2.0);
        let range = integration_range(&image, center, 1, 1).unwrap();
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::zeros(3, 3));
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));

        image.data = vec![
            0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4,
        ];
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::repeat(3, 3, 1.));
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));

        image.data = vec![
            0, 1, 2, 3, 4, 1, 2, 3, 4, 5, 2, 3, 4, 5, 6, 3, 4, 5, 6, 7, 4, 5, 6, 7, 8,
        ];
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::repeat(3, 3, 1.));
        assert_eq!(out_y, na::DMatrix::repeat(3, 3, 1.));
    }

    #[test]
    fn test_integration_range() {
        // Coordinate (0, 0) is the center of the top-left pixel, so (9, 9) is
        // the center of the bottom-right pixel of a 10x10 image.
        let image = Image::filled(10, 10, 0);
        assert_eq!(integration_range(&image, Vector2d::new(4.5, 4.5), 3, 0).unwrap(), [[-3, 3], [-3, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(1.5, 2.5), 3, 0).unwrap(), [[-1, 3], [-2, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(0.9, 1.9), 3, 1).unwrap(), [[1, 3], [0, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(8.5, 2.0), 3, 0).unwrap(), [[-3, 0], [-2, 3]]);
        assert_eq!(integration_range(&image, Vector2d::new(9.5, 2.0), 3, 0), None);
    }

    #[test]
    fn test_usable_levels() {
        assert_eq!(usable_levels(&Image::filled(640, 480, 0), 2), 2);
        assert_eq!(usable_levels(&Image::filled(20, 20, 0), 3), 1);
        assert_eq!(usable_levels(&Image::filled(8, 8, 0), 3), 0);
    }
}
