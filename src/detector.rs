use std::cmp::Ordering;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::image::Image;
use crate::my_types::*;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorParams {
    /// upper bound on returned points
    pub max_count: usize,
    /// fraction of the strongest corner response a point must reach
    pub quality_level: f64,
    /// minimum euclidean distance between returned points
    pub min_distance: f64,
    /// side of the window the structure tensor is summed over
    pub block_size: usize,
}

/// Finds interest points worth tracking. May return fewer than `max_count` points.
pub trait FeatureDetector {
    fn detect(&mut self, gray: &Image, params: &DetectorParams) -> Result<Vec<Vector2d>>;
}

/// Good-features-to-track detector scoring pixels by the smaller eigenvalue
/// of the local structure tensor (Shi-Tomasi).
#[derive(Debug, Default)]
pub struct MinEigenDetector {
    response: Vec<f64>,
}

impl MinEigenDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn compute_response(&mut self, gray: &Image, block_size: usize) {
        let (w, h) = gray.shape();
        let mut gxx = vec![0.; w * h];
        let mut gyy = vec![0.; w * h];
        let mut gxy = vec![0.; w * h];
        let v = |x: usize, y: usize, dx: i64, dy: i64| {
            gray.value_clamped(x as i64 + dx, y as i64 + dy) as f64
        };
        for y in 0..h {
            for x in 0..w {
                // 3x3 sobel
                let ix = (v(x, y, 1, -1) + 2. * v(x, y, 1, 0) + v(x, y, 1, 1))
                    - (v(x, y, -1, -1) + 2. * v(x, y, -1, 0) + v(x, y, -1, 1));
                let iy = (v(x, y, -1, 1) + 2. * v(x, y, 0, 1) + v(x, y, 1, 1))
                    - (v(x, y, -1, -1) + 2. * v(x, y, 0, -1) + v(x, y, 1, -1));
                let i = y * w + x;
                gxx[i] = ix * ix;
                gyy[i] = iy * iy;
                gxy[i] = ix * iy;
            }
        }

        let sxx = integral(&gxx, w, h);
        let syy = integral(&gyy, w, h);
        let sxy = integral(&gxy, w, h);
        let r = block_size / 2;

        self.response.clear();
        self.response.resize(w * h, 0.);
        for y in 0..h {
            let y0 = y.saturating_sub(r);
            let y1 = (y + r + 1).min(h);
            for x in 0..w {
                let x0 = x.saturating_sub(r);
                let x1 = (x + r + 1).min(w);
                let a = box_sum(&sxx, w, x0, y0, x1, y1);
                let c = box_sum(&syy, w, x0, y0, x1, y1);
                let b = box_sum(&sxy, w, x0, y0, x1, y1);
                let half_trace = 0.5 * (a + c);
                let root = (0.25 * (a - c) * (a - c) + b * b).sqrt();
                self.response[y * w + x] = (half_trace - root).max(0.);
            }
        }
    }
}

impl FeatureDetector for MinEigenDetector {
    fn detect(&mut self, gray: &Image, params: &DetectorParams) -> Result<Vec<Vector2d>> {
        let (w, h) = gray.shape();
        if w == 0 || h == 0 || params.max_count == 0 {
            return Ok(vec![]);
        }
        self.compute_response(gray, params.block_size);

        let max_response = self.response.iter().cloned().fold(0., f64::max);
        if max_response <= 0. {
            return Ok(vec![]);
        }
        let threshold = params.quality_level * max_response;

        // keep local maxima of the 3x3 neighbourhood above the quality threshold
        let mut candidates = vec![];
        for y in 0..h {
            for x in 0..w {
                let value = self.response[y * w + x];
                if value < threshold || value <= 0. {
                    continue;
                }
                let mut is_max = true;
                'outer: for ny in y.saturating_sub(1)..(y + 2).min(h) {
                    for nx in x.saturating_sub(1)..(x + 2).min(w) {
                        if self.response[ny * w + nx] > value {
                            is_max = false;
                            break 'outer;
                        }
                    }
                }
                if is_max {
                    candidates.push((value, x, y));
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then((a.2, a.1).cmp(&(b.2, b.1)))
        });

        let min_distance2 = params.min_distance.powi(2);
        let mut points: Vec<Vector2d> = vec![];
        for (_, x, y) in candidates {
            let p = Vector2d::new(x as f64, y as f64);
            if points.iter().any(|q| (q - p).norm_squared() < min_distance2) {
                continue;
            }
            points.push(p);
            if points.len() == params.max_count {
                break;
            }
        }
        Ok(points)
    }
}

/// Summed-area table with one row and column of zero padding.
fn integral(values: &[f64], w: usize, h: usize) -> Vec<f64> {
    let mut table = vec![0.; (w + 1) * (h + 1)];
    for y in 0..h {
        let mut row = 0.;
        for x in 0..w {
            row += values[y * w + x];
            table[(y + 1) * (w + 1) + x + 1] = table[y * (w + 1) + x + 1] + row;
        }
    }
    table
}

fn box_sum(table: &[f64], w: usize, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
    let stride = w + 1;
    table[y1 * stride + x1] - table[y0 * stride + x1] - table[y1 * stride + x0]
        + table[y0 * stride + x0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DetectorParams {
        DetectorParams {
            max_count: 100,
            quality_level: 0.3,
            min_distance: 7.,
            block_size: 7,
        }
    }

    fn square_image() -> Image {
        let mut image = Image::filled(64, 64, 0);
        image.set_sub_image_i32(20, 20, &Image::filled(20, 20, 255));
        image
    }

    #[test]
    fn test_square_corners() {
        let points = MinEigenDetector::new()
            .detect(&square_image(), &params())
            .unwrap();
        assert_eq!(points.len(), 4);
        let corners = [
            Vector2d::new(20., 20.),
            Vector2d::new(39., 20.),
            Vector2d::new(20., 39.),
            Vector2d::new(39., 39.),
        ];
        for corner in corners {
            assert!(
                points.iter().any(|p| (p - corner).norm() < 5.),
                "no detection near {corner:?}: {points:?}"
            );
        }
    }

    #[test]
    fn test_flat_image_has_no_corners() {
        let points = MinEigenDetector::new()
            .detect(&Image::filled(32, 32, 90), &params())
            .unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn test_max_count_and_separation() {
        // checkerboard of 8 pixel cells has many equally strong corners
        let mut image = Image::filled(64, 64, 0);
        for y in 0..64 {
            for x in 0..64 {
                if (x / 8 + y / 8) % 2 == 0 {
                    image.set_value(x, y, 255);
                }
            }
        }
        let mut p = params();
        p.max_count = 5;
        let points = MinEigenDetector::new().detect(&image, &p).unwrap();
        assert_eq!(points.len(), 5);
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                assert!((a - b).norm() >= p.min_distance);
            }
        }
    }

    #[test]
    fn test_integral_box_sum() {
        let values = vec![1., 2., 3., 4., 5., 6.];
        let table = integral(&values, 3, 2);
        assert_eq!(box_sum(&table, 3, 0, 0, 3, 2), 21.);
        assert_eq!(box_sum(&table, 3, 1, 0, 3, 2), 16.);
        assert_eq!(box_sum(&table, 3, 1, 1, 2, 2), 5.);
    }
}
