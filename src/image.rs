use anyhow::{anyhow, bail, Result};
use ndarray as nd;

use crate::my_types::*;

/// Row-major grayscale image storage
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Image {
    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
        }
    }

    /// Create an image filled with a single value
    pub fn filled(width: usize, height: usize, value: u8) -> Image {
        Image {
            data: vec![value; width * height],
            width,
            height,
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<u8>) -> Result<Image> {
        if data.len() != width * height {
            bail!(
                "grayscale buffer of {} bytes does not match {width} x {height}",
                data.len()
            );
        }
        Ok(Image {
            data,
            width,
            height,
        })
    }

    pub fn shape(&self) -> ImageShape {
        (self.width, self.height)
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline(always)]
    pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    /// Pixel value with coordinates clamped to the image border
    #[inline(always)]
    pub fn value_clamped(&self, x: i64, y: i64) -> u8 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.value(x, y)
    }

    /// Copy `patch` so that its top-left corner lands on (x, y). Pixels outside are dropped.
    pub fn set_sub_image_i32(&mut self, x: i32, y: i32, patch: &Image) {
        for py in 0..patch.height as i32 {
            for px in 0..patch.width as i32 {
                let (tx, ty) = (x + px, y + py);
                if tx < 0 || ty < 0 || tx >= self.width as i32 || ty >= self.height as i32 {
                    continue;
                }
                self.set_value(tx as usize, ty as usize, patch.value(px as usize, py as usize));
            }
        }
    }
}

/// Sample `image` at a sub-pixel position, clamping at the borders.
pub fn bilinear(image: &Image, p: Vector2d) -> f64 {
    let x0 = p.x.floor();
    let y0 = p.y.floor();
    let ax = p.x - x0;
    let ay = p.y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);
    let v = |x: i64, y: i64| image.value_clamped(x, y) as f64;
    (1. - ay) * ((1. - ax) * v(x0, y0) + ax * v(x0 + 1, y0))
        + ay * ((1. - ax) * v(x0, y0 + 1) + ax * v(x0 + 1, y0 + 1))
}

/// Interleaved 8-bit RGB image, indexed as `[row, column, channel]`
#[derive(Clone, Debug, PartialEq)]
pub struct ColorImage {
    pub data: nd::Array3<u8>,
}

impl ColorImage {
    pub fn zeros(width: usize, height: usize) -> ColorImage {
        ColorImage {
            data: nd::Array3::zeros((height, width, 3)),
        }
    }

    pub fn from_raw_rgb(width: usize, height: usize, raw: Vec<u8>) -> Result<ColorImage> {
        let data = nd::Array3::from_shape_vec((height, width, 3), raw)?;
        Ok(ColorImage { data })
    }

    /// Copy into an `image` crate buffer, e.g. for drawing.
    pub fn to_rgb_image(&self) -> Result<::image::RgbImage> {
        let (width, height) = self.shape();
        ::image::RgbImage::from_raw(width as u32, height as u32, self.data.iter().copied().collect())
            .ok_or_else(|| anyhow!("{width} x {height} buffer does not fit an RGB image"))
    }

    pub fn from_rgb_image(rgb: ::image::RgbImage) -> Result<ColorImage> {
        let (width, height) = (rgb.width() as usize, rgb.height() as usize);
        ColorImage::from_raw_rgb(width, height, rgb.into_raw())
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

    #[inline(always)]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        [
            self.data[[y, x, 0]],
            self.data[[y, x, 1]],
            self.data[[y, x, 2]],
        ]
    }

    #[inline(always)]
    pub fn set_pixel(&mut self, x: usize, y: usize, rgb: [u8; 3]) {
        for (c, value) in rgb.into_iter().enumerate() {
            self.data[[y, x, c]] = value;
        }
    }

    /// Luma conversion with BT.601 weights.
    pub fn to_gray(&self) -> Image {
        let (width, height) = self.shape();
        let mut data = Vec::with_capacity(width * height);
        for row in self.data.outer_iter() {
            for px in row.outer_iter() {
                let luma = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
                data.push(luma.round().min(255.) as u8);
            }
        }
        Image {
            data,
            width,
            height,
        }
    }

    /// Replicate a grayscale image over the three channels.
    pub fn from_gray(gray: &Image) -> ColorImage {
        let mut out = ColorImage::zeros(gray.width, gray.height);
        for y in 0..gray.height {
            for x in 0..gray.width {
                let v = gray.value(x, y);
                out.set_pixel(x, y, [v, v, v]);
            }
        }
        out
    }
}
