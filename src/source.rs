use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context as AnyhowContext, Result};
use log::{info, warn};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::frame::Frame;
use crate::image::ColorImage;

/// Supplies frames in stream order, pulled synchronously by the session.
pub trait FrameSource {
    /// The next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Number of frames still to come, if known.
    fn remaining(&self) -> Option<u64> {
        None
    }

    /// Give back the underlying device or files. Called once at session end.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Frames held in memory.
#[derive(Debug, Default)]
pub struct FrameList {
    images: VecDeque<ColorImage>,
    next_index: u64,
}

impl FrameList {
    pub fn new(images: Vec<ColorImage>) -> Self {
        Self {
            images: images.into(),
            next_index: 0,
        }
    }
}

impl FrameSource for FrameList {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(image) = self.images.pop_front() else {
            return Ok(None);
        };
        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn remaining(&self) -> Option<u64> {
        Some(self.images.len() as u64)
    }
}

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "pgm", "ppm", "pnm"];

/// Image files of a directory, in file name order.
pub struct ImageSequence {
    paths: VecDeque<PathBuf>,
    next_index: u64,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut paths = vec![];
        for entry in std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                paths.push(path);
            }
        }
        paths.sort();
        if paths.is_empty() {
            warn!("no images found in {}", dir.display());
        }
        info!("Found {} images in {}", paths.len(), dir.display());
        Ok(Self {
            paths: paths.into(),
            next_index: 0,
        })
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let rgb = image::open(&path)
            .with_context(|| format!("decode {}", path.display()))?
            .to_rgb8();
        let (width, height) = (rgb.width() as usize, rgb.height() as usize);
        let color = ColorImage::from_raw_rgb(width, height, rgb.into_raw())?;
        let frame = Frame::new(self.next_index, color);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn remaining(&self) -> Option<u64> {
        Some(self.paths.len() as u64)
    }
}

const TEXTURE_BLOCK: usize = 8;

/// Seeded synthetic scene: a block texture panning across the frame with a
/// bright square moving over it.
pub struct SyntheticSource {
    width: usize,
    height: usize,
    frame_count: u64,
    next_index: u64,
    texture: Vec<u8>,
    texture_cols: usize,
    texture_rows: usize,
    pan: (i64, i64),
    square_velocity: (i64, i64),
    square_size: usize,
}

impl SyntheticSource {
    pub fn new(width: usize, height: usize, frame_count: u64, seed: u64) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let texture_cols = width / TEXTURE_BLOCK + 1;
        let texture_rows = height / TEXTURE_BLOCK + 1;
        let texture = (0..texture_cols * texture_rows)
            .map(|_| rng.gen_range(30..170))
            .collect();
        Self {
            width,
            height,
            frame_count,
            next_index: 0,
            texture,
            texture_cols,
            texture_rows,
            pan: (1, 0),
            square_velocity: (3, 2),
            square_size: (width.min(height) / 6).max(4).min(width.min(height)),
        }
    }

    pub fn with_motion(mut self, pan: (i64, i64), square_velocity: (i64, i64)) -> Self {
        self.pan = pan;
        self.square_velocity = square_velocity;
        self
    }

    fn render(&self, t: i64) -> ColorImage {
        let mut image = ColorImage::zeros(self.width, self.height);
        let period_x = (self.texture_cols * TEXTURE_BLOCK) as i64;
        let period_y = (self.texture_rows * TEXTURE_BLOCK) as i64;
        // the square bounces inside the frame
        let span_x = self.width.saturating_sub(self.square_size) as i64;
        let span_y = self.height.saturating_sub(self.square_size) as i64;
        let sq_x = bounce(span_x / 4 + t * self.square_velocity.0, span_x);
        let sq_y = bounce(span_y / 4 + t * self.square_velocity.1, span_y);
        let size = self.square_size as i64;

        for y in 0..self.height {
            for x in 0..self.width {
                let (xi, yi) = (x as i64, y as i64);
                let inside = xi >= sq_x && xi < sq_x + size && yi >= sq_y && yi < sq_y + size;
                let rgb = if inside {
                    [235, 235, 220]
                } else {
                    let tx = (xi - t * self.pan.0).rem_euclid(period_x) as usize / TEXTURE_BLOCK;
                    let ty = (yi - t * self.pan.1).rem_euclid(period_y) as usize / TEXTURE_BLOCK;
                    let v = self.texture[ty * self.texture_cols + tx];
                    [v, v / 2 + 40, 200 - v]
                };
                image.set_pixel(x, y, rgb);
            }
        }
        image
    }
}

/// Reflect `p` back into [0, span].
fn bounce(p: i64, span: i64) -> i64 {
    if span <= 0 {
        return 0;
    }
    let m = p.rem_euclid(2 * span);
    if m > span {
        2 * span - m
    } else {
        m
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next_index >= self.frame_count {
            return Ok(None);
        }
        let image = self.render(self.next_index as i64);
        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn remaining(&self) -> Option<u64> {
        Some(self.frame_count - self.next_index)
    }
}

/// Inputs [`open_source`] can open: `synthetic` or a directory of images.
pub fn is_native_input(input: &str) -> bool {
    input == "synthetic" || Path::new(input).is_dir()
}

/// Open the native source named by `input`.
pub fn open_source(input: &str, seed: u64, frame_count: u64) -> Result<Box<dyn FrameSource>> {
    if !is_native_input(input) {
        bail!("unsupported input {input}, expected `synthetic` or an image directory");
    }
    if input == "synthetic" {
        return Ok(Box::new(SyntheticSource::new(640, 480, frame_count, seed)));
    }
    Ok(Box::new(ImageSequence::open(Path::new(input))?))
}
