use anyhow::Result;
use ::image::Rgb;
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use ndarray as nd;
use tracing::debug;

use crate::image::ColorImage;
use crate::my_types::*;
use crate::tracker::TrackedPair;

pub const TRACK_COLOR: [u8; 3] = [0, 255, 0];
pub const MARKER_COLOR: [u8; 3] = [255, 0, 0];

/// Motion trail history of the session. Starts black and is only ever
/// painted on; paint takes the per-channel maximum so no channel decreases.
#[derive(Clone, Debug)]
pub struct OverlayCanvas {
    image: ColorImage,
    /// clear every this many frames, 0 never clears
    clear_interval: u64,
    frames_since_clear: u64,
}

impl OverlayCanvas {
    pub fn new(shape: ImageShape, clear_interval: u64) -> Self {
        Self {
            image: ColorImage::zeros(shape.0, shape.1),
            clear_interval,
            frames_since_clear: 0,
        }
    }

    pub fn image(&self) -> &ColorImage {
        &self.image
    }

    pub fn shape(&self) -> ImageShape {
        self.image.shape()
    }

    /// Count one frame and wipe the canvas when the clear interval is reached.
    /// Returns true if it was wiped.
    pub fn tick(&mut self) -> bool {
        if self.clear_interval == 0 {
            return false;
        }
        self.frames_since_clear += 1;
        if self.frames_since_clear < self.clear_interval {
            return false;
        }
        self.frames_since_clear = 0;
        self.image.data.fill(0);
        debug!("overlay canvas cleared");
        true
    }

    /// Draw pixel-coordinate segments `thickness` pixels wide. Parts outside
    /// the canvas are dropped.
    pub fn draw_lines(
        &mut self,
        lines: &[((i64, i64), (i64, i64))],
        rgb: [u8; 3],
        thickness: usize,
    ) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let t = thickness.max(1) as i64;
        let lo = -(t / 2);
        let hi = lo + t;

        let mut scratch = self.image.to_rgb_image()?;
        for &(a, b) in lines {
            // thickness as parallel one pixel segments
            for oy in lo..hi {
                for ox in lo..hi {
                    draw_line_segment_mut(
                        &mut scratch,
                        ((a.0 + ox) as f32, (a.1 + oy) as f32),
                        ((b.0 + ox) as f32, (b.1 + oy) as f32),
                        Rgb(rgb),
                    );
                }
            }
        }
        let drawn = ColorImage::from_rgb_image(scratch)?;
        nd::Zip::from(&mut self.image.data)
            .and(&drawn.data)
            .for_each(|old, &new| *old = (*old).max(new));
        Ok(())
    }
}

/// Filled discs on an arbitrary colour image, overwriting what is there.
pub fn fill_circles(
    image: &mut ColorImage,
    centers: &[(i64, i64)],
    radius: usize,
    rgb: [u8; 3],
) -> Result<()> {
    if centers.is_empty() {
        return Ok(());
    }
    let mut scratch = image.to_rgb_image()?;
    for &(x, y) in centers {
        draw_filled_circle_mut(&mut scratch, (x as i32, y as i32), radius as i32, Rgb(rgb));
    }
    *image = ColorImage::from_rgb_image(scratch)?;
    Ok(())
}

/// Pixel a sub-pixel coordinate is drawn at.
pub fn to_pixel(p: Vector2d) -> (i64, i64) {
    (p.x as i64, p.y as i64)
}

/// Draws the surviving track segments into the persistent canvas and marks
/// the tracks' new positions on the current frame.
#[derive(Clone, Copy, Debug)]
pub struct TrackOverlay {
    pub thickness: usize,
    pub marker_radius: usize,
}

impl TrackOverlay {
    pub fn draw(
        &self,
        canvas: &mut OverlayCanvas,
        frame: &mut ColorImage,
        pairs: &[TrackedPair],
    ) -> Result<()> {
        let lines: Vec<_> = pairs
            .iter()
            .map(|pair| (to_pixel(pair.old.point), to_pixel(pair.new.point)))
            .collect();
        canvas.draw_lines(&lines, TRACK_COLOR, self.thickness)?;
        let markers: Vec<_> = lines.iter().map(|&(_, new)| new).collect();
        fill_circles(frame, &markers, self.marker_radius, MARKER_COLOR)
    }
}
