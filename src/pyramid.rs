use anyhow::{bail, Result};

use crate::image::Image;

const NAIVE_DOWNSCALE: bool = false;

/// The base image plus successively halved levels.
#[derive(Debug)]
pub struct Pyramid {
    pub image: Image,
    /// downsized images, `levels[0]` is half the base size
    pub levels: Vec<Image>,
}

impl Pyramid {
    pub fn new(image: &Image, level_count: usize) -> Result<Self> {
        let mut pyramid = Self {
            image: image.clone(),
            levels: vec![],
        };
        pyramid.compute_levels(level_count)?;
        Ok(pyramid)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn get_image_at_level(&self, level: usize) -> &Image {
        if level == 0 {
            &self.image
        } else {
            &self.levels[level - 1]
        }
    }

    fn compute_levels(&mut self, level_count: usize) -> Result<()> {
        while self.levels.len() < level_count {
            self.levels.push(Image::empty())
        }
        if level_count == 0 {
            return Ok(());
        }
        downscale(&self.image, &mut self.levels[0])?;
        for i in 0..(level_count - 1) {
            let rest = &mut self.levels[i..];
            if let Some((parent, rest)) = rest.split_first_mut() {
                downscale(parent, &mut rest[0])?;
            }
        }
        Ok(())
    }
}

/// downscale the parent image and store the result in child
fn downscale(parent: &Image, child: &mut Image) -> Result<()> {
    let w = parent.width as i64;
    let h = parent.height as i64;
    if w < 2 || h < 2 {
        bail!("cannot downscale image with shape {w} x {h}");
    }

    let w_half = w / 2;
    let h_half = h / 2;
    child.data.clear();
    child.width = w_half as usize;
    child.height = h_half as usize;

    let v = |x: i64, y: i64| -> u16 { parent.value_clamped(x, y) as u16 };

    for y in 0..h_half {
        let y2 = 2 * y;
        for x in 0..w_half {
            let x2 = 2 * x;
            let value = if NAIVE_DOWNSCALE {
                (v(x2, y2) + v(x2 + 1, y2) + v(x2, y2 + 1) + v(x2 + 1, y2 + 1)) / 4
            } else {
                v(x2, y2) / 4
                    + (v(x2 + 1, y2) + v(x2 - 1, y2) + v(x2, y2 + 1) + v(x2, y2 - 1)) / 8
                    + (v(x2 + 1, y2 + 1)
                        + v(x2 - 1, y2 - 1)
                        + v(x2 - 1, y2 + 1)
                        + v(x2 + 1, y2 - 1))
                        / 16
            };
            child.data.push(value as u8);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_shapes() {
        let image = Image::filled(101, 64, 50);
        let pyramid = Pyramid::new(&image, 3).unwrap();
        assert_eq!(pyramid.level_count(), 3);
        assert_eq!(pyramid.get_image_at_level(0).shape(), (101, 64));
        assert_eq!(pyramid.get_image_at_level(1).shape(), (50, 32));
        assert_eq!(pyramid.get_image_at_level(3).shape(), (12, 8));
    }

    #[test]
    fn test_flat_image_stays_flat() {
        let image = Image::filled(16, 16, 80);
        let pyramid = Pyramid::new(&image, 2).unwrap();
        // the integer kernel loses a little brightness but stays uniform
        let level = pyramid.get_image_at_level(2);
        let first = level.data[0];
        assert!(level.data.iter().all(|&v| v == first));
        assert!(first >= 70 && first <= 80);
    }

    #[test]
    fn test_too_small() {
        let image = Image::filled(2, 2, 0);
        assert!(Pyramid::new(&image, 2).is_err());
    }
}
