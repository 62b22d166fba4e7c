use ndarray as nd;

use crate::error::{ensure_same_shape, SessionError};
use crate::image::ColorImage;

/// Per-pixel saturating sum of the flow visualization and the track canvas.
/// Bright canvas pixels wash out the colour below them; there is no alpha.
pub fn composite(dense: &ColorImage, overlay: &ColorImage) -> Result<ColorImage, SessionError> {
    ensure_same_shape("composite", dense.shape(), overlay.shape())?;
    let data = nd::Zip::from(&dense.data)
        .and(&overlay.data)
        .map_collect(|&a, &b| a.saturating_add(b));
    Ok(ColorImage { data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_overlay_is_identity() {
        let mut dense = ColorImage::zeros(6, 4);
        for y in 0..4 {
            for x in 0..6 {
                dense.set_pixel(x, y, [(x * 40) as u8, (y * 60) as u8, 7]);
            }
        }
        let out = composite(&dense, &ColorImage::zeros(6, 4)).unwrap();
        assert_eq!(out, dense);
    }

    #[test]
    fn test_saturating_add() {
        let mut dense = ColorImage::zeros(2, 1);
        dense.set_pixel(0, 0, [200, 10, 0]);
        dense.set_pixel(1, 0, [1, 2, 3]);
        let mut overlay = ColorImage::zeros(2, 1);
        overlay.set_pixel(0, 0, [100, 255, 0]);
        overlay.set_pixel(1, 0, [0, 255, 0]);
        let out = composite(&dense, &overlay).unwrap();
        assert_eq!(out.pixel(0, 0), [255, 255, 0]);
        assert_eq!(out.pixel(1, 0), [1, 255, 3]);
    }

    #[test]
    fn test_shape_mismatch() {
        let err = composite(&ColorImage::zeros(4, 4), &ColorImage::zeros(4, 5)).unwrap_err();
        assert!(matches!(err, SessionError::DimensionMismatch { .. }));
    }
}
