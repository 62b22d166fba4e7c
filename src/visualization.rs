use ndarray as nd;

use crate::dense_flow::DisplacementField;
use crate::image::ColorImage;

/// Upper bound (exclusive) of the 8-bit half-range hue.
pub const HUE_RANGE: u8 = 180;

/// Encode `field` as HSV with 8-bit channels: hue is the direction on the
/// half-range scale (truncated), saturation is full, value is the magnitude min-max
/// normalized over this field alone.
///
/// Because of the per-field normalization the same physical motion renders
/// with different brightness in frames with different extremes. A constant
/// field has no range and renders with zero value.
pub fn flow_to_hsv(field: &DisplacementField) -> nd::Array3<u8> {
    let (magnitude, angle) = field.to_polar();
    let (min, max) = magnitude
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &m| {
            (lo.min(m), hi.max(m))
        });
    let range = max - min;

    let mut hsv = nd::Array3::zeros((field.height(), field.width(), 3));
    for ((y, x), &a) in angle.indexed_iter() {
        // half-degrees, truncated into the 8-bit hue channel
        let hue = (a / std::f32::consts::PI * 90.) as u32 % HUE_RANGE as u32;
        let value = if range > 0. {
            num_traits::clamp((magnitude[[y, x]] - min) / range * 255., 0., 255.)
        } else {
            0.
        };
        hsv[[y, x, 0]] = hue as u8;
        hsv[[y, x, 1]] = u8::MAX;
        hsv[[y, x, 2]] = value as u8;
    }
    hsv
}

/// Convert one 8-bit HSV triple (hue in [0, 180)) to RGB.
pub fn hsv_to_rgb(h: u8, s: u8, v: u8) -> [u8; 3] {
    let sector_pos = (h as f32 * 2. / 60.) % 6.;
    let s = s as f32 / 255.;
    let v = v as f32;
    let sector = sector_pos.floor();
    let f = sector_pos - sector;
    let p = v * (1. - s);
    let q = v * (1. - s * f);
    let t = v * (1. - s * (1. - f));
    let (r, g, b) = match sector as u32 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    [r.round() as u8, g.round() as u8, b.round() as u8]
}

/// Colour image of a displacement field: hue encodes direction, brightness
/// encodes magnitude.
pub fn visualize(field: &DisplacementField) -> ColorImage {
    let hsv = flow_to_hsv(field);
    let mut out = ColorImage::zeros(field.width(), field.height());
    for y in 0..field.height() {
        for x in 0..field.width() {
            let rgb = hsv_to_rgb(hsv[[y, x, 0]], hsv[[y, x, 1]], hsv[[y, x, 2]]);
            out.set_pixel(x, y, rgb);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::my_types::*;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_hsv_to_rgb() {
        assert_eq!(hsv_to_rgb(0, 255, 255), [255, 0, 0]);
        assert_eq!(hsv_to_rgb(60, 255, 255), [0, 255, 0]);
        assert_eq!(hsv_to_rgb(120, 255, 255), [0, 0, 255]);
        assert_eq!(hsv_to_rgb(30, 255, 255), [255, 255, 0]);
        assert_eq!(hsv_to_rgb(90, 0, 100), [100, 100, 100]);
        assert_eq!(hsv_to_rgb(45, 255, 0), [0, 0, 0]);
    }

    #[test]
    fn test_random_field_ranges() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut field = DisplacementField::zeros(40, 30);
        for y in 0..30 {
            for x in 0..40 {
                let motion = Vector2d::new(rng.gen_range(-20.0..20.0), rng.gen_range(-20.0..20.0));
                field.set_motion(x, y, motion);
            }
        }
        let hsv = flow_to_hsv(&field);
        let hues = hsv.index_axis(nd::Axis(2), 0);
        let values = hsv.index_axis(nd::Axis(2), 2);
        assert!(hues.iter().all(|&h| h < HUE_RANGE));
        assert!(hsv.index_axis(nd::Axis(2), 1).iter().all(|&s| s == 255));
        assert_eq!(values.iter().max(), Some(&255));
        assert_eq!(values.iter().min(), Some(&0));
    }

    #[test]
    fn test_direction_to_hue() {
        let mut field = DisplacementField::zeros(4, 1);
        field.set_motion(0, 0, Vector2d::new(5., 0.));
        field.set_motion(1, 0, Vector2d::new(0., 5.));
        field.set_motion(2, 0, Vector2d::new(-5., 0.));
        field.set_motion(3, 0, Vector2d::new(0., 0.));
        let hsv = flow_to_hsv(&field);
        assert_eq!(hsv[[0, 0, 0]], 0);
        assert_eq!(hsv[[0, 1, 0]], 45);
        assert_eq!(hsv[[0, 2, 0]], 90);
        assert_eq!(hsv[[0, 0, 2]], 255);
        assert_eq!(hsv[[0, 3, 2]], 0);

        // rightward motion at full brightness is pure red
        let image = visualize(&field);
        assert_eq!(image.pixel(0, 0), [255, 0, 0]);
        assert_eq!(image.pixel(3, 0), [0, 0, 0]);
    }

    #[test]
    fn test_hue_truncates() {
        let mut field = DisplacementField::zeros(3, 1);
        for (x, degrees) in [1.9f64, 3.9, 359.9].into_iter().enumerate() {
            let (s, c) = degrees.to_radians().sin_cos();
            field.set_motion(x, 0, Vector2d::new(5. * c, 5. * s));
        }
        let hsv = flow_to_hsv(&field);
        assert_eq!(hsv[[0, 0, 0]], 0);
        assert_eq!(hsv[[0, 1, 0]], 1);
        assert_eq!(hsv[[0, 2, 0]], 179);
    }

    #[test]
    fn test_value_is_frame_relative() {
        let mut small = DisplacementField::zeros(2, 1);
        small.set_motion(1, 0, Vector2d::new(2., 0.));
        let mut large = DisplacementField::zeros(2, 1);
        large.set_motion(0, 0, Vector2d::new(8., 0.));
        large.set_motion(1, 0, Vector2d::new(2., 0.));
        // the same 2 px motion renders at full and at zero brightness
        assert_eq!(flow_to_hsv(&small)[[0, 1, 2]], 255);
        assert_eq!(flow_to_hsv(&large)[[0, 1, 2]], 0);
    }

    #[test]
    fn test_constant_field_is_dark() {
        let field = DisplacementField::uniform(5, 5, Vector2d::new(3., 3.));
        let image = visualize(&field);
        assert!(image.data.iter().all(|&c| c == 0));
    }
}
