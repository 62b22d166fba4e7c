use crate::image::{ColorImage, Image};
use crate::my_types::*;

/// One captured frame. Built once by the source and never mutated afterwards.
#[derive(Clone, Debug)]
pub struct Frame {
    /// position in the stream, starting at 0
    pub index: u64,
    pub color: ColorImage,
    pub gray: Image,
}

impl Frame {
    pub fn new(index: u64, color: ColorImage) -> Frame {
        let gray = color.to_gray();
        Frame { index, color, gray }
    }

    pub fn shape(&self) -> ImageShape {
        self.gray.shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_carries_gray() {
        let mut color = ColorImage::zeros(4, 2);
        color.set_pixel(3, 1, [200, 200, 200]);
        let frame = Frame::new(7, color);
        assert_eq!(frame.index, 7);
        assert_eq!(frame.shape(), (4, 2));
        assert_eq!(frame.gray.value(3, 1), 200);
        assert_eq!(frame.gray.value(0, 0), 0);
    }
}
