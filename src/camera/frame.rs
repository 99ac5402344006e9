//! Frame data structures for camera stream content

use image::RgbImage;
use std::time::Instant;

/// A single frame pulled from the camera stream
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel data, row-major
    pub image: RgbImage,
    /// Monotonically increasing index assigned by the video source
    pub index: u64,
    /// Timestamp when the frame was read
    pub timestamp: Instant,
}

impl Frame {
    /// Create a new frame
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self {
            image,
            index,
            timestamp: Instant::now(),
        }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_dimensions_follow_image() {
        let frame = Frame::new(RgbImage::new(64, 48), 7);
        assert_eq!(frame.dimensions(), (64, 48));
        assert_eq!(frame.index, 7);
    }
}
