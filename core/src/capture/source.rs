use crate::geometry::Size;
use image::{Rgb, RgbImage};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("video source unavailable: {0}")]
    Unavailable(String),
    #[error("could not read image {path}: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// A video source owned exclusively by one capture loop.
pub trait FrameSource: Send + 'static {
    /// Zero until the source has reported its dimensions.
    fn intrinsic_size(&self) -> Size;
    fn grab(&mut self) -> Result<RgbImage, CaptureError>;
    fn release(&mut self) {}
}

/// Synthetic source: a gradient with a bar that moves on every grab.
pub struct TestPattern {
    width: u32,
    height: u32,
    frame: u32,
    released: bool,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: 0,
            released: false,
        }
    }
}

impl FrameSource for TestPattern {
    fn intrinsic_size(&self) -> Size {
        Size::new(self.width as f32, self.height as f32)
    }

    fn grab(&mut self) -> Result<RgbImage, CaptureError> {
        if self.released {
            return Err(CaptureError::Unavailable("test pattern released".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Unavailable("test pattern has no extent".into()));
        }
        let bar = (self.frame * 8) % self.width;
        self.frame = self.frame.wrapping_add(1);
        let (width, height) = (self.width, self.height);
        Ok(RgbImage::from_fn(width, height, |x, y| {
            if x.abs_diff(bar) < 4 {
                Rgb([255, 255, 255])
            } else {
                Rgb([
                    (x * 255 / width) as u8,
                    (y * 255 / height) as u8,
                    96,
                ])
            }
        }))
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// Repeats one decoded image.
pub struct StillImage {
    image: RgbImage,
}

impl StillImage {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|err| CaptureError::Unreadable {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self::new(image.to_rgb8()))
    }
}

impl FrameSource for StillImage {
    fn intrinsic_size(&self) -> Size {
        Size::new(self.image.width() as f32, self.image.height() as f32)
    }

    fn grab(&mut self) -> Result<RgbImage, CaptureError> {
        Ok(self.image.clone())
    }
}
