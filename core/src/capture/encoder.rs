use crate::capture::source::CaptureError;
use crate::config::CaptureConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, RgbImage};

pub const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Scales a grabbed frame to the capture resolution and encodes it as a
/// JPEG data URL.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    width: u32,
    height: u32,
    quality: u8,
}

impl FrameEncoder {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.width, config.height, config.jpeg_quality)
    }

    pub fn encode(&self, frame: &RgbImage) -> Result<String, CaptureError> {
        let jpeg = self.encode_jpeg(frame)?;
        let mut url = String::with_capacity(DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
        url.push_str(DATA_URL_PREFIX);
        STANDARD.encode_string(&jpeg, &mut url);
        Ok(url)
    }

    pub fn encode_jpeg(&self, frame: &RgbImage) -> Result<Vec<u8>, CaptureError> {
        let mut bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, self.quality);
        if frame.dimensions() == (self.width, self.height) {
            encoder.encode(frame.as_raw(), self.width, self.height, ExtendedColorType::Rgb8)?;
        } else {
            let scaled = imageops::resize(frame, self.width, self.height, FilterType::Triangle);
            encoder.encode(scaled.as_raw(), self.width, self.height, ExtendedColorType::Rgb8)?;
        }
        Ok(bytes)
    }
}

/// Decodes the payload of a JPEG data URL, for consumers of captured frames.
pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let payload = url.strip_prefix(DATA_URL_PREFIX)?;
    STANDARD.decode(payload).ok()
}
