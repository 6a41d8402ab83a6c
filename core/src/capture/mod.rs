//! Bounded-rate frame capture and JPEG encoding.

pub mod capture_loop;
pub mod encoder;
pub mod source;

pub use capture_loop::CaptureLoop;
pub use encoder::{decode_data_url, FrameEncoder, DATA_URL_PREFIX};
pub use source::{CaptureError, FrameSource, StillImage, TestPattern};
