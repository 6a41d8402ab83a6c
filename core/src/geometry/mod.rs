pub mod mapping;
pub mod sizing;

pub use mapping::{CoverMapping, Point, Size};
pub use sizing::{ResizeEvent, ViewGeometry};
