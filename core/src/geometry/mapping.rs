use crate::protocol::Landmark;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// True when either side is zero, negative or not a number.
    pub fn is_empty(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0)
    }

    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// Projection of normalized source coordinates onto a destination rendered
/// with object-cover fitting: the source is scaled uniformly until it covers
/// the destination and the overflowing axis is center-cropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverMapping {
    source: Size,
    target: Size,
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl CoverMapping {
    /// Returns `None` until both rectangles have a usable size, e.g. before
    /// the video metadata has loaded.
    pub fn new(source: Size, target: Size) -> Option<Self> {
        if source.is_empty() || target.is_empty() {
            return None;
        }

        let (scale, offset_x, offset_y) = if target.aspect() > source.aspect() {
            let scale = target.width / source.width;
            (scale, 0.0, (target.height - source.height * scale) / 2.0)
        } else {
            let scale = target.height / source.height;
            (scale, (target.width - source.width * scale) / 2.0, 0.0)
        };

        Some(Self {
            source,
            target,
            scale,
            offset_x,
            offset_y,
        })
    }

    pub fn project(&self, x: f32, y: f32) -> Point {
        Point::new(
            self.offset_x + x * self.source.width * self.scale,
            self.offset_y + y * self.source.height * self.scale,
        )
    }

    pub fn project_landmark(&self, landmark: &Landmark) -> Point {
        self.project(landmark.x, landmark.y)
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Top-left corner of the scaled source; negative on the cropped axis.
    pub fn offset(&self) -> Point {
        Point::new(self.offset_x, self.offset_y)
    }

    /// Size of the scaled source before cropping.
    pub fn drawn_size(&self) -> Size {
        Size::new(
            self.source.width * self.scale,
            self.source.height * self.scale,
        )
    }

    pub fn source(&self) -> Size {
        self.source
    }

    pub fn target(&self) -> Size {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-3;

    #[test]
    fn undefined_until_sizes_are_known() {
        assert!(CoverMapping::new(Size::ZERO, Size::new(640.0, 480.0)).is_none());
        assert!(CoverMapping::new(Size::new(1280.0, 0.0), Size::new(640.0, 480.0)).is_none());
        assert!(CoverMapping::new(Size::new(1280.0, 720.0), Size::ZERO).is_none());
        assert!(CoverMapping::new(Size::new(f32::NAN, 720.0), Size::new(10.0, 10.0)).is_none());
    }

    #[test]
    fn matching_aspect_has_no_offsets() {
        let mapping = CoverMapping::new(Size::new(1280.0, 720.0), Size::new(640.0, 360.0)).unwrap();
        assert_eq!(mapping.offset(), Point::new(0.0, 0.0));
        assert_eq!(mapping.scale(), 0.5);
        assert_eq!(mapping.project(1.0, 1.0), Point::new(640.0, 360.0));
    }

    #[test]
    fn wider_destination_crops_vertically() {
        // 4:3 source into a 16:9 surface: width fits, height overflows.
        let mapping = CoverMapping::new(Size::new(640.0, 480.0), Size::new(1600.0, 900.0)).unwrap();
        assert!((mapping.scale() - 2.5).abs() < EPS);
        assert_eq!(mapping.offset().x, 0.0);
        assert!((mapping.offset().y - (900.0 - 1200.0) / 2.0).abs() < EPS);

        let centre = mapping.project(0.5, 0.5);
        assert!((centre.x - 800.0).abs() < EPS);
        assert!((centre.y - 450.0).abs() < EPS);
    }

    #[test]
    fn taller_destination_crops_horizontally() {
        let mapping = CoverMapping::new(Size::new(1280.0, 720.0), Size::new(400.0, 600.0)).unwrap();
        assert!((mapping.scale() - 600.0 / 720.0).abs() < EPS);
        assert_eq!(mapping.offset().y, 0.0);
        assert!(mapping.offset().x < 0.0);

        // Uniform scale: a unit step covers the same pixels on both axes.
        let origin = mapping.project(0.0, 0.0);
        let step = mapping.project(0.1, 0.1);
        let dx = (step.x - origin.x) / 1280.0;
        let dy = (step.y - origin.y) / 720.0;
        assert!((dx - dy).abs() < 1e-6);
    }

    #[test]
    fn projected_points_stay_inside_the_covered_box() {
        let sources = [(1280.0, 720.0), (640.0, 480.0), (720.0, 1280.0), (500.0, 500.0)];
        let targets = [(1920.0, 1080.0), (300.0, 800.0), (1000.0, 1000.0), (333.0, 101.0)];
        let samples = [0.0, 0.13, 0.5, 0.77, 1.0];

        for &(sw, sh) in &sources {
            for &(tw, th) in &targets {
                let mapping = CoverMapping::new(Size::new(sw, sh), Size::new(tw, th)).unwrap();
                let drawn = mapping.drawn_size();
                let offset = mapping.offset();
                assert!(drawn.width + EPS >= tw && drawn.height + EPS >= th);

                for &x in &samples {
                    for &y in &samples {
                        let p = mapping.project(x, y);
                        assert!(p.x >= offset.x - EPS && p.x <= offset.x + drawn.width + EPS);
                        assert!(p.y >= offset.y - EPS && p.y <= offset.y + drawn.height + EPS);
                        if offset.x == 0.0 {
                            assert!(p.x >= -EPS && p.x <= tw + EPS);
                        }
                        if offset.y == 0.0 {
                            assert!(p.y >= -EPS && p.y <= th + EPS);
                        }
                    }
                }
            }
        }
    }
}
