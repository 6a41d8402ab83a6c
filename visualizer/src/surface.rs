use iced::widget::canvas::{self, Frame, Path};
use iced::{Color, Pixels, Point};
use posecore::geometry;
use posecore::overlay::{Rgba, Scene, Stroke, Surface};

pub fn color(rgba: Rgba) -> Color {
    Color::from_rgba8(rgba.r, rgba.g, rgba.b, f32::from(rgba.a) / 255.0)
}

fn point(point: geometry::Point) -> Point {
    Point::new(point.x, point.y)
}

/// Draws overlay primitives straight into an iced canvas frame.
pub struct FrameSurface<'a> {
    frame: &'a mut Frame,
}

impl<'a> FrameSurface<'a> {
    pub fn new(frame: &'a mut Frame) -> Self {
        Self { frame }
    }

    pub fn paint(frame: &'a mut Frame, scene: &Scene) {
        scene.replay(&mut Self::new(frame));
    }

    fn stroke(&mut self, path: &Path, stroke: Stroke) {
        self.frame.stroke(
            path,
            canvas::Stroke::default()
                .with_color(color(stroke.color))
                .with_width(stroke.width),
        );
    }
}

impl Surface for FrameSurface<'_> {
    fn size(&self) -> geometry::Size {
        let size = self.frame.size();
        geometry::Size::new(size.width, size.height)
    }

    // Canvas frames start empty on every draw.
    fn clear(&mut self) {}

    fn line(&mut self, from: geometry::Point, to: geometry::Point, stroke: Stroke) {
        let path = Path::line(point(from), point(to));
        self.stroke(&path, stroke);
    }

    fn circle(&mut self, center: geometry::Point, radius: f32, fill: Rgba, outline: Option<Stroke>) {
        let path = Path::circle(point(center), radius);
        self.frame.fill(&path, color(fill));
        if let Some(outline) = outline {
            self.stroke(&path, outline);
        }
    }

    fn label(&mut self, at: geometry::Point, text: &str, color_value: Rgba, size: f32) {
        self.frame.fill_text(canvas::Text {
            content: text.to_owned(),
            position: point(at),
            color: color(color_value),
            size: Pixels(size),
            ..canvas::Text::default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_maps_to_normalized_color() {
        let mapped = color(Rgba::rgb(0xFF0000).with_alpha(0));
        assert_eq!(mapped.r, 1.0);
        assert_eq!(mapped.g, 0.0);
        assert_eq!(mapped.a, 0.0);
        assert_eq!(color(Rgba::WHITE), Color::WHITE);
    }
}
