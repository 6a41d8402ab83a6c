use crate::geometry::{Point, Size};

/// 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::rgb(0xFFFFFF);

    pub const fn rgb(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xFF) as u8,
            g: ((hex >> 8) & 0xFF) as u8,
            b: (hex & 0xFF) as u8,
            a: 0xFF,
        }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
    pub color: Rgba,
    pub width: f32,
}

impl Stroke {
    pub fn new(color: Rgba, width: f32) -> Self {
        Self { color, width }
    }
}

/// Drawing target for the overlay. Coordinates are surface pixels.
pub trait Surface {
    fn size(&self) -> Size;
    fn clear(&mut self);
    fn line(&mut self, from: Point, to: Point, stroke: Stroke);
    fn circle(&mut self, center: Point, radius: f32, fill: Rgba, outline: Option<Stroke>);
    fn label(&mut self, at: Point, text: &str, color: Rgba, size: f32);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Line {
        from: Point,
        to: Point,
        stroke: Stroke,
    },
    Circle {
        center: Point,
        radius: f32,
        fill: Rgba,
        outline: Option<Stroke>,
    },
    Label {
        at: Point,
        text: String,
        color: Rgba,
        size: f32,
    },
}

/// Recorded display list; hosts replay it onto their own canvas.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scene {
    size: Size,
    primitives: Vec<Primitive>,
}

impl Scene {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            primitives: Vec::new(),
        }
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    pub fn is_blank(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = (Point, Point, Stroke)> + '_ {
        self.primitives.iter().filter_map(|primitive| match primitive {
            Primitive::Line { from, to, stroke } => Some((*from, *to, *stroke)),
            _ => None,
        })
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.primitives.iter().filter_map(|primitive| match primitive {
            Primitive::Label { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Replays the recorded primitives onto another surface.
    pub fn replay<S: Surface>(&self, target: &mut S) {
        for primitive in &self.primitives {
            match primitive {
                Primitive::Line { from, to, stroke } => target.line(*from, *to, *stroke),
                Primitive::Circle {
                    center,
                    radius,
                    fill,
                    outline,
                } => target.circle(*center, *radius, *fill, *outline),
                Primitive::Label {
                    at,
                    text,
                    color,
                    size,
                } => target.label(*at, text, *color, *size),
            }
        }
    }
}

impl Surface for Scene {
    fn size(&self) -> Size {
        self.size
    }

    fn clear(&mut self) {
        self.primitives.clear();
    }

    fn line(&mut self, from: Point, to: Point, stroke: Stroke) {
        self.primitives.push(Primitive::Line { from, to, stroke });
    }

    fn circle(&mut self, center: Point, radius: f32, fill: Rgba, outline: Option<Stroke>) {
        self.primitives.push(Primitive::Circle {
            center,
            radius,
            fill,
            outline,
        });
    }

    fn label(&mut self, at: Point, text: &str, color: Rgba, size: f32) {
        self.primitives.push(Primitive::Label {
            at,
            text: text.to_owned(),
            color,
            size,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_unpack() {
        let color = Rgba::rgb(0x4CAF50);
        assert_eq!((color.r, color.g, color.b, color.a), (0x4C, 0xAF, 0x50, 0xFF));
        assert_eq!(color.with_alpha(0x4D).a, 0x4D);
    }

    #[test]
    fn replay_copies_every_primitive() {
        let mut scene = Scene::new(Size::new(10.0, 10.0));
        scene.line(Point::new(0.0, 0.0), Point::new(1.0, 1.0), Stroke::new(Rgba::WHITE, 2.0));
        scene.label(Point::new(2.0, 2.0), "nose", Rgba::WHITE, 10.0);

        let mut copy = Scene::new(Size::new(10.0, 10.0));
        scene.replay(&mut copy);
        assert_eq!(copy, scene);
        copy.clear();
        assert!(copy.is_blank());
    }
}
