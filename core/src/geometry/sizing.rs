use crate::geometry::mapping::{CoverMapping, Size};

/// Host notifications that can change the overlay geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeEvent {
    /// Source metadata became available; carries the intrinsic frame size.
    MetadataLoaded(Size),
    /// The source switched resolution mid-stream.
    SourceResized(Size),
    /// The displayed (layout) size of the video element changed.
    ViewportResized(Size),
}

/// Intrinsic source size paired with the displayed size of the video.
///
/// The overlay surface always takes the displayed size, never the intrinsic
/// one; the intrinsic size only feeds the cover mapping.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewGeometry {
    intrinsic: Size,
    display: Size,
    revision: u64,
}

impl ViewGeometry {
    pub fn new(intrinsic: Size, display: Size) -> Self {
        Self {
            intrinsic,
            display,
            revision: 0,
        }
    }

    /// Applies a resize notification. Returns true if anything changed.
    pub fn apply(&mut self, event: ResizeEvent) -> bool {
        let slot = match event {
            ResizeEvent::MetadataLoaded(size) | ResizeEvent::SourceResized(size) => {
                (&mut self.intrinsic, size)
            }
            ResizeEvent::ViewportResized(size) => (&mut self.display, size),
        };
        if *slot.0 == slot.1 {
            return false;
        }
        *slot.0 = slot.1;
        self.revision += 1;
        true
    }

    pub fn intrinsic(&self) -> Size {
        self.intrinsic
    }

    pub fn surface_size(&self) -> Size {
        self.display
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_ready(&self) -> bool {
        !self.intrinsic.is_empty() && !self.display.is_empty()
    }

    pub fn mapping(&self) -> Option<CoverMapping> {
        CoverMapping::new(self.intrinsic, self.display)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_tracks_display_not_intrinsic_size() {
        let mut geometry = ViewGeometry::default();
        assert!(!geometry.is_ready());

        assert!(geometry.apply(ResizeEvent::MetadataLoaded(Size::new(1280.0, 720.0))));
        assert!(geometry.mapping().is_none());

        assert!(geometry.apply(ResizeEvent::ViewportResized(Size::new(800.0, 600.0))));
        assert_eq!(geometry.surface_size(), Size::new(800.0, 600.0));
        assert!(geometry.is_ready());
        assert_eq!(geometry.mapping().unwrap().target(), Size::new(800.0, 600.0));
    }

    #[test]
    fn unchanged_sizes_do_not_bump_revision() {
        let mut geometry = ViewGeometry::new(Size::new(640.0, 480.0), Size::new(320.0, 240.0));
        assert!(!geometry.apply(ResizeEvent::SourceResized(Size::new(640.0, 480.0))));
        assert_eq!(geometry.revision(), 0);
        assert!(geometry.apply(ResizeEvent::SourceResized(Size::new(1920.0, 1080.0))));
        assert_eq!(geometry.revision(), 1);
        assert_eq!(geometry.intrinsic(), Size::new(1920.0, 1080.0));
    }
}
