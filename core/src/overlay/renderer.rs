use crate::geometry::{CoverMapping, Point, ViewGeometry};
use crate::overlay::surface::{Rgba, Stroke, Surface};
use crate::overlay::topology::{key_joint, BONES};
use crate::protocol::{LandmarkFrame, LandmarkMap};

/// Visual parameters for one skeleton layer.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStyle {
    pub joint_radius: f32,
    pub key_joint_radius: f32,
    pub halo_radius: f32,
    pub joint_color: Rgba,
    pub key_joint_color: Rgba,
    pub halo_color: Rgba,
    pub outline: Option<Stroke>,
    /// Wider translucent stroke laid under each bone.
    pub glow: Option<Rgba>,
    /// Overrides the per-bone topology colors.
    pub bone_color: Option<Rgba>,
    pub labels: bool,
    pub label_color: Rgba,
    pub label_size: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            joint_radius: 2.0,
            key_joint_radius: 4.0,
            halo_radius: 5.0,
            joint_color: Rgba::rgb(0xFFC107),
            key_joint_color: Rgba::rgb(0xFF5722),
            halo_color: Rgba::rgb(0xFF5722).with_alpha(0x4D),
            outline: Some(Stroke::new(Rgba::WHITE, 1.0)),
            glow: Some(Rgba::WHITE.with_alpha(0x80)),
            bone_color: None,
            labels: true,
            label_color: Rgba::WHITE,
            label_size: 10.0,
        }
    }
}

impl OverlayStyle {
    /// Muted style for the calibrated reference skeleton.
    pub fn ghost() -> Self {
        let muted = Rgba::rgb(0xB0BEC5).with_alpha(0x73);
        Self {
            joint_color: muted,
            key_joint_color: muted,
            halo_color: muted.with_alpha(0x20),
            outline: None,
            glow: None,
            bone_color: Some(muted),
            labels: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// The displayed size is zero; try again on the next tick.
    SurfaceEmpty,
    /// Intrinsic source dimensions are not known yet.
    SourceNotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Drawn { bones: usize, joints: usize },
    Deferred(DeferReason),
}

/// Draws landmark frames as a skeleton over a cover-fitted video surface.
#[derive(Debug, Clone)]
pub struct OverlayRenderer {
    live: OverlayStyle,
    reference: Option<OverlayStyle>,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new(OverlayStyle::default())
    }
}

impl OverlayRenderer {
    pub fn new(live: OverlayStyle) -> Self {
        Self {
            live,
            reference: Some(OverlayStyle::ghost()),
        }
    }

    pub fn without_reference(mut self) -> Self {
        self.reference = None;
        self
    }

    /// Clears the surface and draws the reference layer (if any) under the
    /// live frame. The counts in the outcome refer to the live frame.
    pub fn render<S: Surface>(
        &self,
        surface: &mut S,
        geometry: &ViewGeometry,
        live: Option<&LandmarkFrame>,
        reference: Option<&LandmarkMap>,
    ) -> RenderOutcome {
        let size = surface.size();
        if size.is_empty() {
            return RenderOutcome::Deferred(DeferReason::SurfaceEmpty);
        }
        surface.clear();

        let Some(mapping) = CoverMapping::new(geometry.intrinsic(), size) else {
            return RenderOutcome::Deferred(DeferReason::SourceNotReady);
        };

        if let (Some(style), Some(reference)) = (self.reference.as_ref(), reference) {
            draw_skeleton(surface, &mapping, reference, style);
        }

        let (bones, joints) = match live {
            Some(frame) => draw_skeleton(surface, &mapping, &frame.landmarks, &self.live),
            None => (0, 0),
        };
        RenderOutcome::Drawn { bones, joints }
    }
}

fn draw_skeleton<S: Surface>(
    surface: &mut S,
    mapping: &CoverMapping,
    landmarks: &LandmarkMap,
    style: &OverlayStyle,
) -> (usize, usize) {
    let mut bones = 0;
    for bone in BONES.iter() {
        let (Some(from), Some(to)) = (landmarks.get(&bone.from), landmarks.get(&bone.to)) else {
            continue;
        };
        let start = mapping.project_landmark(from);
        let end = mapping.project_landmark(to);
        if let Some(glow) = style.glow {
            surface.line(start, end, Stroke::new(glow, bone.width + 2.0));
        }
        let color = style.bone_color.unwrap_or(bone.color);
        surface.line(start, end, Stroke::new(color, bone.width));
        bones += 1;
    }

    for (&index, landmark) in landmarks {
        let center = mapping.project_landmark(landmark);
        match key_joint(index) {
            Some(joint) => {
                surface.circle(center, style.halo_radius, style.halo_color, None);
                surface.circle(center, style.key_joint_radius, style.key_joint_color, style.outline);
                if style.labels {
                    surface.label(
                        label_anchor(center),
                        joint.name,
                        style.label_color,
                        style.label_size,
                    );
                }
            }
            None => surface.circle(center, style.joint_radius, style.joint_color, style.outline),
        }
    }

    (bones, landmarks.len())
}

fn label_anchor(center: Point) -> Point {
    center.offset(6.0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ResizeEvent, Size};
    use crate::overlay::surface::{Primitive, Scene};
    use crate::protocol::Landmark;

    fn frame_with(indices: &[u8]) -> LandmarkFrame {
        let landmarks = indices
            .iter()
            .map(|&index| (index, Landmark::new(0.25 + index as f32 / 100.0, 0.5, 0.0)))
            .collect();
        LandmarkFrame {
            landmarks,
            ..Default::default()
        }
    }

    fn ready_geometry() -> ViewGeometry {
        ViewGeometry::new(Size::new(1280.0, 720.0), Size::new(640.0, 360.0))
    }

    #[test]
    fn shoulders_only_draws_the_shoulder_bone() {
        let renderer = OverlayRenderer::default();
        let geometry = ready_geometry();
        let mut scene = Scene::new(geometry.surface_size());
        let frame = frame_with(&[11, 12]);

        let outcome = renderer.render(&mut scene, &geometry, Some(&frame), None);
        assert_eq!(outcome, RenderOutcome::Drawn { bones: 1, joints: 2 });

        let mapping = geometry.mapping().unwrap();
        let left = mapping.project_landmark(frame.landmark(11).unwrap());
        let right = mapping.project_landmark(frame.landmark(12).unwrap());
        let lines: Vec<_> = scene.lines().collect();
        assert!(!lines.is_empty());
        for (from, to, _) in lines {
            assert_eq!((from, to), (left, right));
        }
    }

    #[test]
    fn edges_need_both_endpoints() {
        let renderer = OverlayRenderer::default();
        let geometry = ready_geometry();
        let mut scene = Scene::new(geometry.surface_size());
        // Left arm chain without the shoulder: only elbow-wrist is drawable.
        let frame = frame_with(&[13, 15, 25]);
        let outcome = renderer.render(&mut scene, &geometry, Some(&frame), None);
        assert_eq!(outcome, RenderOutcome::Drawn { bones: 1, joints: 3 });
    }

    #[test]
    fn key_joints_get_halo_and_label() {
        let renderer = OverlayRenderer::default();
        let geometry = ready_geometry();
        let mut scene = Scene::new(geometry.surface_size());
        let frame = frame_with(&[0, 5]);
        renderer.render(&mut scene, &geometry, Some(&frame), None);

        let circles = scene
            .primitives()
            .iter()
            .filter(|p| matches!(p, Primitive::Circle { .. }))
            .count();
        // nose: halo + joint, index 5: joint only
        assert_eq!(circles, 3);
        assert_eq!(scene.labels().collect::<Vec<_>>(), vec!["nose"]);
    }

    #[test]
    fn defers_until_surface_and_source_are_sized() {
        let renderer = OverlayRenderer::default();
        let frame = frame_with(&[11, 12]);

        let mut geometry = ViewGeometry::default();
        let mut empty = Scene::new(Size::ZERO);
        assert_eq!(
            renderer.render(&mut empty, &geometry, Some(&frame), None),
            RenderOutcome::Deferred(DeferReason::SurfaceEmpty)
        );

        geometry.apply(ResizeEvent::ViewportResized(Size::new(640.0, 480.0)));
        let mut scene = Scene::new(geometry.surface_size());
        assert_eq!(
            renderer.render(&mut scene, &geometry, Some(&frame), None),
            RenderOutcome::Deferred(DeferReason::SourceNotReady)
        );
        assert!(scene.is_blank());
    }

    #[test]
    fn render_clears_previous_drawing_and_leaves_frame_untouched() {
        let renderer = OverlayRenderer::default();
        let geometry = ready_geometry();
        let mut scene = Scene::new(geometry.surface_size());
        let frame = frame_with(&[11, 12, 13, 15]);
        let before = frame.clone();

        renderer.render(&mut scene, &geometry, Some(&frame), None);
        let outcome = renderer.render(&mut scene, &geometry, None, None);
        assert_eq!(outcome, RenderOutcome::Drawn { bones: 0, joints: 0 });
        assert!(scene.is_blank());
        assert_eq!(frame, before);
    }

    #[test]
    fn reference_layer_is_drawn_in_ghost_color() {
        let renderer = OverlayRenderer::default().without_reference();
        let geometry = ready_geometry();
        let reference = frame_with(&[11, 12]).landmarks;
        let mut scene = Scene::new(geometry.surface_size());
        renderer.render(&mut scene, &geometry, None, Some(&reference));
        assert!(scene.is_blank());

        let renderer = OverlayRenderer::new(OverlayStyle::default());
        renderer.render(&mut scene, &geometry, None, Some(&reference));
        let ghost = OverlayStyle::ghost().bone_color.unwrap();
        assert!(scene.lines().all(|(_, _, stroke)| stroke.color == ghost));
        assert_eq!(scene.labels().count(), 0);
    }
}
