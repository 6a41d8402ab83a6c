pub mod render_loop;
pub mod renderer;
pub mod surface;
pub mod topology;

pub use render_loop::{RenderLoop, RenderSources};
pub use renderer::{DeferReason, OverlayRenderer, OverlayStyle, RenderOutcome};
pub use surface::{Primitive, Rgba, Scene, Stroke, Surface};
pub use topology::{key_joint, Bone, KeyJoint, BONES, KEY_JOINTS};
