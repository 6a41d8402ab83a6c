pub mod landmark;
pub mod message;

pub use landmark::{Landmark, LandmarkFrame, LandmarkMap, BODY_LANDMARK_COUNT};
pub use message::{ClientMessage, ControlCommand, Feedback, Inbound, ServerMessage};
