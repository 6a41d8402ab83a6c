use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Size of the body-landmark index space emitted by the pose backend.
pub const BODY_LANDMARK_COUNT: u8 = 33;

/// Normalized body-joint coordinate.
///
/// `x` and `y` are relative to the intrinsic dimensions of the video frame the
/// backend analysed, so a landmark is only meaningful next to those dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility: None,
        }
    }

    pub fn with_visibility(mut self, visibility: f32) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Joint index to landmark. Absent joints were below detection confidence.
pub type LandmarkMap = BTreeMap<u8, Landmark>;

/// One inbound pose message, replaced wholesale by the next one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkFrame {
    /// Receive order assigned by the connection client.
    pub sequence: u64,
    pub landmarks: LandmarkMap,
    pub timestamp: Option<String>,
    pub kind: Option<String>,
    pub feedback: Vec<String>,
    pub message: Option<String>,
    pub calibration_success: Option<bool>,
    pub accuracy: Option<f32>,
    pub reference: Option<LandmarkMap>,
}

impl LandmarkFrame {
    pub fn has_landmarks(&self) -> bool {
        !self.landmarks.is_empty()
    }

    pub fn landmark(&self, index: u8) -> Option<&Landmark> {
        self.landmarks.get(&index)
    }

    /// Feedback lines joined for single-line display.
    pub fn feedback_line(&self) -> Option<String> {
        if self.feedback.is_empty() {
            None
        } else {
            Some(self.feedback.join(" · "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_line_joins_entries() {
        let frame = LandmarkFrame {
            feedback: vec!["Move your left arm up".into(), "Move your right leg left".into()],
            ..Default::default()
        };
        assert_eq!(
            frame.feedback_line().as_deref(),
            Some("Move your left arm up · Move your right leg left")
        );
        assert_eq!(LandmarkFrame::default().feedback_line(), None);
    }

    #[test]
    fn non_finite_landmark_is_flagged() {
        assert!(Landmark::new(0.5, 0.5, 0.0).is_finite());
        assert!(!Landmark::new(f32::NAN, 0.5, 0.0).is_finite());
    }
}
