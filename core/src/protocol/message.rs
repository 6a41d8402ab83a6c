use crate::protocol::landmark::{Landmark, LandmarkFrame, LandmarkMap};
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Control actions understood by the pose backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlCommand {
    Calibrate { pose: String },
    StartSession { pose: String },
    EndSession,
    ChangePose { pose: String },
}

impl ControlCommand {
    pub fn pose(&self) -> Option<&str> {
        match self {
            ControlCommand::Calibrate { pose }
            | ControlCommand::StartSession { pose }
            | ControlCommand::ChangePose { pose } => Some(pose),
            ControlCommand::EndSession => None,
        }
    }
}

/// Client → backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Control(ControlCommand),
    /// Captured still frame as a `data:image/jpeg;base64,...` URL.
    Frame { image: String },
}

/// Feedback arrives either as a single line or as a list of hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Feedback {
    Line(String),
    Lines(Vec<String>),
}

impl Feedback {
    pub fn into_lines(self) -> Vec<String> {
        match self {
            Feedback::Line(line) if line.trim().is_empty() => Vec::new(),
            Feedback::Line(line) => vec![line],
            Feedback::Lines(lines) => lines
                .into_iter()
                .filter(|line| !line.trim().is_empty())
                .collect(),
        }
    }
}

/// Backend → client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_landmarks",
        skip_serializing_if = "Option::is_none"
    )]
    pub landmarks: Option<LandmarkMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_landmarks",
        skip_serializing_if = "Option::is_none"
    )]
    pub reference_landmarks: Option<LandmarkMap>,
}

impl ServerMessage {
    pub fn into_frame(self, sequence: u64) -> LandmarkFrame {
        LandmarkFrame {
            sequence,
            landmarks: self.landmarks.unwrap_or_default(),
            timestamp: self.timestamp,
            kind: self.kind,
            feedback: self.feedback.map(Feedback::into_lines).unwrap_or_default(),
            message: self.message,
            calibration_success: self.calibration_success,
            accuracy: self.accuracy.filter(|value| value.is_finite()),
            reference: self.reference_landmarks,
        }
    }
}

/// Keeps entries whose key is a joint index and whose value is a finite
/// landmark; anything else is skipped rather than failing the message.
fn lenient_landmarks<'de, D>(deserializer: D) -> Result<Option<LandmarkMap>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|entries| {
        entries
            .into_iter()
            .filter_map(|(key, value)| {
                let index = key.trim().parse::<u8>().ok()?;
                let landmark: Landmark = serde_json::from_value(value).ok()?;
                landmark.is_finite().then_some((index, landmark))
            })
            .collect()
    }))
}

/// A parsed inbound payload. Unparseable payloads are kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Frame(LandmarkFrame),
    Opaque(String),
}

impl Inbound {
    pub fn parse(raw: &str, sequence: u64) -> Self {
        match serde_json::from_str::<ServerMessage>(raw) {
            Ok(message) => Inbound::Frame(message.into_frame(sequence)),
            Err(err) => {
                debug!("inbound payload is not a pose message: {}", err);
                Inbound::Opaque(raw.to_owned())
            }
        }
    }

    pub fn frame(&self) -> Option<&LandmarkFrame> {
        match self {
            Inbound::Frame(frame) => Some(frame),
            Inbound::Opaque(_) => None,
        }
    }
}
