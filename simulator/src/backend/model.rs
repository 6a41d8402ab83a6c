use posecore::protocol::{Feedback, LandmarkMap, ServerMessage};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Joints scored for session accuracy: shoulders, elbows, hips, knees, ankles.
pub const KEY_POINTS: [u8; 10] = [11, 12, 13, 14, 23, 24, 25, 26, 27, 28];
/// Limb centroid offset that triggers a direction hint.
pub const LIMB_THRESHOLD: f32 = 0.1;
/// Average key-point error that maps to 0 % accuracy.
pub const ERROR_SCALE: f32 = 0.2;
pub const ALIGNED: &str = "Good alignment! Hold the pose";

struct Limb {
    description: &'static str,
    joints: [u8; 3],
}

/// Sides are named from the viewer's perspective.
const LIMBS: [Limb; 4] = [
    Limb {
        description: "right arm",
        joints: [15, 13, 11],
    },
    Limb {
        description: "left arm",
        joints: [16, 14, 12],
    },
    Limb {
        description: "right leg",
        joints: [27, 25, 23],
    },
    Limb {
        description: "left leg",
        joints: [28, 26, 24],
    },
];

fn centroid(landmarks: &LandmarkMap, joints: &[u8]) -> Option<(f32, f32)> {
    let mut sum = (0.0, 0.0);
    for joint in joints {
        let landmark = landmarks.get(joint)?;
        sum.0 += landmark.x;
        sum.1 += landmark.y;
    }
    let count = joints.len() as f32;
    Some((sum.0 / count, sum.1 / count))
}

/// The single most significant limb correction, or [`ALIGNED`].
pub fn direction_feedback(user: &LandmarkMap, reference: &LandmarkMap) -> String {
    let mut worst: Option<(f32, String)> = None;
    for limb in &LIMBS {
        let (Some(current), Some(target)) =
            (centroid(user, &limb.joints), centroid(reference, &limb.joints))
        else {
            continue;
        };
        let dx = current.0 - target.0;
        let dy = current.1 - target.1;
        let mut consider = |diff: f32, direction: &str| {
            if diff.abs() > LIMB_THRESHOLD && worst.as_ref().map_or(true, |(d, _)| diff.abs() > *d) {
                worst = Some((
                    diff.abs(),
                    format!("Move your {} {}", limb.description, direction),
                ));
            }
        };
        consider(dx, if dx < 0.0 { "left" } else { "right" });
        consider(dy, if dy > 0.0 { "up" } else { "down" });
    }
    worst.map_or_else(|| ALIGNED.to_owned(), |(_, message)| message)
}

/// `100 * (1 - avgError / 0.2)` over the key points present in both frames,
/// clamped to 0..=100 and truncated to a whole percent.
pub fn accuracy(user: &LandmarkMap, reference: &LandmarkMap) -> Option<f32> {
    let errors: Vec<f32> = KEY_POINTS
        .iter()
        .filter_map(|point| {
            let current = user.get(point)?;
            let target = reference.get(point)?;
            Some((current.x - target.x).hypot(current.y - target.y))
        })
        .collect();
    if errors.is_empty() {
        return None;
    }
    let average = errors.iter().sum::<f32>() / errors.len() as f32;
    Some((100.0 * (1.0 - average / ERROR_SCALE)).clamp(0.0, 100.0).trunc())
}

/// Per-connection state held by the mock backend.
#[derive(Debug, Clone, Default)]
pub struct ClientSession {
    pub active_pose: Option<String>,
    pub calibrated_poses: BTreeSet<String>,
    pub session_active: bool,
    pub images_received: usize,
    last_feedback: Option<Instant>,
}

impl ClientSession {
    pub fn start(&mut self, pose: &str, now: Instant) {
        self.session_active = true;
        self.active_pose = Some(pose.to_owned());
        self.last_feedback = Some(now);
    }

    pub fn end(&mut self) {
        self.session_active = false;
        self.active_pose = None;
    }

    pub fn change_pose(&mut self, pose: &str) {
        self.active_pose = Some(pose.to_owned());
    }

    /// The periodic landmark broadcast, with feedback and accuracy attached
    /// at most once per `interval` while a calibrated session runs.
    pub fn periodic_update(
        &mut self,
        landmarks: &LandmarkMap,
        calibrations: &HashMap<String, LandmarkMap>,
        now: Instant,
        interval: Duration,
    ) -> ServerMessage {
        let mut update = ServerMessage {
            landmarks: Some(landmarks.clone()),
            ..Default::default()
        };
        if !self.session_active || landmarks.is_empty() {
            return update;
        }
        let Some(reference) = self
            .active_pose
            .as_ref()
            .and_then(|pose| calibrations.get(pose))
        else {
            return update;
        };
        let due = self
            .last_feedback
            .map_or(true, |last| now.duration_since(last) > interval);
        if due {
            update.feedback = Some(Feedback::Line(direction_feedback(landmarks, reference)));
            update.accuracy = accuracy(landmarks, reference);
            self.last_feedback = Some(now);
        }
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::template::standing_pose;

    fn shifted(dx: f32, dy: f32, joints: &[u8]) -> LandmarkMap {
        let mut pose = standing_pose();
        for joint in joints {
            if let Some(landmark) = pose.get_mut(joint) {
                landmark.x += dx;
                landmark.y += dy;
            }
        }
        pose
    }

    #[test]
    fn identical_poses_are_aligned_and_fully_accurate() {
        let pose = standing_pose();
        assert_eq!(direction_feedback(&pose, &pose), ALIGNED);
        assert_eq!(accuracy(&pose, &pose), Some(100.0));
    }

    #[test]
    fn largest_limb_offset_wins() {
        let reference = standing_pose();
        let mut user = shifted(-0.15, 0.0, &[15, 13, 11]);
        for joint in [28, 26, 24] {
            user.get_mut(&joint).unwrap().y += 0.25;
        }
        assert_eq!(direction_feedback(&user, &reference), "Move your left leg up");

        let user = shifted(-0.15, 0.0, &[15, 13, 11]);
        assert_eq!(direction_feedback(&user, &reference), "Move your right arm left");
    }

    #[test]
    fn accuracy_scales_with_average_error() {
        let reference = standing_pose();
        let user = shifted(0.1, 0.0, &KEY_POINTS);
        let value = accuracy(&user, &reference).unwrap();
        assert!((49.0..=50.0).contains(&value), "got {value}");
        assert_eq!(accuracy(&shifted(0.5, 0.0, &KEY_POINTS), &reference), Some(0.0));
        assert_eq!(accuracy(&LandmarkMap::new(), &reference), None);
    }

    #[test]
    fn feedback_is_rate_limited_and_needs_a_calibration() {
        let pose = standing_pose();
        let mut calibrations = HashMap::new();
        let start = Instant::now();
        let interval = Duration::from_secs(2);

        let mut session = ClientSession::default();
        session.start("Tree Pose", start);
        let update = session.periodic_update(&pose, &calibrations, start + interval * 2, interval);
        assert!(update.feedback.is_none());
        assert!(update.landmarks.is_some());

        calibrations.insert("Tree Pose".to_string(), pose.clone());
        let early = session.periodic_update(&pose, &calibrations, start + Duration::from_secs(1), interval);
        assert!(early.accuracy.is_none());

        let due = session.periodic_update(&pose, &calibrations, start + Duration::from_millis(2100), interval);
        assert_eq!(due.accuracy, Some(100.0));
        assert_eq!(due.feedback, Some(Feedback::Line(ALIGNED.into())));

        let again = session.periodic_update(&pose, &calibrations, start + Duration::from_millis(2200), interval);
        assert!(again.feedback.is_none());

        session.end();
        let idle = session.periodic_update(&pose, &calibrations, start + interval * 5, interval);
        assert!(idle.accuracy.is_none());
    }
}
