use crate::overlay::surface::Rgba;

const TORSO: Rgba = Rgba::rgb(0x4CAF50);
const ARM: Rgba = Rgba::rgb(0x2196F3);
const LEG: Rgba = Rgba::rgb(0xFF9800);

/// A drawn connection between two body landmarks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bone {
    pub from: u8,
    pub to: u8,
    pub color: Rgba,
    pub width: f32,
    pub label: &'static str,
}

const fn bone(from: u8, to: u8, color: Rgba, label: &'static str) -> Bone {
    Bone {
        from,
        to,
        color,
        width: 3.0,
        label,
    }
}

/// Torso, arms and legs over the 33-point body landmark indices.
pub const BONES: [Bone; 12] = [
    bone(11, 12, TORSO, "shoulders"),
    bone(12, 24, TORSO, "right torso"),
    bone(24, 23, TORSO, "hips"),
    bone(23, 11, TORSO, "left torso"),
    bone(12, 14, ARM, "right upper arm"),
    bone(14, 16, ARM, "right lower arm"),
    bone(11, 13, ARM, "left upper arm"),
    bone(13, 15, ARM, "left lower arm"),
    bone(24, 26, LEG, "right thigh"),
    bone(26, 28, LEG, "right calf"),
    bone(23, 25, LEG, "left thigh"),
    bone(25, 27, LEG, "left calf"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyJoint {
    pub index: u8,
    pub name: &'static str,
}

/// Primary body points drawn larger, with a halo and a label.
pub const KEY_JOINTS: [KeyJoint; 13] = [
    KeyJoint { index: 0, name: "nose" },
    KeyJoint { index: 11, name: "left shoulder" },
    KeyJoint { index: 12, name: "right shoulder" },
    KeyJoint { index: 13, name: "left elbow" },
    KeyJoint { index: 14, name: "right elbow" },
    KeyJoint { index: 15, name: "left wrist" },
    KeyJoint { index: 16, name: "right wrist" },
    KeyJoint { index: 23, name: "left hip" },
    KeyJoint { index: 24, name: "right hip" },
    KeyJoint { index: 25, name: "left knee" },
    KeyJoint { index: 26, name: "right knee" },
    KeyJoint { index: 27, name: "left ankle" },
    KeyJoint { index: 28, name: "right ankle" },
];

pub fn key_joint(index: u8) -> Option<&'static KeyJoint> {
    KEY_JOINTS.iter().find(|joint| joint.index == index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BODY_LANDMARK_COUNT;

    #[test]
    fn bones_stay_inside_the_body_index_space() {
        for bone in BONES.iter() {
            assert!(bone.from < BODY_LANDMARK_COUNT && bone.to < BODY_LANDMARK_COUNT);
            assert_ne!(bone.from, bone.to);
        }
    }

    #[test]
    fn every_bone_endpoint_is_a_key_joint() {
        for bone in BONES.iter() {
            assert!(key_joint(bone.from).is_some(), "{} not keyed", bone.from);
            assert!(key_joint(bone.to).is_some(), "{} not keyed", bone.to);
        }
        assert_eq!(key_joint(0).map(|joint| joint.name), Some("nose"));
        assert!(key_joint(5).is_none());
    }
}
