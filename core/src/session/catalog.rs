use serde::{Deserialize, Serialize};

/// A pose the workout can calibrate and hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseEntry {
    pub name: String,
    #[serde(default)]
    pub reference_image: String,
    #[serde(default = "default_hold_seconds")]
    pub hold_duration_seconds: u32,
}

fn default_hold_seconds() -> u32 {
    30
}

impl PoseEntry {
    pub fn new(name: &str, reference_image: &str, hold_duration_seconds: u32) -> Self {
        Self {
            name: name.to_owned(),
            reference_image: reference_image.to_owned(),
            hold_duration_seconds,
        }
    }
}

/// Static, position-indexed list of poses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoseCatalog {
    entries: Vec<PoseEntry>,
}

impl PoseCatalog {
    pub fn new(entries: Vec<PoseEntry>) -> Self {
        Self { entries }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_poses())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PoseEntry> {
        self.entries.get(index)
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.get(index).map(|entry| entry.name.as_str())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PoseEntry> {
        self.entries.iter()
    }
}

impl Default for PoseCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

pub fn builtin_poses() -> Vec<PoseEntry> {
    vec![
        PoseEntry::new("Warrior I", "assets/poses/warrior-1.png", 30),
        PoseEntry::new("Warrior II", "assets/poses/warrior-2.png", 30),
        PoseEntry::new("Tree Pose", "assets/poses/tree.png", 30),
        PoseEntry::new("Downward Dog", "assets/poses/downward-dog.png", 30),
    ]
}
