use crate::generator::profile::GeneratorConfig;
use anyhow::Context;
use posecore::WorkoutConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Both halves of the simulator read from one YAML file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub backend: BackendConfig,
    pub drive: DriveConfig,
}

impl SimulatorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading simulator config {}", path_ref.display()))?;
        let config: SimulatorConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing simulator config {}", path_ref.display()))?;
        config
            .drive
            .workout
            .validate()
            .with_context(|| format!("validating simulator config {}", path_ref.display()))?;
        Ok(config)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub bind: SocketAddr,
    /// Landmark broadcasts per second, per client.
    pub update_hz: u32,
    pub feedback_interval_ms: u64,
    pub calibration_delay_ms: u64,
    pub generator: GeneratorConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            update_hz: 10,
            feedback_interval_ms: 2000,
            calibration_delay_ms: 500,
            generator: GeneratorConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn update_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.update_hz.max(1)))
    }

    pub fn feedback_interval(&self) -> Duration {
        Duration::from_millis(self.feedback_interval_ms)
    }

    pub fn calibration_delay(&self) -> Duration {
        Duration::from_millis(self.calibration_delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub workout: WorkoutConfig,
    pub open_timeout_secs: u64,
    /// Overrides every pose's hold duration when set.
    pub hold_seconds: Option<u32>,
    /// Upper bound on a single pose's session, countdown included.
    pub pose_time_limit_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            workout: WorkoutConfig::default(),
            open_timeout_secs: 10,
            hold_seconds: None,
            pose_time_limit_secs: 120,
        }
    }
}

impl DriveConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn pose_time_limit(&self) -> Duration {
        Duration::from_secs(self.pose_time_limit_secs)
    }
}
