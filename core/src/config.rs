use crate::session::catalog::{builtin_poses, PoseCatalog, PoseEntry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:5000/ws";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("reading workout config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing workout config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid workout config: {0}")]
    Invalid(String),
}

/// Everything a workout view reads once at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkoutConfig {
    pub endpoint: String,
    pub reconnect: ReconnectPolicy,
    pub session: SessionTiming,
    pub capture: CaptureConfig,
    pub render: RenderConfig,
    pub poses: Vec<PoseEntry>,
}

impl Default for WorkoutConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            reconnect: ReconnectPolicy::default(),
            session: SessionTiming::default(),
            capture: CaptureConfig::default(),
            render: RenderConfig::default(),
            poses: builtin_poses(),
        }
    }
}

impl WorkoutConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path_ref.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "endpoint {} is not a ws:// or wss:// url",
                self.endpoint
            )));
        }
        if self.poses.is_empty() {
            return Err(ConfigError::Invalid("pose catalog is empty".into()));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg quality {} outside 1..=100",
                self.capture.jpeg_quality
            )));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid("capture resolution must be non-zero".into()));
        }
        Ok(())
    }

    pub fn catalog(&self) -> PoseCatalog {
        PoseCatalog::new(self.poses.clone())
    }
}

/// Constant-delay reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { delay_ms: 3000 }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTiming {
    pub calibration_countdown_secs: u32,
    pub sweep_countdown_secs: u32,
    pub processing_grace_ms: u64,
    /// Zero starts the session immediately.
    pub session_countdown_secs: u32,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            calibration_countdown_secs: 3,
            sweep_countdown_secs: 5,
            processing_grace_ms: 2000,
            session_countdown_secs: 3,
        }
    }
}

impl SessionTiming {
    pub fn processing_grace(&self) -> Duration {
        Duration::from_millis(self.processing_grace_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureMode {
    Interval { period_ms: u64 },
    Continuous { fps: u32 },
}

impl Default for CaptureMode {
    fn default() -> Self {
        CaptureMode::Interval { period_ms: 1000 }
    }
}

impl CaptureMode {
    pub fn period(&self) -> Duration {
        match *self {
            CaptureMode::Interval { period_ms } => Duration::from_millis(period_ms.max(1)),
            CaptureMode::Continuous { fps } => Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::default(),
            width: 640,
            height: 480,
            jpeg_quality: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub refresh_hz: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { refresh_hz: 60 }
    }
}

impl RenderConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.refresh_hz.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = WorkoutConfig::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.reconnect.delay(), Duration::from_secs(3));
        assert_eq!(config.session.processing_grace(), Duration::from_secs(2));
        assert_eq!(config.capture.mode.period(), Duration::from_secs(1));
        assert_eq!(config.catalog().len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config = WorkoutConfig::from_yaml_str(
            "endpoint: ws://localhost:9000/ws\ncapture:\n  mode:\n    kind: continuous\n    fps: 30\n  jpeg_quality: 40\nposes:\n  - name: Star\n    hold_duration_seconds: 10\n",
        )
        .unwrap();
        assert_eq!(config.endpoint, "ws://localhost:9000/ws");
        assert_eq!(config.capture.mode, CaptureMode::Continuous { fps: 30 });
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.jpeg_quality, 40);
        assert_eq!(config.reconnect.delay_ms, 3000);
        assert_eq!(config.catalog().name(0), Some("Star"));
    }

    #[test]
    fn load_reads_yaml_and_validates() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"reconnect:\n  delay_ms: 500\nsession:\n  session_countdown_secs: 0\n")
            .unwrap();
        let path = temp.into_temp_path();
        let config = WorkoutConfig::load(&path).unwrap();
        assert_eq!(config.reconnect.delay(), Duration::from_millis(500));
        assert_eq!(config.session.session_countdown_secs, 0);
        assert_eq!(config.session.sweep_countdown_secs, 5);

        let mut bad = NamedTempFile::new().unwrap();
        bad.write_all(b"endpoint: http://example.com\n").unwrap();
        let bad_path = bad.into_temp_path();
        assert!(matches!(
            WorkoutConfig::load(&bad_path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = WorkoutConfig::load("/nonexistent/workout.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/workout.yaml"));
    }
}
