use crate::workflow::config::DriveConfig;
use anyhow::{bail, Context};
use log::{info, warn};
use posecore::capture::TestPattern;
use posecore::connection::WebSocketConnector;
use posecore::geometry::{ResizeEvent, Size};
use posecore::session::{Control, Phase, SessionHandle, SessionSnapshot};
use posecore::{Workout, WorkoutConfig};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

/// Outcome of one timed session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoseResult {
    pub pose: String,
    pub held_seconds: u32,
    pub hold_complete: bool,
    pub accuracy_percent: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriveSummary {
    pub endpoint: String,
    pub calibrated_poses: Vec<String>,
    pub sessions: Vec<PoseResult>,
    pub last_feedback: Vec<String>,
    pub frames_sent: usize,
    pub frames_dropped: usize,
    pub frames_received: usize,
    pub reconnects_scheduled: usize,
    pub renders: usize,
}

/// Scripted workout against a live backend: a calibration sweep, then one
/// timed session per calibrated pose.
#[derive(Clone)]
pub struct Runner {
    config: DriveConfig,
}

impl Runner {
    pub fn new(config: DriveConfig) -> Self {
        Self { config }
    }

    pub fn workout_config(&self) -> WorkoutConfig {
        let mut workout = self.config.workout.clone();
        if let Some(hold) = self.config.hold_seconds {
            for pose in &mut workout.poses {
                pose.hold_duration_seconds = hold;
            }
        }
        workout
    }

    pub async fn execute(&self) -> anyhow::Result<DriveSummary> {
        let config = self.workout_config();
        let connector = WebSocketConnector::new(config.endpoint.clone())
            .with_context(|| format!("creating connector for {}", config.endpoint))?;
        let source = TestPattern::new(config.capture.width, config.capture.height);
        let workout = Workout::start(&config, Arc::new(connector), source);
        workout.resize(ResizeEvent::ViewportResized(Size::new(
            config.capture.width as f32,
            config.capture.height as f32,
        )));

        let scripted = self.script(&config, &workout).await;
        let metrics = workout.metrics();
        workout.shutdown().await;

        let mut summary = scripted?;
        summary.endpoint = config.endpoint;
        summary.frames_sent = metrics.frames_sent;
        summary.frames_dropped = metrics.frames_dropped;
        summary.frames_received = metrics.frames_received;
        summary.reconnects_scheduled = metrics.reconnects_scheduled;
        summary.renders = metrics.renders;
        Ok(summary)
    }

    async fn script(
        &self,
        config: &WorkoutConfig,
        workout: &Workout,
    ) -> anyhow::Result<DriveSummary> {
        let session = workout.session();
        let mut snapshots = session.subscribe();
        wait_until(
            &mut snapshots,
            self.config.open_timeout(),
            "backend connection",
            |s| s.controls.calibrate_all,
        )
        .await?;
        info!("connected to {}", config.endpoint);

        let sweep_limit = self.sweep_limit(config);
        request(&session, Control::CalibrateAll).await?;
        wait_until(&mut snapshots, sweep_limit, "calibration sweep start", |s| {
            s.phase == Phase::Calibrating
        })
        .await?;
        let swept = wait_until(&mut snapshots, sweep_limit, "calibration sweep", |s| {
            s.phase != Phase::Calibrating
        })
        .await?;
        if swept.calibrated_poses.is_empty() {
            bail!("no pose was calibrated: {:?}", swept.feedback);
        }
        info!("calibrated {:?}", swept.calibrated_poses);

        let mut sessions = Vec::new();
        for (index, pose) in config.poses.iter().enumerate() {
            if !swept.calibrated_poses.contains(&pose.name) {
                warn!("skipping uncalibrated pose {}", pose.name);
                continue;
            }
            request(&session, Control::SelectPose(index)).await?;
            request(&session, Control::StartSession).await?;
            wait_until(
                &mut snapshots,
                self.config.open_timeout(),
                "session start",
                |s| s.phase == Phase::Active,
            )
            .await?;
            let held = wait_until(
                &mut snapshots,
                self.config.pose_time_limit(),
                "pose hold",
                |s| s.hold_complete || s.phase != Phase::Active,
            )
            .await;
            let snapshot = match held {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!("{:#}", err);
                    session.snapshot()
                }
            };
            sessions.push(PoseResult {
                pose: pose.name.clone(),
                held_seconds: snapshot.held_seconds,
                hold_complete: snapshot.hold_complete,
                accuracy_percent: snapshot.accuracy_percent,
            });
            if snapshot.phase != Phase::Active {
                bail!("session for {} ended early: {:?}", pose.name, snapshot.feedback);
            }
            request(&session, Control::EndSession).await?;
            wait_until(
                &mut snapshots,
                self.config.open_timeout(),
                "session end",
                |s| s.phase == Phase::Idle,
            )
            .await?;
        }

        Ok(DriveSummary {
            calibrated_poses: swept.calibrated_poses.iter().cloned().collect(),
            sessions,
            last_feedback: session.snapshot().feedback,
            ..DriveSummary::default()
        })
    }

    /// Countdown plus acknowledgement window for every pose, with a second
    /// of slack each.
    fn sweep_limit(&self, config: &WorkoutConfig) -> Duration {
        let per_pose = Duration::from_secs(u64::from(
            config.session.sweep_countdown_secs.max(config.session.calibration_countdown_secs),
        )) + config.session.processing_grace()
            + Duration::from_secs(1);
        per_pose * config.poses.len().max(1) as u32 + self.config.open_timeout()
    }
}

async fn request(session: &SessionHandle, control: Control) -> anyhow::Result<()> {
    session
        .request(control)
        .await
        .with_context(|| format!("requesting {:?}", control))
}

async fn wait_until(
    snapshots: &mut watch::Receiver<SessionSnapshot>,
    limit: Duration,
    what: &str,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> anyhow::Result<SessionSnapshot> {
    let snapshot = timeout(limit, snapshots.wait_for(predicate))
        .await
        .with_context(|| format!("timed out waiting for {what}"))?
        .with_context(|| format!("session stopped while waiting for {what}"))?;
    Ok(snapshot.clone())
}
