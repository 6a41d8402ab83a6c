use crate::config::SessionTiming;
use crate::prelude::ConnectionStatus;
use crate::protocol::{ControlCommand, LandmarkFrame};
use crate::session::catalog::PoseCatalog;
use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::time::Duration;

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Calibrating,
    Active,
    /// Terminal; entered when the owning view is disposed.
    Ended,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::Calibrating => "calibrating",
            Phase::Active => "active",
            Phase::Ended => "ended",
        };
        f.write_str(label)
    }
}

/// User-facing actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Calibrate,
    CalibrateAll,
    StartSession,
    EndSession,
    CancelCalibration,
    SelectPose(usize),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    #[error("connection is {0}")]
    NotConnected(ConnectionStatus),
    #[error("not available while {0}")]
    Busy(Phase),
    #[error("no session is running")]
    NotActive,
    #[error("no calibration in progress")]
    NotCalibrating,
    #[error("pose {0} is not in the catalog")]
    UnknownPose(usize),
    #[error("pose catalog is empty")]
    EmptyCatalog,
    #[error("session has been disposed")]
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

/// Work the machine asks its host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(ControlCommand),
    StartTimer { token: TimerToken, after: Duration },
    CancelTimer(TimerToken),
}

/// Which controls are currently available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub calibrate: bool,
    pub calibrate_all: bool,
    pub start_session: bool,
    pub end_session: bool,
    pub cancel_calibration: bool,
    pub select_pose: bool,
}

/// Value published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub connection: ConnectionStatus,
    pub current_pose_index: usize,
    pub current_pose: Option<String>,
    pub countdown: Option<u32>,
    /// Pose whose acknowledgement window is open.
    pub processing: Option<String>,
    /// `(step, of)` during a calibration sweep, 1-based.
    pub sweep_step: Option<(usize, usize)>,
    pub accuracy_percent: f32,
    pub calibrated_poses: BTreeSet<String>,
    pub feedback: Vec<String>,
    pub held_seconds: u32,
    pub hold_complete: bool,
    pub controls: Controls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CalibrationStep {
    Countdown(u32),
    Processing(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionStep {
    Countdown(u32),
    Running { held: u32, complete: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    Idle,
    Calibrating {
        pose: usize,
        remaining: VecDeque<usize>,
        sweep_len: Option<usize>,
        step: CalibrationStep,
    },
    Active {
        step: SessionStep,
        /// Last pose the backend was actually told about.
        sent_pose: Option<usize>,
    },
    Ended,
}

/// Workout phase, countdowns and calibration bookkeeping.
///
/// The machine performs no I/O. Every input returns the [`Effect`]s the host
/// must carry out; sends that fail are reported back via
/// [`SessionMachine::command_failed`].
pub struct SessionMachine {
    catalog: PoseCatalog,
    timing: SessionTiming,
    stage: Stage,
    connection: ConnectionStatus,
    current_pose: usize,
    accuracy: f32,
    accuracy_sequence: Option<u64>,
    calibrated: BTreeSet<String>,
    feedback: Vec<String>,
    /// Pose to fall back to if the pending `changePose` is not delivered.
    revert_to: Option<usize>,
    timer: Option<TimerToken>,
    next_token: u64,
}

impl SessionMachine {
    pub fn new(catalog: PoseCatalog, timing: SessionTiming) -> Self {
        Self {
            catalog,
            timing,
            stage: Stage::Idle,
            connection: ConnectionStatus::Connecting,
            current_pose: 0,
            accuracy: 0.0,
            accuracy_sequence: None,
            calibrated: BTreeSet::new(),
            feedback: Vec::new(),
            revert_to: None,
            timer: None,
            next_token: 0,
        }
    }

    pub fn catalog(&self) -> &PoseCatalog {
        &self.catalog
    }

    pub fn phase(&self) -> Phase {
        match self.stage {
            Stage::Idle => Phase::Idle,
            Stage::Calibrating { .. } => Phase::Calibrating,
            Stage::Active { .. } => Phase::Active,
            Stage::Ended => Phase::Ended,
        }
    }

    pub fn controls(&self) -> Controls {
        let open = self.connection == ConnectionStatus::Open;
        let has_poses = !self.catalog.is_empty();
        let idle = matches!(self.stage, Stage::Idle);
        let select_pose = match &self.stage {
            Stage::Idle => has_poses,
            Stage::Active {
                step: SessionStep::Running { .. },
                ..
            } => open,
            Stage::Active { .. } => true,
            _ => false,
        };
        Controls {
            calibrate: idle && open && has_poses,
            calibrate_all: idle && open && has_poses,
            start_session: idle && open && has_poses,
            end_session: matches!(self.stage, Stage::Active { .. }),
            cancel_calibration: matches!(self.stage, Stage::Calibrating { .. }),
            select_pose,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (countdown, processing, sweep_step) = match &self.stage {
            Stage::Calibrating {
                step,
                sweep_len,
                remaining,
                ..
            } => {
                let sweep_step = sweep_len.map(|len| (len - remaining.len(), len));
                match step {
                    CalibrationStep::Countdown(left) => (Some(*left), None, sweep_step),
                    CalibrationStep::Processing(pose) => (None, Some(pose.clone()), sweep_step),
                }
            }
            Stage::Active {
                step: SessionStep::Countdown(left),
                ..
            } => (Some(*left), None, None),
            _ => (None, None, None),
        };
        let (held_seconds, hold_complete) = match self.stage {
            Stage::Active {
                step: SessionStep::Running { held, complete },
                ..
            } => (held, complete),
            _ => (0, false),
        };
        SessionSnapshot {
            phase: self.phase(),
            connection: self.connection,
            current_pose_index: self.current_pose,
            current_pose: self.catalog.name(self.current_pose).map(str::to_owned),
            countdown,
            processing,
            sweep_step,
            accuracy_percent: self.accuracy,
            calibrated_poses: self.calibrated.clone(),
            feedback: self.feedback.clone(),
            held_seconds,
            hold_complete,
            controls: self.controls(),
        }
    }

    pub fn request(&mut self, control: Control) -> Result<Vec<Effect>, Rejected> {
        if matches!(self.stage, Stage::Ended) {
            return Err(Rejected::Disposed);
        }
        let mut effects = Vec::new();
        match control {
            Control::Calibrate => {
                self.ensure_can_begin()?;
                let countdown = self.timing.calibration_countdown_secs;
                self.stage = Stage::Calibrating {
                    pose: self.current_pose,
                    remaining: VecDeque::new(),
                    sweep_len: None,
                    step: CalibrationStep::Countdown(countdown),
                };
                self.say(format!("Get ready to calibrate {}", self.pose_name(self.current_pose)));
                self.enter_calibration_countdown(countdown, &mut effects);
            }
            Control::CalibrateAll => {
                self.ensure_can_begin()?;
                let countdown = self.timing.sweep_countdown_secs;
                self.stage = Stage::Calibrating {
                    pose: 0,
                    remaining: (1..self.catalog.len()).collect(),
                    sweep_len: Some(self.catalog.len()),
                    step: CalibrationStep::Countdown(countdown),
                };
                self.current_pose = 0;
                self.say(format!("Get ready to calibrate {}", self.pose_name(0)));
                self.enter_calibration_countdown(countdown, &mut effects);
            }
            Control::StartSession => {
                self.ensure_can_begin()?;
                self.accuracy = 0.0;
                self.accuracy_sequence = None;
                let countdown = self.timing.session_countdown_secs;
                self.stage = Stage::Active {
                    step: SessionStep::Countdown(countdown),
                    sent_pose: None,
                };
                if countdown == 0 {
                    self.begin_running(&mut effects);
                } else {
                    self.say(format!("Session starts in {}", countdown));
                    self.arm(TICK, &mut effects);
                }
            }
            Control::EndSession => {
                let Stage::Active { sent_pose, .. } = &self.stage else {
                    return Err(Rejected::NotActive);
                };
                if sent_pose.is_some() && self.connection == ConnectionStatus::Open {
                    effects.push(Effect::Send(ControlCommand::EndSession));
                }
                self.disarm(&mut effects);
                self.stage = Stage::Idle;
                self.accuracy = 0.0;
                self.say("Session ended".to_owned());
                info!("session ended");
            }
            Control::CancelCalibration => {
                if !matches!(self.stage, Stage::Calibrating { .. }) {
                    return Err(Rejected::NotCalibrating);
                }
                self.disarm(&mut effects);
                self.stage = Stage::Idle;
                self.say("Calibration cancelled".to_owned());
            }
            Control::SelectPose(index) => {
                if index >= self.catalog.len() {
                    return Err(Rejected::UnknownPose(index));
                }
                self.select_pose(index, &mut effects)?;
            }
        }
        Ok(effects)
    }

    pub fn on_timer(&mut self, token: TimerToken) -> Vec<Effect> {
        if self.timer != Some(token) {
            debug!("ignoring stale timer {:?}", token);
            return Vec::new();
        }
        self.timer = None;
        let mut effects = Vec::new();
        match &mut self.stage {
            Stage::Calibrating {
                step: CalibrationStep::Countdown(left),
                ..
            } => {
                *left = left.saturating_sub(1);
                let left = *left;
                self.enter_calibration_countdown(left, &mut effects);
            }
            Stage::Calibrating {
                step: CalibrationStep::Processing(_),
                ..
            } => self.finish_calibration_step(&mut effects),
            Stage::Active {
                step: SessionStep::Countdown(left),
                ..
            } => {
                *left = left.saturating_sub(1);
                if *left == 0 {
                    self.begin_running(&mut effects);
                } else {
                    let left = *left;
                    self.say(format!("Session starts in {}", left));
                    self.arm(TICK, &mut effects);
                }
            }
            Stage::Active {
                step: SessionStep::Running { held, complete },
                ..
            } => {
                *held += 1;
                let hold = self
                    .catalog
                    .get(self.current_pose)
                    .map(|pose| pose.hold_duration_seconds)
                    .unwrap_or(0);
                if *held >= hold {
                    *complete = true;
                    let name = self.pose_name(self.current_pose);
                    self.say(format!("Hold complete for {}", name));
                } else {
                    self.arm(TICK, &mut effects);
                }
            }
            Stage::Idle | Stage::Ended => {}
        }
        effects
    }

    pub fn on_frame(&mut self, frame: &LandmarkFrame) {
        if matches!(self.stage, Stage::Ended) {
            return;
        }
        if !frame.feedback.is_empty() {
            self.feedback = frame.feedback.clone();
        }

        if let Some(success) = frame.calibration_success {
            match &self.stage {
                Stage::Calibrating {
                    step: CalibrationStep::Processing(pose),
                    ..
                } => {
                    let pose = pose.clone();
                    if success {
                        info!("calibration acknowledged for {}", pose);
                        self.calibrated.insert(pose.clone());
                        self.say(format!("{} calibrated", pose));
                    } else if frame.feedback.is_empty() {
                        self.say(format!("Calibration failed for {}", pose));
                    }
                }
                _ => debug!("calibration acknowledgement outside its window ignored"),
            }
        }

        if let (Some(accuracy), Stage::Active { step: SessionStep::Running { .. }, .. }) =
            (frame.accuracy, &self.stage)
        {
            let newer = self
                .accuracy_sequence
                .map_or(true, |last| frame.sequence >= last);
            if newer {
                self.accuracy = accuracy.clamp(0.0, 100.0);
                self.accuracy_sequence = Some(frame.sequence);
            }
        }
    }

    pub fn on_connection(&mut self, status: ConnectionStatus) -> Vec<Effect> {
        let previous = self.connection;
        self.connection = status;
        let mut effects = Vec::new();
        if previous == ConnectionStatus::Open && status != ConnectionStatus::Open {
            if let Stage::Active {
                sent_pose: Some(_), ..
            } = self.stage
            {
                self.disarm(&mut effects);
                self.stage = Stage::Idle;
                self.accuracy = 0.0;
                self.say("Connection lost; session ended".to_owned());
            }
        }
        effects
    }

    /// Rolls back after the host could not deliver `command`.
    pub fn command_failed(&mut self, command: &ControlCommand) -> Vec<Effect> {
        let mut effects = Vec::new();
        match command {
            ControlCommand::Calibrate { pose } => {
                if matches!(self.stage, Stage::Calibrating { .. }) {
                    self.disarm(&mut effects);
                    self.stage = Stage::Idle;
                    self.say(format!("Could not calibrate {}: backend unreachable", pose));
                }
            }
            ControlCommand::StartSession { .. } => {
                if matches!(self.stage, Stage::Active { .. }) {
                    self.disarm(&mut effects);
                    self.stage = Stage::Idle;
                    self.say("Could not start session: backend unreachable".to_owned());
                }
            }
            ControlCommand::ChangePose { .. } => {
                let previous = self.revert_to.take();
                if let (Some(previous), Stage::Active { sent_pose, .. }) =
                    (previous, &mut self.stage)
                {
                    *sent_pose = Some(previous);
                    self.current_pose = previous;
                    self.feedback = vec!["Could not change pose: backend unreachable".to_owned()];
                }
            }
            ControlCommand::EndSession => {}
        }
        effects
    }

    pub fn dispose(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Stage::Active {
            sent_pose: Some(_), ..
        } = self.stage
        {
            if self.connection == ConnectionStatus::Open {
                effects.push(Effect::Send(ControlCommand::EndSession));
            }
        }
        self.disarm(&mut effects);
        self.stage = Stage::Ended;
        effects
    }

    fn ensure_can_begin(&self) -> Result<(), Rejected> {
        match self.stage {
            Stage::Idle => {}
            Stage::Ended => return Err(Rejected::Disposed),
            _ => return Err(Rejected::Busy(self.phase())),
        }
        if self.catalog.is_empty() {
            return Err(Rejected::EmptyCatalog);
        }
        if self.connection != ConnectionStatus::Open {
            return Err(Rejected::NotConnected(self.connection));
        }
        Ok(())
    }

    fn select_pose(&mut self, index: usize, effects: &mut Vec<Effect>) -> Result<(), Rejected> {
        let phase = self.phase();
        match &mut self.stage {
            Stage::Idle => {}
            Stage::Calibrating { .. } | Stage::Ended => return Err(Rejected::Busy(phase)),
            Stage::Active {
                step: SessionStep::Countdown(_),
                ..
            } => {}
            Stage::Active {
                step: SessionStep::Running { held, complete },
                sent_pose,
            } => {
                if index == self.current_pose {
                    return Ok(());
                }
                if self.connection != ConnectionStatus::Open {
                    return Err(Rejected::NotConnected(self.connection));
                }
                let pose = self.catalog.name(index).unwrap_or_default().to_owned();
                *held = 0;
                *complete = false;
                *sent_pose = Some(index);
                self.revert_to = Some(self.current_pose);
                self.accuracy = 0.0;
                self.accuracy_sequence = None;
                effects.push(Effect::Send(ControlCommand::ChangePose { pose: pose.clone() }));
                self.disarm(effects);
                self.arm(TICK, effects);
                self.say(format!("Switched to {}", pose));
            }
        }
        self.current_pose = index;
        Ok(())
    }

    fn enter_calibration_countdown(&mut self, left: u32, effects: &mut Vec<Effect>) {
        if left > 0 {
            self.arm(TICK, effects);
            return;
        }
        let Stage::Calibrating { pose, step, .. } = &mut self.stage else {
            return;
        };
        let name = self.catalog.name(*pose).unwrap_or_default().to_owned();
        *step = CalibrationStep::Processing(name.clone());
        effects.push(Effect::Send(ControlCommand::Calibrate { pose: name.clone() }));
        self.say(format!("Calibrating {}...", name));
        let grace = self.timing.processing_grace();
        self.arm(grace, effects);
    }

    fn finish_calibration_step(&mut self, effects: &mut Vec<Effect>) {
        let Stage::Calibrating {
            pose,
            remaining,
            sweep_len,
            step,
        } = &mut self.stage
        else {
            return;
        };
        if let Some(next) = remaining.pop_front() {
            *pose = next;
            let countdown = self.timing.sweep_countdown_secs;
            *step = CalibrationStep::Countdown(countdown);
            self.current_pose = next;
            self.say(format!("Get ready to calibrate {}", self.pose_name(next)));
            self.enter_calibration_countdown(countdown, effects);
            return;
        }
        let sweep_len = *sweep_len;
        self.stage = Stage::Idle;
        if let Some(total) = sweep_len {
            let done = self
                .catalog
                .iter()
                .filter(|entry| self.calibrated.contains(&entry.name))
                .count();
            self.say(format!("Calibration complete: {} of {} poses", done, total));
        }
    }

    fn begin_running(&mut self, effects: &mut Vec<Effect>) {
        let name = self.pose_name(self.current_pose);
        self.stage = Stage::Active {
            step: SessionStep::Running {
                held: 0,
                complete: false,
            },
            sent_pose: Some(self.current_pose),
        };
        effects.push(Effect::Send(ControlCommand::StartSession { pose: name.clone() }));
        self.say(format!("Session started: {}", name));
        info!("session started for {}", name);
        self.arm(TICK, effects);
    }

    fn arm(&mut self, after: Duration, effects: &mut Vec<Effect>) {
        self.disarm(effects);
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.timer = Some(token);
        effects.push(Effect::StartTimer { token, after });
    }

    fn disarm(&mut self, effects: &mut Vec<Effect>) {
        if let Some(token) = self.timer.take() {
            effects.push(Effect::CancelTimer(token));
        }
    }

    fn pose_name(&self, index: usize) -> String {
        self.catalog.name(index).unwrap_or_default().to_owned()
    }

    fn say(&mut self, line: String) {
        self.feedback = vec![line];
    }
}
