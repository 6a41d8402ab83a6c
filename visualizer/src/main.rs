use anyhow::Context;
use clap::Parser;
use iced::{
    mouse, time,
    widget::{
        button,
        canvas::{self, Canvas, Frame, Geometry},
        column, progress_bar, row, scrollable, text, Column, Container,
    },
    Alignment, Color, Element, Length, Point, Rectangle, Renderer, Subscription, Task, Theme,
};
use log::{info, warn};
use posecore::capture::TestPattern;
use posecore::connection::{Connector, WebSocketConnector};
use posecore::geometry::{ResizeEvent, Size};
use posecore::overlay::Scene;
use posecore::protocol::LandmarkMap;
use posecore::session::{Control, Phase, PoseCatalog, SessionSnapshot};
use posecore::{Workout, WorkoutConfig};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use surface::FrameSurface;
use tokio::runtime::{Handle, Runtime};

mod surface;

#[derive(Parser)]
#[command(author, version, about = "Alignify desktop client")]
struct Args {
    /// Load a workout config from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    /// Backend WebSocket endpoint, e.g. ws://127.0.0.1:5000/ws
    #[arg(long)]
    endpoint: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => WorkoutConfig::load(path)?,
        None => WorkoutConfig::default(),
    };
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    config.validate().context("validating workout config")?;

    // Connection, session and capture tasks live here; iced only drives the view.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;
    let handle = runtime.handle().clone();
    let connector: Arc<dyn Connector> = Arc::new(
        WebSocketConnector::new(config.endpoint.clone()).context("creating connector")?,
    );
    let slot = WorkoutSlot::default();
    let boot_slot = Arc::clone(&slot);

    let outcome = iced::application(
        move || Visualizer::boot(&config, Arc::clone(&connector), &handle, &boot_slot),
        Visualizer::update,
        Visualizer::view,
    )
    .title(application_title)
    .subscription(application_subscription)
    .theme(application_theme)
    .run();

    // The runtime must still be running for the close frame to go out.
    release(&slot, &runtime);
    outcome.context("running visualizer")?;
    Ok(())
}

/// Shared with `main` so the workout can be shut down after the window closes.
type WorkoutSlot = Arc<Mutex<Option<Arc<Workout>>>>;

fn release(slot: &WorkoutSlot, runtime: &Runtime) {
    let Some(shared) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() else {
        return;
    };
    match Arc::try_unwrap(shared) {
        Ok(workout) => runtime.block_on(workout.shutdown()),
        Err(shared) => {
            warn!("view state outlived the window, closing the connection only");
            runtime.block_on(shared.channel().close());
        }
    }
}

fn application_title(_: &Visualizer) -> String {
    "Alignify".into()
}

fn application_subscription(state: &Visualizer) -> Subscription<Message> {
    time::every(state.refresh).map(|_| Message::Tick)
}

fn application_theme(_: &Visualizer) -> Theme {
    Theme::Dark
}

struct Visualizer {
    workout: Arc<Workout>,
    catalog: PoseCatalog,
    http_base: Option<String>,
    video: Size,
    refresh: Duration,
    snapshot: SessionSnapshot,
    scene: Arc<Scene>,
    status: String,
    history: Vec<String>,
}

#[derive(Debug, Clone)]
enum Message {
    Tick,
    Request(Control),
    Requested(Control, Result<(), String>),
    ReferenceFetched(String, Result<Option<LandmarkMap>, String>),
}

impl Visualizer {
    fn boot(
        config: &WorkoutConfig,
        connector: Arc<dyn Connector>,
        runtime: &Handle,
        slot: &WorkoutSlot,
    ) -> (Self, Task<Message>) {
        let video = Size::new(config.capture.width as f32, config.capture.height as f32);
        let _guard = runtime.enter();
        let workout = Arc::new(Workout::start(
            config,
            connector,
            TestPattern::new(config.capture.width, config.capture.height),
        ));
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&workout));
        workout.resize(ResizeEvent::ViewportResized(video));
        let snapshot = workout.snapshot();
        let scene = workout.latest_scene();

        (
            Visualizer {
                catalog: config.catalog(),
                http_base: http_base(&config.endpoint),
                video,
                refresh: config.render.period().max(Duration::from_millis(16)),
                snapshot,
                scene,
                status: format!("Connecting to {}...", config.endpoint),
                history: Vec::new(),
                workout,
            },
            Task::none(),
        )
    }

    fn update(state: &mut Self, message: Message) -> Task<Message> {
        match message {
            Message::Tick => {
                state.snapshot = state.workout.snapshot();
                state.scene = state.workout.latest_scene();
                let status = state
                    .workout
                    .status_line()
                    .unwrap_or_else(|| format!("Connection {}", state.snapshot.connection));
                if status != state.status {
                    state.push_history(status.clone());
                    state.status = status;
                }
                Task::none()
            }
            Message::Request(control) => {
                let session = state.workout.session();
                Task::perform(
                    async move { session.request(control).await.map_err(|e| e.to_string()) },
                    move |result| Message::Requested(control, result),
                )
            }
            Message::Requested(Control::SelectPose(index), Ok(())) => {
                let (Some(base), Some(pose)) = (state.http_base.clone(), state.catalog.name(index))
                else {
                    return Task::none();
                };
                let pose = pose.to_owned();
                Task::perform(fetch_reference(base, pose.clone()), move |result| {
                    Message::ReferenceFetched(pose.clone(), result)
                })
            }
            Message::Requested(_, Ok(())) => Task::none(),
            Message::Requested(control, Err(err)) => {
                state.push_history(format!("{control:?} rejected: {err}"));
                Task::none()
            }
            Message::ReferenceFetched(pose, Ok(reference)) => {
                if reference.is_some() {
                    state.push_history(format!("Reference loaded for {pose}"));
                }
                state.workout.set_reference(reference);
                Task::none()
            }
            Message::ReferenceFetched(pose, Err(err)) => {
                warn!("reference for {} unavailable: {}", pose, err);
                Task::none()
            }
        }
    }

    fn view(state: &Self) -> Element<'_, Message> {
        let snapshot = &state.snapshot;
        let controls = snapshot.controls;
        let action = |label: &'static str, enabled: bool, control: Control| {
            button(label)
                .on_press_maybe(enabled.then_some(Message::Request(control)))
                .padding(8)
        };

        let pose_list = state.catalog.iter().enumerate().fold(
            Column::new().spacing(4),
            |col, (index, pose)| {
                let marker = if index == snapshot.current_pose_index { "> " } else { "  " };
                let badge = if snapshot.calibrated_poses.contains(&pose.name) {
                    " [calibrated]"
                } else {
                    ""
                };
                col.push(
                    button(text(format!("{marker}{}{badge}", pose.name)).size(14))
                        .on_press_maybe(
                            controls
                                .select_pose
                                .then_some(Message::Request(Control::SelectPose(index))),
                        )
                        .width(Length::Fill),
                )
            },
        );

        let phase_line = match (snapshot.phase, snapshot.countdown, &snapshot.processing) {
            (_, Some(left), _) => format!("{} - {}s", snapshot.phase, left),
            (_, None, Some(pose)) => format!("Processing {pose}..."),
            (Phase::Active, None, None) => format!(
                "Holding {}s{}",
                snapshot.held_seconds,
                if snapshot.hold_complete { " (complete)" } else { "" }
            ),
            (phase, None, None) => phase.to_string(),
        };
        let sweep_line = snapshot
            .sweep_step
            .map(|(step, of)| format!("Calibrating pose {step} of {of}"))
            .unwrap_or_default();

        let feedback = if snapshot.feedback.is_empty() {
            Column::new().push(text("No feedback yet").size(14))
        } else {
            snapshot
                .feedback
                .iter()
                .fold(Column::new().spacing(4), |col, line| {
                    col.push(text(line.clone()).size(14))
                })
        };

        let control_column = column![
            text("Session").size(26),
            text(format!("Connection: {}", snapshot.connection)).size(14),
            text(phase_line).size(18),
            text(sweep_line).size(14),
            row![
                action("Calibrate", controls.calibrate, Control::Calibrate),
                action("Calibrate all", controls.calibrate_all, Control::CalibrateAll),
                action("Cancel", controls.cancel_calibration, Control::CancelCalibration),
            ]
            .spacing(6),
            row![
                action("Start session", controls.start_session, Control::StartSession),
                action("End session", controls.end_session, Control::EndSession),
            ]
            .spacing(6),
            text("Poses").size(18),
            pose_list,
            text(format!("Accuracy {:.0}%", snapshot.accuracy_percent)).size(16),
            progress_bar(0.0..=100.0, snapshot.accuracy_percent),
            text("Feedback").size(18),
            feedback,
        ]
        .spacing(10)
        .padding(16)
        .width(Length::Fixed(360.0));

        let metrics = state.workout.metrics();
        let history_list = if state.history.is_empty() {
            Column::new().push(text("No activity yet").size(12))
        } else {
            state
                .history
                .iter()
                .rev()
                .fold(Column::new().spacing(4), |col, entry| {
                    col.push(text(entry.clone()).size(12))
                })
        };

        let overlay = Canvas::new(OverlayView {
            scene: Arc::clone(&state.scene),
        })
        .width(Length::Fixed(state.video.width))
        .height(Length::Fixed(state.video.height));

        let video_column = column![
            text("Live view").size(26),
            overlay,
            text(&state.status).size(14),
            text(format!(
                "Frames sent {} / dropped {} | received {} | reconnects {}",
                metrics.frames_sent,
                metrics.frames_dropped,
                metrics.frames_received,
                metrics.reconnects_scheduled
            ))
            .size(12),
            text("Activity log").size(16),
            Container::new(scrollable(history_list).height(Length::Fixed(120.0))).padding(6),
        ]
        .spacing(10)
        .padding(16)
        .width(Length::Fill);

        let layout = row![control_column, video_column]
            .spacing(20)
            .align_y(Alignment::Start)
            .padding(20);

        Container::new(layout)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn push_history(&mut self, entry: String) {
        info!("{}", entry);
        self.history.push(entry);
        if self.history.len() > 20 {
            self.history.remove(0);
        }
    }
}

/// `ws://host:port/ws` becomes `http://host:port`.
fn http_base(endpoint: &str) -> Option<String> {
    let (scheme, rest) = endpoint.split_once("://")?;
    let scheme = match scheme {
        "ws" => "http",
        "wss" => "https",
        _ => return None,
    };
    let authority = rest.split('/').next().filter(|host| !host.is_empty())?;
    Some(format!("{scheme}://{authority}"))
}

fn calibration_url(base: &str, pose: &str) -> String {
    format!("{base}/calibration/{}", urlencoding::encode(pose))
}

/// `Ok(None)` when the backend has no stored calibration for the pose.
async fn fetch_reference(base: String, pose: String) -> Result<Option<LandmarkMap>, String> {
    let response = reqwest::get(calibration_url(&base, &pose))
        .await
        .map_err(|e| e.to_string())?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let response = response.error_for_status().map_err(|e| e.to_string())?;
    response
        .json::<LandmarkMap>()
        .await
        .map(Some)
        .map_err(|e| e.to_string())
}

struct OverlayView {
    scene: Arc<Scene>,
}

impl canvas::Program<Message> for OverlayView {
    type State = ();

    fn draw(
        &self,
        _state: &Self::State,
        renderer: &Renderer,
        _theme: &Theme,
        bounds: Rectangle,
        _cursor: mouse::Cursor,
    ) -> Vec<Geometry> {
        let mut frame = Frame::new(renderer, bounds.size());
        frame.fill_rectangle(
            Point::ORIGIN,
            bounds.size(),
            Color::from_rgb(0.05, 0.05, 0.07),
        );
        FrameSurface::paint(&mut frame, &self.scene);
        vec![frame.into_geometry()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use posecore::connection::{CloseInfo, ConnectError, Link, LinkCommand, LinkEvent};
    use posecore::{ConnectionStatus, PoseChannel};
    use tokio::sync::mpsc;

    struct Peer {
        written: mpsc::UnboundedReceiver<LinkCommand>,
        _events: mpsc::UnboundedSender<LinkEvent>,
    }

    struct LoopbackConnector {
        peer: Mutex<Option<mpsc::UnboundedSender<Peer>>>,
    }

    impl Connector for LoopbackConnector {
        fn endpoint(&self) -> &str {
            "ws://loopback/ws"
        }

        fn connect(&self) -> BoxFuture<'static, Result<Link, ConnectError>> {
            let peer = self.peer.lock().unwrap().take();
            Box::pin(async move {
                let Some(peer) = peer else {
                    return Err(ConnectError::Handshake {
                        endpoint: "ws://loopback/ws".into(),
                        reason: "already used".into(),
                    });
                };
                let (link, written, events) = Link::pair();
                peer.send(Peer {
                    written,
                    _events: events,
                })
                .unwrap();
                Ok(link)
            })
        }
    }

    fn boot_connected(runtime: &Runtime, slot: &WorkoutSlot) -> (Visualizer, Peer) {
        let (peers_tx, mut peers) = mpsc::unbounded_channel();
        let connector: Arc<dyn Connector> = Arc::new(LoopbackConnector {
            peer: Mutex::new(Some(peers_tx)),
        });
        let mut config = WorkoutConfig::default();
        config.endpoint = "ws://loopback/ws".into();
        config.capture.width = 32;
        config.capture.height = 24;

        let (state, _task) = Visualizer::boot(&config, connector, runtime.handle(), slot);
        let peer = runtime.block_on(async {
            let peer = peers.recv().await.unwrap();
            let mut status = state.workout.channel().subscribe_state();
            status
                .wait_for(|state| state.status == ConnectionStatus::Open)
                .await
                .unwrap();
            peer
        });
        (state, peer)
    }

    fn saw_normal_close(peer: &mut Peer) -> bool {
        let mut saw_close = false;
        while let Ok(command) = peer.written.try_recv() {
            if command == LinkCommand::Close(CloseInfo::normal("client disposed")) {
                saw_close = true;
            }
        }
        saw_close
    }

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn releasing_after_the_window_closes_sends_a_normal_close() {
        let runtime = runtime();
        let slot = WorkoutSlot::default();
        let (state, mut peer) = boot_connected(&runtime, &slot);

        // iced drops the view state before `run` returns.
        drop(state);
        release(&slot, &runtime);
        drop(runtime);

        assert!(slot.lock().unwrap().is_none());
        assert!(saw_normal_close(&mut peer));
    }

    #[test]
    fn release_closes_the_connection_while_the_view_is_still_alive() {
        let runtime = runtime();
        let slot = WorkoutSlot::default();
        let (state, mut peer) = boot_connected(&runtime, &slot);

        release(&slot, &runtime);

        assert!(saw_normal_close(&mut peer));
        assert_eq!(
            state.workout.channel().state().status,
            ConnectionStatus::Closed
        );
    }

    #[test]
    fn http_base_follows_the_websocket_endpoint() {
        assert_eq!(
            http_base("ws://127.0.0.1:5000/ws").as_deref(),
            Some("http://127.0.0.1:5000")
        );
        assert_eq!(
            http_base("wss://pose.example.com/ws").as_deref(),
            Some("https://pose.example.com")
        );
        assert_eq!(http_base("http://127.0.0.1:5000"), None);
        assert_eq!(http_base("ws:///ws"), None);
    }

    #[test]
    fn calibration_urls_escape_pose_names() {
        assert_eq!(
            calibration_url("http://127.0.0.1:5000", "Warrior I"),
            "http://127.0.0.1:5000/calibration/Warrior%20I"
        );
    }
}
