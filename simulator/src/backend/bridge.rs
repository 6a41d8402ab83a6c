use crate::backend::model::ClientSession;
use crate::generator::profile::LandmarkGenerator;
use crate::workflow::config::BackendConfig;
use anyhow::Context;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use posecore::capture::decode_data_url;
use posecore::protocol::{ClientMessage, ControlCommand, Feedback, LandmarkMap, ServerMessage};
use serde_json::json;
use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use warp::http::StatusCode;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

/// Shared state of the mock pose backend.
pub struct BackendState {
    config: BackendConfig,
    landmarks: RwLock<LandmarkMap>,
    calibrations: RwLock<HashMap<String, LandmarkMap>>,
    images_received: AtomicUsize,
}

impl BackendState {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            landmarks: RwLock::new(LandmarkMap::new()),
            calibrations: RwLock::new(HashMap::new()),
            images_received: AtomicUsize::new(0),
        }
    }

    pub fn landmarks(&self) -> LandmarkMap {
        self.landmarks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_landmarks(&self, landmarks: LandmarkMap) {
        *self.landmarks.write().unwrap_or_else(PoisonError::into_inner) = landmarks;
    }

    pub fn calibration(&self, pose: &str) -> Option<LandmarkMap> {
        self.calibrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pose)
            .cloned()
    }

    pub fn store_calibration(&self, pose: &str, landmarks: LandmarkMap) {
        self.calibrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pose.to_owned(), landmarks);
    }

    pub fn images_received(&self) -> usize {
        self.images_received.load(Ordering::Relaxed)
    }

    fn periodic_update(&self, session: &mut ClientSession) -> ServerMessage {
        let landmarks = self.landmarks();
        let calibrations = self.calibrations.read().unwrap_or_else(PoisonError::into_inner);
        session.periodic_update(
            &landmarks,
            &calibrations,
            Instant::now().into_std(),
            self.config.feedback_interval(),
        )
    }

    fn handle_text(
        &self,
        text: &str,
        session: &mut ClientSession,
        deferred: &mpsc::UnboundedSender<String>,
    ) -> Option<ServerMessage> {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                warn!("ignoring invalid JSON from client: {}", err);
                return None;
            }
        };
        match message {
            ClientMessage::Frame { image } => {
                session.images_received += 1;
                self.images_received.fetch_add(1, Ordering::Relaxed);
                match decode_data_url(&image) {
                    Some(bytes) => debug!("received frame of {} bytes", bytes.len()),
                    None => warn!("received a frame that is not a base64 data URL"),
                }
                None
            }
            ClientMessage::Control(command) => self.handle_control(command, session, deferred),
        }
    }

    fn handle_control(
        &self,
        command: ControlCommand,
        session: &mut ClientSession,
        deferred: &mpsc::UnboundedSender<String>,
    ) -> Option<ServerMessage> {
        info!("client action {:?}", command);
        match command {
            ControlCommand::Calibrate { pose } => {
                let delay = self.config.calibration_delay();
                let deferred = deferred.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = deferred.send(pose);
                });
                None
            }
            ControlCommand::StartSession { pose } => {
                session.start(&pose, Instant::now().into_std());
                Some(ServerMessage {
                    message: Some(format!("Started session for {pose}")),
                    landmarks: Some(self.landmarks()),
                    feedback: Some(Feedback::Line(format!(
                        "Begin {pose}. Adjust your position to match the reference."
                    ))),
                    reference_landmarks: self.calibration(&pose),
                    ..Default::default()
                })
            }
            ControlCommand::EndSession => {
                session.end();
                Some(ServerMessage {
                    message: Some("Session ended".into()),
                    landmarks: Some(self.landmarks()),
                    feedback: Some(Feedback::Line("Session complete. Great work!".into())),
                    ..Default::default()
                })
            }
            ControlCommand::ChangePose { pose } => {
                session.change_pose(&pose);
                Some(ServerMessage {
                    message: Some(format!("Changed pose to {pose}")),
                    landmarks: Some(self.landmarks()),
                    feedback: Some(Feedback::Line(format!(
                        "Transitioning to {pose}. Find your balance and alignment."
                    ))),
                    reference_landmarks: self.calibration(&pose),
                    ..Default::default()
                })
            }
        }
    }

    /// Stores the landmarks current at the end of the calibration delay.
    fn complete_calibration(&self, pose: &str, session: &mut ClientSession) -> ServerMessage {
        let landmarks = self.landmarks();
        if landmarks.is_empty() {
            warn!("calibration of {} failed: no landmarks", pose);
            return ServerMessage {
                message: Some(format!("Failed to calibrate {pose}. No landmarks detected.")),
                landmarks: Some(LandmarkMap::new()),
                calibration_success: Some(false),
                feedback: Some(Feedback::Line(
                    "Please ensure you are visible in the camera".into(),
                )),
                ..Default::default()
            };
        }
        self.store_calibration(pose, landmarks.clone());
        session.calibrated_poses.insert(pose.to_owned());
        info!("calibrated {}", pose);
        ServerMessage {
            message: Some(format!("Calibrated pose: {pose}")),
            landmarks: Some(landmarks),
            calibration_success: Some(true),
            ..Default::default()
        }
    }
}

fn decode_pose(raw: String) -> String {
    match urlencoding::decode(&raw) {
        Ok(Cow::Owned(decoded)) => decoded,
        Ok(Cow::Borrowed(_)) | Err(_) => raw,
    }
}

pub fn routes(
    state: Arc<BackendState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let state_filter = warp::any().map(move || state.clone());

    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(state_filter.clone())
        .map(|ws: Ws, state: Arc<BackendState>| {
            ws.on_upgrade(move |socket| client_loop(socket, state))
        });

    let get_route = warp::path!("calibration" / String)
        .and(warp::get())
        .and(state_filter.clone())
        .map(|pose: String, state: Arc<BackendState>| {
            let pose = decode_pose(pose);
            match state.calibration(&pose) {
                Some(landmarks) => {
                    warp::reply::with_status(warp::reply::json(&landmarks), StatusCode::OK)
                }
                None => warp::reply::with_status(
                    warp::reply::json(&json!({"error": "Calibration data not found"})),
                    StatusCode::NOT_FOUND,
                ),
            }
        });

    let post_route = warp::path!("calibration" / String)
        .and(warp::post())
        .and(warp::body::json())
        .and(state_filter)
        .map(|pose: String, landmarks: LandmarkMap, state: Arc<BackendState>| {
            let pose = decode_pose(pose);
            state.store_calibration(&pose, landmarks);
            warp::reply::json(&json!({"message": format!("Calibration data saved for {pose}")}))
        });

    ws_route.or(get_route).or(post_route)
}

async fn client_loop(socket: WebSocket, state: Arc<BackendState>) {
    info!("client connected");
    let (mut sink, mut stream) = socket.split();
    let (deferred_tx, mut deferred_rx) = mpsc::unbounded_channel::<String>();
    let mut session = ClientSession::default();
    let mut ticker = tokio::time::interval(state.config.update_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let outgoing = tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(message)) if message.is_close() => break,
                Some(Ok(message)) => match message.to_str() {
                    Ok(text) => state.handle_text(text, &mut session, &deferred_tx),
                    Err(()) => None,
                },
                Some(Err(err)) => {
                    warn!("client socket error: {}", err);
                    break;
                }
                None => break,
            },
            Some(pose) = deferred_rx.recv() => Some(state.complete_calibration(&pose, &mut session)),
            _ = ticker.tick() => Some(state.periodic_update(&mut session)),
        };
        let Some(message) = outgoing else { continue };
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to encode reply: {}", err);
                continue;
            }
        };
        if sink.send(Message::text(text)).await.is_err() {
            break;
        }
    }
    info!(
        "client disconnected after {} frames; calibrated {:?}",
        session.images_received, session.calibrated_poses
    );
}

/// Replaces the shared landmarks at the configured rate until the backend
/// shuts down.
async fn generate(state: Arc<BackendState>, mut generator: LandmarkGenerator) {
    let mut ticker = tokio::time::interval(state.config.update_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        state.set_landmarks(generator.next_frame());
    }
}

/// A running backend. Dropping it without [`BackendHandle::shutdown`] leaves
/// the server running until the runtime stops.
pub struct BackendHandle {
    pub addr: SocketAddr,
    pub state: Arc<BackendState>,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
    generator: JoinHandle<()>,
}

impl BackendHandle {
    pub fn endpoint(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        self.generator.abort();
        if let Err(err) = self.server.await {
            warn!("backend server task failed: {}", err);
        }
    }
}

/// Binds the backend and starts the landmark generator.
pub fn serve(config: BackendConfig) -> anyhow::Result<BackendHandle> {
    let bind = config.bind;
    let mut generator = LandmarkGenerator::new(config.generator.clone());
    let state = Arc::new(BackendState::new(config));
    state.set_landmarks(generator.next_frame());
    let (shutdown, signal) = oneshot::channel::<()>();
    let (addr, server) = warp::serve(routes(state.clone()))
        .try_bind_with_graceful_shutdown(bind, async move {
            let _ = signal.await;
        })
        .with_context(|| format!("binding mock backend to {bind}"))?;
    info!("mock backend listening on {}", addr);
    let server = tokio::spawn(server);
    let generator = tokio::spawn(generate(state.clone(), generator));
    Ok(BackendHandle {
        addr,
        state,
        shutdown,
        server,
        generator,
    })
}
