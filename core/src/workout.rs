use crate::capture::{CaptureLoop, FrameSource};
use crate::config::WorkoutConfig;
use crate::connection::{ConnectionClient, Connector};
use crate::geometry::{ResizeEvent, ViewGeometry};
use crate::overlay::{OverlayRenderer, RenderLoop, RenderSources, Scene};
use crate::prelude::PoseChannel;
use crate::protocol::{LandmarkFrame, LandmarkMap};
use crate::session::{SessionHandle, SessionMachine, SessionRuntime, SessionSnapshot};
use crate::telemetry::{MetricsRecorder, MetricsSnapshot, StatusLog};
use log::info;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// One mounted workout view: connection, session actor, capture and render
/// loops. Each part cancels itself on drop; [`Workout::shutdown`] also waits
/// for the socket to be released.
pub struct Workout {
    client: Arc<ConnectionClient>,
    session: SessionRuntime,
    capture: CaptureLoop,
    render: RenderLoop,
    geometry: Arc<watch::Sender<ViewGeometry>>,
    reference: watch::Sender<Option<LandmarkMap>>,
    metrics: Arc<MetricsRecorder>,
    status: Arc<StatusLog>,
    token: CancellationToken,
}

impl Workout {
    /// Must be called inside a tokio runtime.
    pub fn start<S: FrameSource>(
        config: &WorkoutConfig,
        connector: Arc<dyn Connector>,
        source: S,
    ) -> Self {
        let token = CancellationToken::new();
        let metrics = Arc::new(MetricsRecorder::new());
        let status = Arc::new(StatusLog::new());

        let (client, inbound) = ConnectionClient::spawn_with(
            connector,
            config.reconnect,
            Arc::clone(&metrics),
            Arc::clone(&status),
            token.child_token(),
        );
        let client = Arc::new(client);

        let machine = SessionMachine::new(config.catalog(), config.session);
        let session = SessionRuntime::spawn(
            machine,
            Arc::clone(&client),
            inbound,
            token.child_token(),
        );

        let (geometry, geometry_rx) = watch::channel(ViewGeometry::default());
        let geometry = Arc::new(geometry);
        let (reference, reference_rx) = watch::channel(None);
        let render = RenderLoop::spawn(
            OverlayRenderer::default(),
            RenderSources {
                frames: client.subscribe_frames(),
                geometry: geometry_rx,
                reference: reference_rx,
            },
            config.render.period(),
            Arc::clone(&metrics),
            token.child_token(),
        );

        let capture = CaptureLoop::spawn(
            source,
            Arc::clone(&client),
            config.capture,
            Arc::clone(&geometry),
            Arc::clone(&metrics),
            Arc::clone(&status),
            token.child_token(),
        );

        info!("workout started against {}", client.endpoint());
        Self {
            client,
            session,
            capture,
            render,
            geometry,
            reference,
            metrics,
            status,
            token,
        }
    }

    pub fn session(&self) -> SessionHandle {
        self.session.handle()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn channel(&self) -> Arc<ConnectionClient> {
        Arc::clone(&self.client)
    }

    pub fn last_frame(&self) -> Option<Arc<LandmarkFrame>> {
        self.client.last_frame()
    }

    pub fn resize(&self, event: ResizeEvent) -> bool {
        self.geometry.send_if_modified(|geometry| geometry.apply(event))
    }

    pub fn geometry(&self) -> ViewGeometry {
        *self.geometry.borrow()
    }

    /// Overrides the reference skeleton pushed by the backend.
    pub fn set_reference(&self, reference: Option<LandmarkMap>) {
        self.reference.send_replace(reference);
    }

    pub fn scenes(&self) -> watch::Receiver<Arc<Scene>> {
        self.render.subscribe()
    }

    pub fn latest_scene(&self) -> Arc<Scene> {
        self.render.latest()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn status_line(&self) -> Option<String> {
        self.status.latest()
    }

    /// Ends the session, stops both loops and closes the socket with 1000.
    pub async fn shutdown(self) {
        let Workout {
            client,
            session,
            capture,
            render,
            token,
            ..
        } = self;
        session.join().await;
        capture.join().await;
        render.join().await;
        client.close().await;
        token.cancel();
        info!("workout shut down");
    }
}
