use crate::geometry::ViewGeometry;
use crate::overlay::renderer::{OverlayRenderer, RenderOutcome};
use crate::overlay::surface::{Scene, Surface};
use crate::protocol::{LandmarkFrame, LandmarkMap};
use crate::telemetry::MetricsRecorder;
use log::{debug, trace};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Inputs the render loop samples on every tick.
pub struct RenderSources {
    pub frames: watch::Receiver<Option<Arc<LandmarkFrame>>>,
    pub geometry: watch::Receiver<ViewGeometry>,
    pub reference: watch::Receiver<Option<LandmarkMap>>,
}

/// Redraws the most recent frame at display rate, independent of how often
/// the backend delivers frames, and publishes the result as a [`Scene`].
pub struct RenderLoop {
    scenes: watch::Receiver<Arc<Scene>>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RenderLoop {
    pub fn spawn(
        renderer: OverlayRenderer,
        sources: RenderSources,
        period: Duration,
        metrics: Arc<MetricsRecorder>,
        token: CancellationToken,
    ) -> Self {
        let (scene_tx, scenes) = watch::channel(Arc::new(Scene::default()));
        let handle = tokio::spawn(run(
            renderer,
            sources,
            period.max(Duration::from_millis(1)),
            metrics,
            scene_tx,
            token.clone(),
        ));
        Self {
            scenes,
            token,
            handle: Some(handle),
        }
    }

    pub fn latest(&self) -> Arc<Scene> {
        self.scenes.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Scene>> {
        self.scenes.clone()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    renderer: OverlayRenderer,
    sources: RenderSources,
    period: Duration,
    metrics: Arc<MetricsRecorder>,
    scene_tx: watch::Sender<Arc<Scene>>,
    token: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Reference skeleton most recently pushed by the backend.
    let mut pushed_reference: Option<LandmarkMap> = None;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if token.is_cancelled() {
            break;
        }

        let geometry = *sources.geometry.borrow();
        let frame = sources.frames.borrow().clone();
        if let Some(pushed) = frame.as_ref().and_then(|frame| frame.reference.as_ref()) {
            pushed_reference = Some(pushed.clone());
        }
        let reference = sources
            .reference
            .borrow()
            .clone()
            .or_else(|| pushed_reference.clone());

        let mut scene = Scene::new(geometry.surface_size());
        match renderer.render(&mut scene, &geometry, frame.as_deref(), reference.as_ref()) {
            RenderOutcome::Drawn { .. } => {
                metrics.record_render();
                scene_tx.send_replace(Arc::new(scene));
            }
            RenderOutcome::Deferred(reason) => {
                metrics.record_render_deferred();
                trace!("overlay render deferred: {:?}", reason);
                // A deferred tick leaves nothing on screen, not the last drawing.
                scene_tx.send_if_modified(|current| {
                    if current.is_blank() && current.size() == scene.size() {
                        false
                    } else {
                        *current = Arc::new(scene);
                        true
                    }
                });
            }
        }
    }
    debug!("render loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ResizeEvent, Size};
    use crate::protocol::Landmark;

    struct Fixture {
        frames: watch::Sender<Option<Arc<LandmarkFrame>>>,
        geometry: watch::Sender<ViewGeometry>,
        _reference: watch::Sender<Option<LandmarkMap>>,
        metrics: Arc<MetricsRecorder>,
        render_loop: RenderLoop,
    }

    fn fixture() -> Fixture {
        let (frames, frames_rx) = watch::channel(None);
        let (geometry, geometry_rx) = watch::channel(ViewGeometry::default());
        let (reference, reference_rx) = watch::channel(None);
        let metrics = Arc::new(MetricsRecorder::new());
        let render_loop = RenderLoop::spawn(
            OverlayRenderer::default(),
            RenderSources {
                frames: frames_rx,
                geometry: geometry_rx,
                reference: reference_rx,
            },
            Duration::from_millis(16),
            metrics.clone(),
            CancellationToken::new(),
        );
        Fixture {
            frames,
            geometry,
            _reference: reference,
            metrics,
            render_loop,
        }
    }

    fn shoulders() -> Arc<LandmarkFrame> {
        let mut frame = LandmarkFrame::default();
        frame.landmarks.insert(11, Landmark::new(0.4, 0.3, 0.0));
        frame.landmarks.insert(12, Landmark::new(0.6, 0.3, 0.0));
        Arc::new(frame)
    }

    #[tokio::test(start_paused = true)]
    async fn defers_until_geometry_is_known_then_redraws_last_frame() {
        let fx = fixture();
        fx.frames.send_replace(Some(shoulders()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.metrics.snapshot().renders, 0);
        assert!(fx.metrics.snapshot().renders_deferred > 0);

        fx.geometry.send_modify(|geometry| {
            geometry.apply(ResizeEvent::MetadataLoaded(Size::new(1280.0, 720.0)));
            geometry.apply(ResizeEvent::ViewportResized(Size::new(640.0, 360.0)));
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // No new frames arrived, yet every tick redrew the last one.
        let renders = fx.metrics.snapshot().renders;
        assert!(renders >= 5, "only {renders} renders");
        assert!(fx.render_loop.latest().lines().count() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_reference_outlives_the_frame_that_carried_it() {
        let fx = fixture();
        fx.geometry.send_replace(ViewGeometry::new(
            Size::new(640.0, 480.0),
            Size::new(640.0, 480.0),
        ));
        let mut carrier = LandmarkFrame::default();
        carrier.reference = Some(shoulders().landmarks.clone());
        fx.frames.send_replace(Some(Arc::new(carrier)));
        tokio::time::sleep(Duration::from_millis(40)).await;

        fx.frames.send_replace(Some(Arc::new(LandmarkFrame::default())));
        tokio::time::sleep(Duration::from_millis(40)).await;
        let scene = fx.render_loop.latest();
        assert_eq!(scene.lines().count(), 1);
        assert!(scene.labels().next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn collapsing_viewport_blanks_the_published_scene() {
        let fx = fixture();
        fx.geometry.send_replace(ViewGeometry::new(
            Size::new(640.0, 480.0),
            Size::new(640.0, 480.0),
        ));
        fx.frames.send_replace(Some(shoulders()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!fx.render_loop.latest().is_blank());

        fx.geometry.send_modify(|geometry| {
            geometry.apply(ResizeEvent::ViewportResized(Size::ZERO));
        });
        tokio::time::sleep(Duration::from_millis(40)).await;
        let scene = fx.render_loop.latest();
        assert!(scene.is_blank());
        assert_eq!(scene.size(), Size::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_cancelled() {
        let fx = fixture();
        fx.geometry.send_replace(ViewGeometry::new(
            Size::new(640.0, 480.0),
            Size::new(640.0, 480.0),
        ));
        tokio::time::sleep(Duration::from_millis(40)).await;

        let Fixture {
            metrics,
            render_loop,
            frames,
            ..
        } = fx;
        render_loop.join().await;
        let after_stop = metrics.snapshot().renders;

        frames.send_replace(Some(shoulders()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(metrics.snapshot().renders, after_stop);
    }
}
