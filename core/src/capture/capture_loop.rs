use crate::capture::encoder::FrameEncoder;
use crate::capture::source::{CaptureError, FrameSource};
use crate::config::CaptureConfig;
use crate::geometry::{ResizeEvent, ViewGeometry};
use crate::prelude::PoseChannel;
use crate::telemetry::{MetricsRecorder, StatusLog};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Samples a [`FrameSource`] at a bounded rate and streams JPEG frames to the
/// backend. Frames that cannot be sent right away are dropped, never queued.
pub struct CaptureLoop {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CaptureLoop {
    pub fn spawn<S, C>(
        source: S,
        channel: Arc<C>,
        config: CaptureConfig,
        geometry: Arc<watch::Sender<ViewGeometry>>,
        metrics: Arc<MetricsRecorder>,
        status: Arc<StatusLog>,
        token: CancellationToken,
    ) -> Self
    where
        S: FrameSource,
        C: PoseChannel + ?Sized + 'static,
    {
        let worker = CaptureWorker {
            source: Some(source),
            job: None,
            channel,
            encoder: FrameEncoder::from_config(&config),
            geometry,
            metrics,
            status,
            failing: false,
        };
        let handle = tokio::spawn(worker.run(config, token.clone()));
        Self {
            token,
            handle: Some(handle),
        }
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

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A grab and encode running on the blocking pool. The source travels with it.
type GrabJob<S> = JoinHandle<(S, Result<String, CaptureError>)>;

struct CaptureWorker<S, C: ?Sized> {
    /// `None` while a grab is in flight.
    source: Option<S>,
    job: Option<GrabJob<S>>,
    channel: Arc<C>,
    encoder: FrameEncoder,
    geometry: Arc<watch::Sender<ViewGeometry>>,
    metrics: Arc<MetricsRecorder>,
    status: Arc<StatusLog>,
    failing: bool,
}

async fn wait_job<S>(
    job: &mut Option<GrabJob<S>>,
) -> Result<(S, Result<String, CaptureError>), JoinError> {
    match job.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

impl<S, C> CaptureWorker<S, C>
where
    S: FrameSource,
    C: PoseChannel + ?Sized + 'static,
{
    async fn run(mut self, config: CaptureConfig, token: CancellationToken) {
        let mut ticker = interval(config.mode.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "capture started at {}x{} every {:?}",
            config.width,
            config.height,
            config.mode.period()
        );
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                finished = wait_job(&mut self.job), if self.job.is_some() => {
                    self.job = None;
                    self.finish(finished);
                }
                _ = ticker.tick() => self.sample(),
            }
        }
        if let Some(job) = self.job.take() {
            if let Ok((source, _)) = job.await {
                self.source = Some(source);
            }
        }
        match self.source.as_mut() {
            Some(source) => {
                source.release();
                debug!("capture source released");
            }
            None => warn!("capture source lost with its grab task"),
        }
    }

    fn sample(&mut self) {
        let Some(mut source) = self.source.take() else {
            debug!("previous grab still running, frame skipped");
            self.metrics.record_frame_dropped();
            return;
        };
        let size = source.intrinsic_size();
        if size.is_empty() {
            self.source = Some(source);
            return;
        }
        self.geometry.send_if_modified(|geometry| {
            let event = if geometry.intrinsic().is_empty() {
                ResizeEvent::MetadataLoaded(size)
            } else {
                ResizeEvent::SourceResized(size)
            };
            geometry.apply(event)
        });

        if !self.channel.state().is_open() {
            self.source = Some(source);
            self.metrics.record_frame_dropped();
            return;
        }

        let encoder = self.encoder;
        self.job = Some(task::spawn_blocking(move || {
            let encoded = source.grab().and_then(|frame| encoder.encode(&frame));
            (source, encoded)
        }));
    }

    fn finish(&mut self, finished: Result<(S, Result<String, CaptureError>), JoinError>) {
        let encoded = match finished {
            Ok((source, encoded)) => {
                self.source = Some(source);
                encoded
            }
            Err(err) => {
                warn!("grab task failed: {}", err);
                self.status.warn("Camera error: capture task failed");
                self.failing = true;
                return;
            }
        };
        let image = match encoded {
            Ok(image) => image,
            Err(err) => {
                if !self.failing {
                    self.status.warn(&format!("Camera error: {}", err));
                    self.failing = true;
                }
                return;
            }
        };
        if self.failing {
            self.status.record("Camera recovered");
            self.failing = false;
        }

        match self.channel.send_frame(image) {
            Ok(()) => self.metrics.record_frame_sent(),
            Err(err) => {
                debug!("frame dropped: {}", err);
                self.metrics.record_frame_dropped();
            }
        }
    }
}
