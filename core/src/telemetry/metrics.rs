use serde::Serialize;
use std::sync::Mutex;

pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

/// Counters shared by the connection, capture and render loops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_received: usize,
    pub parse_failures: usize,
    pub reconnects_scheduled: usize,
    pub frames_sent: usize,
    pub frames_dropped: usize,
    pub renders: usize,
    pub renders_deferred: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_frame_received(&self) {
        self.bump(|metrics| metrics.frames_received += 1);
    }

    pub fn record_parse_failure(&self) {
        self.bump(|metrics| metrics.parse_failures += 1);
    }

    pub fn record_reconnect_scheduled(&self) {
        self.bump(|metrics| metrics.reconnects_scheduled += 1);
    }

    pub fn record_frame_sent(&self) {
        self.bump(|metrics| metrics.frames_sent += 1);
    }

    pub fn record_frame_dropped(&self) {
        self.bump(|metrics| metrics.frames_dropped += 1);
    }

    pub fn record_render(&self) {
        self.bump(|metrics| metrics.renders += 1);
    }

    pub fn record_render_deferred(&self) {
        self.bump(|metrics| metrics.renders_deferred += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            MetricsSnapshot::default()
        }
    }

    fn bump(&self, update: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            update(&mut metrics);
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let metrics = MetricsRecorder::new();
        metrics.record_frame_sent();
        metrics.record_frame_sent();
        metrics.record_frame_dropped();
        metrics.record_reconnect_scheduled();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_sent, 2);
        assert_eq!(snapshot.frames_dropped, 1);
        assert_eq!(snapshot.reconnects_scheduled, 1);
        assert_eq!(snapshot.frames_received, 0);
    }
}
