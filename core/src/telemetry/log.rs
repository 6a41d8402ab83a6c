use log::{info, warn};
use std::sync::{Mutex, PoisonError};

/// Logs user-facing status lines and keeps the latest one for display.
pub struct StatusLog {
    latest: Mutex<Option<String>>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
        }
    }

    pub fn record(&self, message: &str) {
        info!("{}", message);
        self.store(message);
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", message);
        self.store(message);
    }

    pub fn latest(&self) -> Option<String> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, message: &str) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_owned());
    }
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new()
    }
}
