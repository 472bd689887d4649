//! Application State

use std::sync::Arc;
use std::time::Instant;
use xray_store::RecordStore;

use crate::metrics::ApiMetrics;

/// State shared across all handlers
pub struct AppState {
    /// Backend every handler reads and writes through
    pub store: Arc<dyn RecordStore>,
    pub metrics: ApiMetrics,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn RecordStore>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            store,
            metrics: ApiMetrics::new()?,
            start_time: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
