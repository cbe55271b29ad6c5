//! Run log buffer
//!
//! Collects the structured log of one run. Entries are also emitted through
//! `tracing`; the buffer is what ends up in the stored report.

use conveyor_core::domain::log::{LogEntry, LogLevel};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Service for collecting run logs
pub trait LogBufferService: Send + Sync {
    /// Adds a log entry to the buffer
    fn add_entry(&self, entry: LogEntry);

    /// Copies the buffered entries
    ///
    /// # Returns
    /// Every buffered entry in insertion order
    fn snapshot(&self) -> Vec<LogEntry>;
}

/// In-memory implementation of LogBufferService
#[derive(Clone, Default)]
pub struct InMemoryLogBuffer {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl InMemoryLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogBufferService for InMemoryLogBuffer {
    fn add_entry(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Debug => debug!("[{}] {}", entry.source, entry.message),
            LogLevel::Info => info!("[{}] {}", entry.source, entry.message),
            LogLevel::Warning => warn!("[{}] {}", entry.source, entry.message),
            LogLevel::Error => error!("[{}] {}", entry.source, entry.message),
        }
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    fn snapshot(&self) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
