use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Size of the in-memory log buffer. Recovery reads the log file back in
/// chunks of the same size.
pub const LOG_BUFFER_SIZE: usize = 64 * 1024;

/// How long the background flusher sleeps between group-commit cycles.
pub const LOG_TIMEOUT: Duration = Duration::from_millis(50);

/// Process-wide switch for write-ahead logging. Must be off while recovery
/// replays the log so that replay itself generates no records.
static LOGGING_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn logging_enabled() -> bool {
    LOGGING_ENABLED.load(Ordering::Acquire)
}

pub fn set_logging_enabled(enabled: bool) {
    LOGGING_ENABLED.store(enabled, Ordering::Release);
}

/// Engine-level options
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Under strict 2PL all locks are held until commit/abort; otherwise the
    /// first unlock moves the transaction into its shrinking phase.
    pub strict_2pl: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { strict_2pl: true }
    }
}

/// Configuration for the log manager
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Capacity of each in-memory buffer segment
    pub buffer_size: usize,

    /// Flusher wakeup interval
    pub flush_interval: Duration,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            buffer_size: LOG_BUFFER_SIZE,
            flush_interval: LOG_TIMEOUT,
        }
    }
}
