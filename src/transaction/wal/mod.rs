pub mod log_manager;
pub mod log_record;
pub mod log_recovery;

pub use log_manager::{LogError, LogManager};
pub use log_record::{LogPayload, LogRecord, LogRecordType};
pub use log_recovery::{LogRecovery, RecoveryError};
