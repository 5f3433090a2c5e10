use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use tempfile::NamedTempFile;

use cinderdb::common::config::LogConfig;
use cinderdb::storage::buffer::BufferPoolManager;
use cinderdb::storage::disk::DiskManager;
use cinderdb::transaction::wal::LogManager;

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

#[allow(dead_code)]
pub fn init_test_logging() {
    Lazy::force(&LOGGER);
}

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    init_test_logging();
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

// Everything a WAL-enabled test needs, sharing one disk manager
#[allow(dead_code)]
pub struct WalSetup {
    pub disk: Arc<DiskManager>,
    pub log_manager: Arc<LogManager>,
    pub buffer_pool: Arc<BufferPoolManager>,
}

// Open (or reopen after a simulated crash) a database with WAL support
#[allow(dead_code)]
pub fn open_wal_database(path: &str, pool_size: usize) -> Result<WalSetup> {
    init_test_logging();
    let disk = Arc::new(DiskManager::new(path)?);
    let log_manager = Arc::new(LogManager::with_config(
        disk.clone(),
        LogConfig {
            buffer_size: 16 * 1024,
            flush_interval: std::time::Duration::from_millis(5),
        },
    ));
    let buffer_pool = Arc::new(BufferPoolManager::with_disk_manager(
        pool_size,
        disk.clone(),
        Some(log_manager.clone()),
    ));
    Ok(WalSetup {
        disk,
        log_manager,
        buffer_pool,
    })
}
