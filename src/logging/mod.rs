//! Structured logging for the route mapper
//!
//! Console output goes to stderr; a JSON copy of every event is written to a
//! daily-rotated file under the platform data directory
//! (`<data dir>/nexus-routemap/logs/routemap.log.YYYY-MM-DD`).

#[macro_use]
pub mod macros;

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "routemap.log";

/// Initialize the logging system
///
/// Set `RUST_LOG` to change the level (default `info`), e.g.
/// `RUST_LOG=nexus_routemap=debug` to see every SNMP attempt.
pub fn init_logging() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true)
        .compact();

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .json();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let init_result = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Err(e) = init_result {
        // Tests and embedding hosts may already own the global subscriber.
        if e.to_string().contains("already been set") {
            return Ok(log_dir);
        }
        return Err(Box::new(e));
    }

    tracing::info!("Logging initialized. Log directory: {}", log_dir.display());

    Ok(log_dir)
}

fn get_log_directory() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let base_dir = dirs::data_local_dir()
        .or_else(dirs::config_dir)
        .ok_or("Could not find a data directory for log files")?
        .join("nexus-routemap");

    Ok(base_dir.join("logs"))
}
