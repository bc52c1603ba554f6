//! NEXUS Route Mapper CLI
//!
//! Starts, follows and inspects SNMP discovery runs. Results are printed as
//! JSON on stdout; progress goes to stderr and the log file.

use nexus_routemap::{AppContext, run_with_ctrl_c};

#[tokio::main]
async fn main() {
    if let Err(e) = nexus_routemap::logging::init_logging() {
        eprintln!("[WARN] Failed to initialize structured logging: {}", e);
    }

    let context = AppContext::from_env();
    if let Err(e) = run_with_ctrl_c(std::env::args(), &context).await {
        nexus_routemap::log_error!("{:#}", e);
        std::process::exit(1);
    }
}
