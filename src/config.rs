//! Configuration constants for the NEXUS route mapper
//!
//! Compile-time defaults live in `pub const` items; every value can be
//! overridden at runtime through a `NEXUS_*` environment variable.

use std::path::PathBuf;
use std::time::Duration;

// ====== SNMP Configuration ======

/// SNMP community string for v1/v2c
pub const SNMP_COMMUNITY: &str = "public";

/// SNMP per-attempt timeout
pub const SNMP_TIMEOUT: Duration = Duration::from_secs(2);

/// SNMP attempts per operation (first try included)
pub const SNMP_RETRIES: u8 = 2;

/// Linear backoff step between attempts
pub const SNMP_BACKOFF: Duration = Duration::from_millis(250);

/// SNMP port
pub const SNMP_PORT: u16 = 161;

/// Upper bound on rows fetched by a single table walk
pub const SNMP_MAX_WALK_ROWS: usize = 20_000;

// ====== Crawl Configuration ======

/// Maximum hosts queried per discovery run
pub const CRAWL_MAX_HOSTS: usize = 1024;

/// How long a crawl loop's heartbeat keeps other crawlers off its run.
/// Must outlast one host query.
pub const CRAWL_LOOP_LEASE: Duration = Duration::from_secs(60);

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    match env_var(name).and_then(|v| v.parse::<u64>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_usize(name: &str, default: usize, min: usize, max: usize) -> usize {
    match env_var(name).and_then(|v| v.parse::<usize>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_u16(name: &str, default: u16, min: u16, max: u16) -> u16 {
    match env_var(name).and_then(|v| v.parse::<u16>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_u8(name: &str, default: u8, min: u8, max: u8) -> u8 {
    match env_var(name).and_then(|v| v.parse::<u8>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

/// Runtime-tunable SNMP community.
/// Env: `NEXUS_SNMP_COMMUNITY`
pub fn snmp_community() -> String {
    env_var("NEXUS_SNMP_COMMUNITY").unwrap_or_else(|| SNMP_COMMUNITY.to_string())
}

/// Runtime-tunable SNMP timeout.
/// Env: `NEXUS_SNMP_TIMEOUT_MS`
pub fn snmp_timeout() -> Duration {
    Duration::from_millis(env_parse_u64(
        "NEXUS_SNMP_TIMEOUT_MS",
        SNMP_TIMEOUT.as_millis() as u64,
        100,
        30_000,
    ))
}

/// Runtime-tunable SNMP attempt count.
/// Env: `NEXUS_SNMP_RETRIES`
pub fn snmp_retries() -> u8 {
    env_parse_u8("NEXUS_SNMP_RETRIES", SNMP_RETRIES, 1, 5)
}

/// Runtime-tunable backoff step between SNMP attempts.
/// Env: `NEXUS_SNMP_BACKOFF_MS`
pub fn snmp_backoff() -> Duration {
    Duration::from_millis(env_parse_u64(
        "NEXUS_SNMP_BACKOFF_MS",
        SNMP_BACKOFF.as_millis() as u64,
        0,
        5_000,
    ))
}

/// Runtime-tunable SNMP port.
/// Env: `NEXUS_SNMP_PORT`
pub fn snmp_port() -> u16 {
    env_parse_u16("NEXUS_SNMP_PORT", SNMP_PORT, 1, u16::MAX)
}

/// Runtime-tunable walk row cap.
/// Env: `NEXUS_SNMP_MAX_WALK_ROWS`
pub fn snmp_max_walk_rows() -> usize {
    env_parse_usize(
        "NEXUS_SNMP_MAX_WALK_ROWS",
        SNMP_MAX_WALK_ROWS,
        16,
        1_000_000,
    )
}

/// Runtime-tunable per-run host budget.
/// Env: `NEXUS_CRAWL_MAX_HOSTS`
pub fn crawl_max_hosts() -> usize {
    env_parse_usize("NEXUS_CRAWL_MAX_HOSTS", CRAWL_MAX_HOSTS, 1, 65_536)
}

/// Runtime-tunable crawl loop lease.
/// Env: `NEXUS_CRAWL_LOOP_LEASE_SECS`
pub fn crawl_loop_lease() -> Duration {
    Duration::from_secs(env_parse_u64(
        "NEXUS_CRAWL_LOOP_LEASE_SECS",
        CRAWL_LOOP_LEASE.as_secs(),
        5,
        3_600,
    ))
}

/// Database path override.
/// Env: `NEXUS_DB_PATH`
pub fn db_path_override() -> Option<PathBuf> {
    env_var("NEXUS_DB_PATH").map(PathBuf::from)
}

/// Wire-level knobs handed to the SNMP adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpSettings {
    pub port: u16,
    pub timeout: Duration,
    pub attempts: u8,
    pub backoff: Duration,
    pub max_walk_rows: usize,
}

impl SnmpSettings {
    pub fn from_env() -> Self {
        Self {
            port: snmp_port(),
            timeout: snmp_timeout(),
            attempts: snmp_retries(),
            backoff: snmp_backoff(),
            max_walk_rows: snmp_max_walk_rows(),
        }
    }

    /// Worst-case wall time of one adapter operation.
    pub fn worst_case(&self) -> Duration {
        let attempts = u32::from(self.attempts.max(1));
        let backoff_total: u32 = (1..attempts).sum();
        self.timeout * attempts + self.backoff * backoff_total
    }
}

impl Default for SnmpSettings {
    fn default() -> Self {
        Self {
            port: SNMP_PORT,
            timeout: SNMP_TIMEOUT,
            attempts: SNMP_RETRIES,
            backoff: SNMP_BACKOFF,
            max_walk_rows: SNMP_MAX_WALK_ROWS,
        }
    }
}

/// Crawler-level knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSettings {
    pub max_hosts: usize,
    pub loop_lease: Duration,
}

impl CrawlSettings {
    pub fn from_env() -> Self {
        Self {
            max_hosts: crawl_max_hosts(),
            loop_lease: crawl_loop_lease(),
        }
    }
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_hosts: CRAWL_MAX_HOSTS,
            loop_lease: CRAWL_LOOP_LEASE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_case_accounts_for_linear_backoff() {
        let settings = SnmpSettings {
            port: 161,
            timeout: Duration::from_millis(500),
            attempts: 3,
            backoff: Duration::from_millis(100),
            max_walk_rows: 100,
        };
        // 3 x 500ms + (100ms + 200ms)
        assert_eq!(settings.worst_case(), Duration::from_millis(1800));
    }

    #[test]
    fn test_unset_env_falls_back_to_defaults() {
        assert_eq!(
            env_parse_u16("NEXUS_TEST_UNSET_PORT_VARIABLE", 161, 1, u16::MAX),
            161
        );
        assert_eq!(env_var("NEXUS_TEST_UNSET_PORT_VARIABLE"), None);
    }
}
