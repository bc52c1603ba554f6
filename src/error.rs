//! Error taxonomy
//!
//! `ProbeError` covers what can go wrong talking to one host and is always
//! recovered inside the crawl loop. `DiscoveryError` is what the control
//! surface hands back to its caller.

use std::net::Ipv4Addr;

use crate::database::RunStatus;

/// Host-level SNMP failure, after the retry budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("{ip} did not answer within {attempts} attempt(s)")]
    Unreachable { ip: Ipv4Addr, attempts: u8 },

    #[error("{ip} rejected the SNMP credentials")]
    AuthFailure { ip: Ipv4Addr },

    #[error("malformed SNMP response from {ip}: {detail}")]
    MalformedResponse { ip: Ipv4Addr, detail: String },
}

impl ProbeError {
    /// Short tag stored as a classification reason for failed hosts.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            ProbeError::Unreachable { .. } => "unreachable",
            ProbeError::AuthFailure { .. } => "auth_failure",
            ProbeError::MalformedResponse { .. } => "malformed_response",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::Unreachable { .. })
    }
}

/// Control-surface and run-level errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("discovery run {active_run_id} is already active")]
    AlreadyRunning { active_run_id: i64 },

    #[error("cannot {action} run {run_id} while it is {status}")]
    InvalidTransition {
        run_id: i64,
        status: RunStatus,
        action: &'static str,
    },

    #[error("invalid root address '{0}'")]
    InvalidAddress(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("discovery run {0} not found")]
    RunNotFound(i64),

    #[error("router {ip} not found in run {run_id}")]
    RouterNotFound { run_id: i64, ip: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

impl DiscoveryError {
    /// Wraps any store failure, keeping the full context chain as the message.
    pub fn store(err: anyhow::Error) -> Self {
        DiscoveryError::StoreUnavailable(format!("{:#}", err))
    }
}

pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;
