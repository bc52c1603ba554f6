//! Database models
//!
//! Records for discovery runs and everything a run discovers, with the
//! string encodings used in the SQLite columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a discovery run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Paused => "PAUSED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Allowed edges of the run state machine.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "PAUSED" => Ok(RunStatus::Paused),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            "CANCELLED" => Ok(RunStatus::Cancelled),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// SNMP protocol version used for a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SnmpVersion {
    #[serde(rename = "1")]
    V1,
    #[serde(rename = "2c")]
    V2c,
}

impl std::fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnmpVersion::V1 => write!(f, "1"),
            SnmpVersion::V2c => write!(f, "2c"),
        }
    }
}

impl std::str::FromStr for SnmpVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "v1" => Ok(SnmpVersion::V1),
            "2" | "2c" | "v2c" => Ok(SnmpVersion::V2c),
            other => Err(format!("Unsupported SNMP version: {}", other)),
        }
    }
}

/// Community-based SNMP credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnmpCredentials {
    pub community: String,
    pub version: SnmpVersion,
}

impl SnmpCredentials {
    pub fn v2c(community: impl Into<String>) -> Self {
        Self {
            community: community.into(),
            version: SnmpVersion::V2c,
        }
    }
}

/// Login for the vendor-CLI route fallback. A run stores only the username
/// and platform; the password is never serialized, so the caller hands the
/// full credential to each fallback call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliCredential {
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// Discovery run record from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRun {
    pub id: i64,
    pub status: RunStatus,
    pub root_ip: String,
    pub snmp_community: String,
    pub snmp_version: SnmpVersion,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cli_credentials: Vec<CliCredential>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub hosts_queried: i64,
}

impl DiscoveryRun {
    pub fn snmp_credentials(&self) -> SnmpCredentials {
        SnmpCredentials {
            community: self.snmp_community.clone(),
            version: self.snmp_version,
        }
    }
}

/// One queried host within a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterRecord {
    pub id: i64,
    pub run_id: i64,
    pub ip: String,
    pub hostname: Option<String>,
    pub sys_descr: Option<String>,
    pub sys_object_id: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub is_router: bool,
    pub router_score: i32,
    pub classification_reason: String,
    pub discovered_at: DateTime<Utc>,
}

/// Interface address row reported by a router
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterInterfaceRecord {
    pub if_index: Option<i64>,
    pub ip: String,
    pub netmask: String,
}

/// Network attached to or learned by a router
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterNetwork {
    pub cidr: String,
    pub is_local: bool,
}

/// Where a stored route row came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouteSource {
    Snmp,
    Cli,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteSource::Snmp => "snmp",
            RouteSource::Cli => "cli",
        }
    }
}

impl std::str::FromStr for RouteSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snmp" => Ok(RouteSource::Snmp),
            "cli" => Ok(RouteSource::Cli),
            _ => Err(format!("Unknown route source: {}", s)),
        }
    }
}

/// Routing-table entry stored for a router
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterRoute {
    pub destination: String,
    pub next_hop: Option<String>,
    pub protocol: String,
    pub admin_distance: Option<i64>,
    pub metric: Option<i64>,
    pub source: RouteSource,
}

/// Why two routers were linked
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EdgeReason {
    NextHop,
    SharedSubnet,
}

impl EdgeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeReason::NextHop => "next_hop",
            EdgeReason::SharedSubnet => "shared_subnet",
        }
    }
}

impl std::fmt::Display for EdgeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EdgeReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next_hop" => Ok(EdgeReason::NextHop),
            "shared_subnet" => Ok(EdgeReason::SharedSubnet),
            _ => Err(format!("Unknown edge reason: {}", s)),
        }
    }
}

/// Directed inferred adjacency between two routers of one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopologyEdge {
    pub from_router: String,
    pub to_router: String,
    pub reason: EdgeReason,
}
