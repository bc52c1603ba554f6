//! Typed results returned by the protocol adapter

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// System group values (sysDescr / sysObjectID / sysName)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub sys_descr: Option<String>,
    pub sys_object_id: Option<String>,
    pub sys_name: Option<String>,
}

/// One row of the interface address table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub if_index: Option<i64>,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// Routing protocol that installed a route. `Unknown` is kept as-is and is
/// never coerced to a concrete protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteProtocol {
    Connected,
    Static,
    Rip,
    Ospf,
    Isis,
    Bgp,
    Eigrp,
    Igrp,
    Other,
    Unknown,
}

impl RouteProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteProtocol::Connected => "connected",
            RouteProtocol::Static => "static",
            RouteProtocol::Rip => "rip",
            RouteProtocol::Ospf => "ospf",
            RouteProtocol::Isis => "isis",
            RouteProtocol::Bgp => "bgp",
            RouteProtocol::Eigrp => "eigrp",
            RouteProtocol::Igrp => "igrp",
            RouteProtocol::Other => "other",
            RouteProtocol::Unknown => "unknown",
        }
    }

    /// IANAipRouteProtocol code as reported by ipRouteProto / ipCidrRouteProto.
    pub fn from_iana_code(code: i64) -> Self {
        match code {
            1 => RouteProtocol::Other,
            2 => RouteProtocol::Connected,
            3 => RouteProtocol::Static,
            8 => RouteProtocol::Rip,
            9 => RouteProtocol::Isis,
            11 => RouteProtocol::Igrp,
            13 => RouteProtocol::Ospf,
            14 => RouteProtocol::Bgp,
            16 => RouteProtocol::Eigrp,
            _ => RouteProtocol::Unknown,
        }
    }

    /// Lenient parse of a protocol label, e.g. from vendor CLI output.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "c" | "connected" | "local" | "direct" | "l" => RouteProtocol::Connected,
            "s" | "static" | "netmgmt" => RouteProtocol::Static,
            "r" | "rip" => RouteProtocol::Rip,
            "o" | "ospf" => RouteProtocol::Ospf,
            "i" | "isis" | "is-is" => RouteProtocol::Isis,
            "b" | "bgp" => RouteProtocol::Bgp,
            "d" | "eigrp" => RouteProtocol::Eigrp,
            "igrp" => RouteProtocol::Igrp,
            "other" => RouteProtocol::Other,
            _ => RouteProtocol::Unknown,
        }
    }
}

impl std::fmt::Display for RouteProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routing-table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// `None` for directly connected destinations (next hop 0.0.0.0)
    pub next_hop: Option<Ipv4Addr>,
    pub protocol: RouteProtocol,
    pub metric: Option<i64>,
    pub admin_distance: Option<i64>,
}
