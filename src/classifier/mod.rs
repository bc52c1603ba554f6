//! Router classification heuristic
//!
//! Pure scoring over what the adapter returned for one host:
//! - IP forwarding enabled: +3
//! - more than one distinct local network: +2
//! - at least one route through a non-local next hop: +3
//! - +1 per distinct router keyword in sysDescr / sysObjectID
//!
//! A host scoring 3 or more is a router.

mod vendor;

pub use vendor::{derive_model, derive_vendor, enterprise_number, vendor_from_object_id};

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::net::Ipv4Addr;

use crate::network::{is_ignored_address, network_of};
use crate::snmp::{InterfaceAddress, RouteEntry, SystemInfo};

pub const ROUTER_THRESHOLD: i32 = 3;

const FORWARDING_POINTS: i32 = 3;
const MULTI_NETWORK_POINTS: i32 = 2;
const REMOTE_ROUTE_POINTS: i32 = 3;
const KEYWORD_POINTS: i32 = 1;

/// Matched against whole sysDescr tokens
const TOKEN_KEYWORDS: &[&str] = &[
    "router", "routing", "ios", "ios-xe", "ios-xr", "nx-os", "junos", "routeros", "vyos",
    "edgeos", "quagga", "frr", "bird",
];

/// Matched against the start of a token followed by a digit (e.g. `isr4331`)
const MODEL_PREFIX_KEYWORDS: &[&str] = &["isr", "asr", "csr", "ccr"];

/// sysObjectID subtrees that only routers live under
const OBJECT_ID_KEYWORDS: &[(&str, &str)] = &[
    ("1.3.6.1.4.1.2636", "juniper"),
    ("1.3.6.1.4.1.14988", "mikrotik"),
];

/// Everything the classifier looks at for one host
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub system: &'a SystemInfo,
    pub ip_forwarding: bool,
    pub interfaces: &'a [InterfaceAddress],
    pub routes: &'a [RouteEntry],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub is_router: bool,
    pub score: i32,
    pub reason: String,
}

impl Classification {
    /// Non-router verdict for a host that could not be queried.
    pub fn failed(reason_tag: &str) -> Self {
        Self {
            is_router: false,
            score: 0,
            reason: reason_tag.to_string(),
        }
    }

    /// Appends a `key=value` note without touching the score.
    pub fn add_note(&mut self, note: &str) {
        if self.reason.is_empty() {
            self.reason = note.to_string();
        } else {
            self.reason.push_str("; ");
            self.reason.push_str(note);
        }
    }
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .filter(|t| !t.is_empty())
}

/// Distinct keywords found in sysDescr / sysObjectID, sorted.
pub fn matched_keywords(system: &SystemInfo) -> BTreeSet<&'static str> {
    let mut found = BTreeSet::new();

    if let Some(descr) = &system.sys_descr {
        let lowered = descr.to_lowercase();
        for token in tokens(&lowered) {
            if let Some(kw) = TOKEN_KEYWORDS.iter().find(|kw| **kw == token) {
                found.insert(*kw);
            }
            if let Some(kw) = MODEL_PREFIX_KEYWORDS.iter().find(|kw| {
                token
                    .strip_prefix(**kw)
                    .and_then(|rest| rest.chars().next())
                    .is_some_and(|c| c.is_ascii_digit())
            }) {
                found.insert(*kw);
            }
        }
    }

    if let Some(object_id) = &system.sys_object_id {
        let object_id = object_id.trim_start_matches('.');
        for (prefix, kw) in OBJECT_ID_KEYWORDS {
            let under = object_id
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'));
            if under {
                found.insert(*kw);
            }
        }
    }

    found
}

/// Distinct networks of the host's usable interface addresses.
pub fn local_network_count(interfaces: &[InterfaceAddress]) -> usize {
    interfaces
        .iter()
        .filter(|iface| !is_ignored_address(iface.ip))
        .filter_map(|iface| network_of(iface.ip, iface.netmask).ok())
        .collect::<HashSet<_>>()
        .len()
}

/// Whether `hop` leads somewhere other than the host itself.
pub fn is_remote_next_hop(hop: Ipv4Addr, interfaces: &[InterfaceAddress]) -> bool {
    !is_ignored_address(hop) && !interfaces.iter().any(|iface| iface.ip == hop)
}

pub fn remote_route_count(routes: &[RouteEntry], interfaces: &[InterfaceAddress]) -> usize {
    routes
        .iter()
        .filter_map(|r| r.next_hop)
        .filter(|hop| is_remote_next_hop(*hop, interfaces))
        .count()
}

/// Scores one host. Deterministic and independent of input order.
pub fn classify(obs: &Observation<'_>) -> Classification {
    let mut score = 0;
    let mut fired = Vec::new();

    if obs.ip_forwarding {
        score += FORWARDING_POINTS;
        fired.push("ip_forwarding=true".to_string());
    }

    let local_networks = local_network_count(obs.interfaces);
    if local_networks > 1 {
        score += MULTI_NETWORK_POINTS;
        fired.push(format!("local_networks={}", local_networks));
    }

    let remote_routes = remote_route_count(obs.routes, obs.interfaces);
    if remote_routes > 0 {
        score += REMOTE_ROUTE_POINTS;
        fired.push(format!("remote_routes={}", remote_routes));
    }

    let keywords = matched_keywords(obs.system);
    if !keywords.is_empty() {
        score += KEYWORD_POINTS * keywords.len() as i32;
        fired.push(format!(
            "keywords={}",
            keywords.into_iter().collect::<Vec<_>>().join(",")
        ));
    }

    let reason = if fired.is_empty() {
        "no_router_indicators".to_string()
    } else {
        fired.join("; ")
    };

    Classification {
        is_router: score >= ROUTER_THRESHOLD,
        score,
        reason,
    }
}
