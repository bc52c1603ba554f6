//! Read models handed back by the control surface

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::database::{
    DiscoveryRun, EdgeReason, RouterInterfaceRecord, RouterNetwork, RouterRecord, RouterRoute,
    RunStatus, SnmpVersion, TopologyEdge,
};

/// Externally visible state of a run. Credentials are left out.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunState {
    pub run_id: i64,
    pub status: RunStatus,
    pub root_ip: String,
    pub snmp_version: SnmpVersion,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub hosts_queried: i64,
}

impl From<DiscoveryRun> for RunState {
    fn from(run: DiscoveryRun) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            root_ip: run.root_ip,
            snmp_version: run.snmp_version,
            started_at: run.started_at,
            finished_at: run.finished_at,
            error_message: run.error_message,
            hosts_queried: run.hosts_queried,
        }
    }
}

/// Router summary inside a topology
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TopologyRouter {
    pub ip: String,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub is_router: bool,
    pub router_score: i32,
    pub classification_reason: String,
    pub network_count: i64,
    pub route_count: i64,
}

impl TopologyRouter {
    pub fn from_record(record: RouterRecord, network_count: i64, route_count: i64) -> Self {
        Self {
            ip: record.ip,
            hostname: record.hostname,
            vendor: record.vendor,
            model: record.model,
            is_router: record.is_router,
            router_score: record.router_score,
            classification_reason: record.classification_reason,
            network_count,
            route_count,
        }
    }
}

/// Reverse pairs of directed edges collapsed into one link
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UndirectedLink {
    pub a: String,
    pub b: String,
    pub reasons: Vec<EdgeReason>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Topology {
    pub run_id: i64,
    pub status: RunStatus,
    pub routers: Vec<TopologyRouter>,
    pub edges: Vec<TopologyEdge>,
    pub undirected_links: Vec<UndirectedLink>,
}

/// Collapses `a -> b` and `b -> a` into one link. Stored edges are untouched.
pub fn undirected_links(edges: &[TopologyEdge]) -> Vec<UndirectedLink> {
    let mut links: BTreeMap<(String, String), Vec<EdgeReason>> = BTreeMap::new();

    for edge in edges {
        let key = if edge.from_router <= edge.to_router {
            (edge.from_router.clone(), edge.to_router.clone())
        } else {
            (edge.to_router.clone(), edge.from_router.clone())
        };
        let reasons = links.entry(key).or_default();
        if !reasons.contains(&edge.reason) {
            reasons.push(edge.reason);
        }
    }

    links
        .into_iter()
        .map(|((a, b), reasons)| UndirectedLink { a, b, reasons })
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouterDetail {
    pub router: RouterRecord,
    pub interfaces: Vec<RouterInterfaceRecord>,
    pub networks: Vec<RouterNetwork>,
    pub routes: Vec<RouterRoute>,
}
