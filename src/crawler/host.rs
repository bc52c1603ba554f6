//! Querying one host and turning the answers into store rows

use std::collections::HashSet;
use std::net::Ipv4Addr;

use super::state::HostFacts;
use crate::classifier::{self, Classification, Observation};
use crate::database::{
    NewRouter, RouteSource, RouterInterfaceRecord, RouterNetwork, RouterRoute, SnmpCredentials,
};
use crate::error::ProbeError;
use crate::network::{cidr_string, is_ignored_address, network_of};
use crate::snmp::{InterfaceAddress, RouteEntry, RouterProbe, SystemInfo};

/// Everything learned about one dequeued host, ready to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueriedHost {
    pub ip: Ipv4Addr,
    ip_text: String,
    pub system: SystemInfo,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub classification: Classification,
    pub interfaces: Vec<RouterInterfaceRecord>,
    pub networks: Vec<RouterNetwork>,
    pub routes: Vec<RouterRoute>,
}

impl QueriedHost {
    /// Non-router record for a host whose system group could not be read.
    pub fn failed(ip: Ipv4Addr, err: &ProbeError) -> Self {
        Self {
            ip,
            ip_text: ip.to_string(),
            system: SystemInfo::default(),
            vendor: None,
            model: None,
            classification: Classification::failed(err.reason_tag()),
            interfaces: Vec::new(),
            networks: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn as_new_router(&self) -> NewRouter<'_> {
        NewRouter {
            ip: &self.ip_text,
            hostname: self.system.sys_name.as_deref(),
            sys_descr: self.system.sys_descr.as_deref(),
            sys_object_id: self.system.sys_object_id.as_deref(),
            vendor: self.vendor.as_deref(),
            model: self.model.as_deref(),
            is_router: self.classification.is_router,
            router_score: self.classification.score,
            classification_reason: &self.classification.reason,
            interfaces: &self.interfaces,
            networks: &self.networks,
            routes: &self.routes,
        }
    }

    /// Crawl facts derived from exactly the rows that get persisted.
    pub fn facts(&self) -> HostFacts {
        HostFacts::from_records(self.ip, &self.interfaces, &self.routes)
    }
}

/// Runs the four adapter queries for `ip` concurrently. System info gates
/// reachability; any other facet that fails is treated as empty.
pub async fn query_host(
    probe: &dyn RouterProbe,
    ip: Ipv4Addr,
    creds: &SnmpCredentials,
) -> QueriedHost {
    let (system, forwarding, interfaces, routes) = tokio::join!(
        probe.get_system_info(ip, creds),
        probe.get_ip_forwarding(ip, creds),
        probe.get_interface_addresses(ip, creds),
        probe.get_routing_entries(ip, creds),
    );

    let system = match system {
        Ok(system) => system,
        Err(e) => {
            log_warn!("Host {} not queryable: {}", ip, e);
            return QueriedHost::failed(ip, &e);
        }
    };

    let mut notes = Vec::new();
    let forwarding = degrade(ip, "forwarding", forwarding, &mut notes).unwrap_or(false);
    let interfaces = degrade(ip, "interfaces", interfaces, &mut notes).unwrap_or_default();
    let routes = degrade(ip, "routes", routes, &mut notes).unwrap_or_default();

    build_host(ip, system, forwarding, &interfaces, &routes, &notes)
}

fn degrade<T>(
    ip: Ipv4Addr,
    facet: &str,
    result: Result<T, ProbeError>,
    notes: &mut Vec<String>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log_warn!("{} unavailable on {}: {}", facet, ip, e);
            notes.push(format!("{}_unavailable={}", facet, e.reason_tag()));
            None
        }
    }
}

/// Classifies a host and converts adapter output into store rows.
pub fn build_host(
    ip: Ipv4Addr,
    system: SystemInfo,
    ip_forwarding: bool,
    interfaces: &[InterfaceAddress],
    routes: &[RouteEntry],
    notes: &[String],
) -> QueriedHost {
    let mut classification = classifier::classify(&Observation {
        system: &system,
        ip_forwarding,
        interfaces,
        routes,
    });
    for note in notes {
        classification.add_note(note);
    }

    let vendor = classifier::derive_vendor(
        system.sys_descr.as_deref(),
        system.sys_object_id.as_deref(),
    );
    let model = classifier::derive_model(system.sys_descr.as_deref());

    let interface_rows = interfaces
        .iter()
        .map(|iface| RouterInterfaceRecord {
            if_index: iface.if_index,
            ip: iface.ip.to_string(),
            netmask: iface.netmask.to_string(),
        })
        .collect();

    let mut networks = Vec::new();
    let mut local = HashSet::new();
    for iface in interfaces {
        if is_ignored_address(iface.ip) {
            continue;
        }
        if let Ok(net) = network_of(iface.ip, iface.netmask)
            && local.insert(net.to_string())
        {
            networks.push(RouterNetwork {
                cidr: net.to_string(),
                is_local: true,
            });
        }
    }

    let mut learned = HashSet::new();
    let mut route_rows = Vec::with_capacity(routes.len());
    for route in routes {
        let destination = match cidr_string(route.destination, route.netmask) {
            Ok(cidr) => cidr,
            Err(e) => {
                log_warn!("Dropping route on {}: {:#}", ip, e);
                continue;
            }
        };

        if route.netmask != Ipv4Addr::UNSPECIFIED
            && !local.contains(&destination)
            && learned.insert(destination.clone())
        {
            networks.push(RouterNetwork {
                cidr: destination.clone(),
                is_local: false,
            });
        }

        route_rows.push(RouterRoute {
            destination,
            next_hop: route.next_hop.map(|hop| hop.to_string()),
            protocol: route.protocol.as_str().to_string(),
            admin_distance: route.admin_distance,
            metric: route.metric,
            source: RouteSource::Snmp,
        });
    }

    QueriedHost {
        ip,
        ip_text: ip.to_string(),
        system,
        vendor,
        model,
        classification,
        interfaces: interface_rows,
        networks,
        routes: route_rows,
    }
}
