//! Decoding of raw varbinds into typed adapter results
//!
//! Everything here works on owned `(arcs, value)` pairs so it can be tested
//! without a socket. Rows that cannot be decoded are dropped with a warning;
//! unrecognised protocol codes are kept and tagged `unknown`.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use super::oids::*;
use super::types::{InterfaceAddress, RouteEntry, RouteProtocol, SystemInfo};

/// Owned copy of an SNMP value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    ObjectId(Vec<u64>),
    IpAddress(Ipv4Addr),
    Unsigned(u64),
    Null,
    /// noSuchObject / noSuchInstance
    Missing,
    EndOfMibView,
    /// Any type the adapter never needs
    Other,
}

impl SnmpValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(v) => Some(*v),
            SnmpValue::Unsigned(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// IpAddress values, plus 4-byte octet strings some agents send instead.
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        match self {
            SnmpValue::IpAddress(ip) => Some(*ip),
            SnmpValue::OctetString(bytes) if bytes.len() == 4 => {
                Some(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            SnmpValue::OctetString(bytes) => {
                let text = String::from_utf8_lossy(bytes).trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            SnmpValue::ObjectId(arcs) => Some(dotted(arcs)),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            SnmpValue::Missing | SnmpValue::Null | SnmpValue::EndOfMibView
        )
    }
}

/// A walked subtree: full OID arcs and value, in agent order.
pub type WalkRows = Vec<(Vec<u64>, SnmpValue)>;

/// Maximum sysDescr length kept
const MAX_DESCR_LEN: usize = 512;

pub fn decode_system_info(
    descr: Option<SnmpValue>,
    object_id: Option<SnmpValue>,
    name: Option<SnmpValue>,
) -> SystemInfo {
    let sys_descr = descr.and_then(|v| v.as_text()).map(|mut d| {
        if d.len() > MAX_DESCR_LEN {
            let mut cut = MAX_DESCR_LEN;
            while !d.is_char_boundary(cut) {
                cut -= 1;
            }
            d.truncate(cut);
        }
        d
    });

    SystemInfo {
        sys_descr,
        sys_object_id: object_id.and_then(|v| v.as_text()),
        sys_name: name.and_then(|v| v.as_text()),
    }
}

/// ipForwarding value. A missing object means the agent does not forward.
pub fn decode_ip_forwarding(value: Option<SnmpValue>) -> Result<bool, String> {
    match value {
        None => Ok(false),
        Some(v) if v.is_absent() => Ok(false),
        Some(v) => match v.as_i64() {
            Some(1) => Ok(true),
            Some(2) => Ok(false),
            Some(other) => Err(format!("ipForwarding has out-of-range value {}", other)),
            None => Err(format!("ipForwarding has unexpected type {:?}", v)),
        },
    }
}

/// Splits walked rows of a table entry into `index -> column -> value`.
fn group_by_index(rows: WalkRows, entry: &[u64]) -> BTreeMap<Vec<u64>, BTreeMap<u64, SnmpValue>> {
    let mut table: BTreeMap<Vec<u64>, BTreeMap<u64, SnmpValue>> = BTreeMap::new();
    for (arcs, value) in rows {
        if !arcs.starts_with(entry) || arcs.len() <= entry.len() + 1 {
            continue;
        }
        let column = arcs[entry.len()];
        let index = arcs[entry.len() + 1..].to_vec();
        table.entry(index).or_default().insert(column, value);
    }
    table
}

fn ipv4_from_arcs(arcs: &[u64]) -> Option<Ipv4Addr> {
    if arcs.len() != 4 {
        return None;
    }
    let mut octets = [0u8; 4];
    for (slot, arc) in octets.iter_mut().zip(arcs) {
        *slot = u8::try_from(*arc).ok()?;
    }
    Some(Ipv4Addr::from(octets))
}

fn is_contiguous_mask(mask: Ipv4Addr) -> bool {
    let bits = u32::from(mask);
    bits.leading_ones() + bits.trailing_zeros() == 32
}

/// Decode a walk of ipAddrEntry.
pub fn decode_interface_table(rows: WalkRows) -> Vec<InterfaceAddress> {
    let mut interfaces = Vec::new();

    for (index, columns) in group_by_index(rows, IP_ADDR_ENTRY) {
        let ip = columns
            .get(&IP_AD_ENT_ADDR)
            .and_then(SnmpValue::as_ipv4)
            .or_else(|| ipv4_from_arcs(&index));
        let netmask = columns.get(&IP_AD_ENT_NET_MASK).and_then(SnmpValue::as_ipv4);

        match (ip, netmask) {
            (Some(ip), Some(netmask)) if is_contiguous_mask(netmask) => {
                interfaces.push(InterfaceAddress {
                    if_index: columns.get(&IP_AD_ENT_IF_INDEX).and_then(SnmpValue::as_i64),
                    ip,
                    netmask,
                });
            }
            _ => {
                log_warn!(
                    "Dropping malformed ipAddrTable row {} (address {:?}, mask {:?})",
                    dotted(&index),
                    ip,
                    netmask
                );
            }
        }
    }

    interfaces
}

fn metric_or_none(value: Option<&SnmpValue>) -> Option<i64> {
    value.and_then(SnmpValue::as_i64).filter(|m| *m >= 0)
}

fn next_hop_or_none(ip: Option<Ipv4Addr>) -> Option<Ipv4Addr> {
    ip.filter(|ip| !ip.is_unspecified())
}

/// Decode a walk of ipCidrRouteEntry (index: dest.mask.tos.nextHop).
pub fn decode_cidr_route_table(rows: WalkRows) -> Vec<RouteEntry> {
    let mut routes = Vec::new();

    for (index, columns) in group_by_index(rows, IP_CIDR_ROUTE_ENTRY) {
        let (index_dest, index_mask, index_hop) = if index.len() == 13 {
            (
                ipv4_from_arcs(&index[0..4]),
                ipv4_from_arcs(&index[4..8]),
                ipv4_from_arcs(&index[9..13]),
            )
        } else {
            (None, None, None)
        };

        let destination = columns
            .get(&CIDR_ROUTE_DEST)
            .and_then(SnmpValue::as_ipv4)
            .or(index_dest);
        let netmask = columns
            .get(&CIDR_ROUTE_MASK)
            .and_then(SnmpValue::as_ipv4)
            .or(index_mask);
        let next_hop = columns
            .get(&CIDR_ROUTE_NEXT_HOP)
            .and_then(SnmpValue::as_ipv4)
            .or(index_hop);

        match (destination, netmask) {
            (Some(destination), Some(netmask)) if is_contiguous_mask(netmask) => {
                routes.push(RouteEntry {
                    destination,
                    netmask,
                    next_hop: next_hop_or_none(next_hop),
                    protocol: columns
                        .get(&CIDR_ROUTE_PROTO)
                        .and_then(SnmpValue::as_i64)
                        .map(RouteProtocol::from_iana_code)
                        .unwrap_or(RouteProtocol::Unknown),
                    metric: metric_or_none(columns.get(&CIDR_ROUTE_METRIC1)),
                    admin_distance: None,
                });
            }
            _ => {
                log_warn!(
                    "Dropping malformed ipCidrRouteTable row {}",
                    dotted(&index)
                );
            }
        }
    }

    routes
}

/// Decode a walk of the RFC1213 ipRouteEntry (index: destination).
pub fn decode_route_table(rows: WalkRows) -> Vec<RouteEntry> {
    let mut routes = Vec::new();

    for (index, columns) in group_by_index(rows, IP_ROUTE_ENTRY) {
        let destination = columns
            .get(&ROUTE_DEST)
            .and_then(SnmpValue::as_ipv4)
            .or_else(|| ipv4_from_arcs(&index));
        let netmask = columns.get(&ROUTE_MASK).and_then(SnmpValue::as_ipv4);

        match (destination, netmask) {
            (Some(destination), Some(netmask)) if is_contiguous_mask(netmask) => {
                routes.push(RouteEntry {
                    destination,
                    netmask,
                    next_hop: next_hop_or_none(
                        columns.get(&ROUTE_NEXT_HOP).and_then(SnmpValue::as_ipv4),
                    ),
                    protocol: columns
                        .get(&ROUTE_PROTO)
                        .and_then(SnmpValue::as_i64)
                        .map(RouteProtocol::from_iana_code)
                        .unwrap_or(RouteProtocol::Unknown),
                    metric: metric_or_none(columns.get(&ROUTE_METRIC1)),
                    admin_distance: None,
                });
            }
            _ => {
                log_warn!("Dropping malformed ipRouteTable row {}", dotted(&index));
            }
        }
    }

    routes
}
