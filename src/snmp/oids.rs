//! Object identifiers queried by the adapter (u64 arcs, as snmp2 expects)

// System group
pub const SYS_DESCR: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
pub const SYS_OBJECT_ID: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 2, 0];
pub const SYS_NAME: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 5, 0];

/// ipForwarding: 1 = forwarding, 2 = notForwarding
pub const IP_FORWARDING: &[u64] = &[1, 3, 6, 1, 2, 1, 4, 1, 0];

/// ipAddrEntry, indexed by the interface address
pub const IP_ADDR_ENTRY: &[u64] = &[1, 3, 6, 1, 2, 1, 4, 20, 1];
pub const IP_AD_ENT_ADDR: u64 = 1;
pub const IP_AD_ENT_IF_INDEX: u64 = 2;
pub const IP_AD_ENT_NET_MASK: u64 = 3;

/// ipCidrRouteEntry, indexed by dest.mask.tos.nextHop
pub const IP_CIDR_ROUTE_ENTRY: &[u64] = &[1, 3, 6, 1, 2, 1, 4, 24, 4, 1];
pub const CIDR_ROUTE_DEST: u64 = 1;
pub const CIDR_ROUTE_MASK: u64 = 2;
pub const CIDR_ROUTE_NEXT_HOP: u64 = 4;
pub const CIDR_ROUTE_PROTO: u64 = 7;
pub const CIDR_ROUTE_METRIC1: u64 = 11;

/// RFC1213 ipRouteEntry, indexed by destination only
pub const IP_ROUTE_ENTRY: &[u64] = &[1, 3, 6, 1, 2, 1, 4, 21, 1];
pub const ROUTE_DEST: u64 = 1;
pub const ROUTE_METRIC1: u64 = 3;
pub const ROUTE_NEXT_HOP: u64 = 7;
pub const ROUTE_PROTO: u64 = 9;
pub const ROUTE_MASK: u64 = 11;

/// SNMP error-status values the adapter reacts to
pub const ERROR_STATUS_NO_SUCH_NAME: u32 = 2;
pub const ERROR_STATUS_AUTHORIZATION: u32 = 16;

/// Dotted form of an OID, e.g. `1.3.6.1.4.1.9.1.1`
pub fn dotted(arcs: &[u64]) -> String {
    arcs.iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(".")
}
