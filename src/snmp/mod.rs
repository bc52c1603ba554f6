//! SNMP protocol adapter - GET / WALK against a router, typed results

mod adapter;
pub mod decode;
pub mod oids;
mod types;

pub use adapter::{RouterProbe, SnmpAdapter};
pub use decode::SnmpValue;
pub use types::{InterfaceAddress, RouteEntry, RouteProtocol, SystemInfo};
