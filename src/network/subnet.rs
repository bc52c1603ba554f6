//! Subnet arithmetic shared by the classifier and the crawler

use anyhow::{Context, Result};
use ipnetwork::{Ipv4Network, ipv4_mask_to_prefix};
use std::net::Ipv4Addr;

/// Addresses that never identify a neighbouring router.
pub fn is_ignored_address(ip: Ipv4Addr) -> bool {
    ip.is_unspecified() || ip.is_loopback()
}

/// Network containing `ip` under `netmask`, normalised to its base address.
pub fn network_of(ip: Ipv4Addr, netmask: Ipv4Addr) -> Result<Ipv4Network> {
    let prefix = ipv4_mask_to_prefix(netmask)
        .with_context(|| format!("Non-contiguous netmask {}", netmask))?;
    let network = Ipv4Network::new(ip, prefix)
        .with_context(|| format!("Invalid network {}/{}", ip, prefix))?;

    Ipv4Network::new(network.network(), prefix).context("Failed to normalise network")
}

/// `a.b.c.d/len` form of a destination plus mask.
pub fn cidr_string(destination: Ipv4Addr, netmask: Ipv4Addr) -> Result<String> {
    Ok(network_of(destination, netmask)?.to_string())
}

/// Network an interface address shares with its neighbours. Host routes
/// (/32) and ignored addresses share nothing.
pub fn shared_network(ip: Ipv4Addr, netmask: Ipv4Addr) -> Option<Ipv4Network> {
    if is_ignored_address(ip) {
        return None;
    }
    network_of(ip, netmask).ok().filter(|net| net.prefix() < 32)
}

/// Parses and validates the address a crawl starts from.
pub fn parse_root_address(raw: &str) -> Option<Ipv4Addr> {
    let ip: Ipv4Addr = raw.trim().parse().ok()?;
    if ip.is_unspecified() || ip.is_broadcast() || ip.is_multicast() {
        return None;
    }
    Some(ip)
}

#[cfg(test)]
#[path = "subnet_tests.rs"]
mod subnet_tests;
