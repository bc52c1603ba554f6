//! Route collection over a vendor CLI for routers whose SNMP agent does not
//! expose a routing table. Only the data contract lives here; transports
//! implement `CliRouteFetcher`.

use async_trait::async_trait;
use std::collections::HashSet;
use std::net::Ipv4Addr;

use super::Crawler;
use crate::database::{self, CliCredential, RouteSource, RouterNetwork, RouterRoute};
use crate::error::{DiscoveryError, DiscoveryResult, ProbeError};
use crate::network::cidr_string;
use crate::snmp::RouteEntry;

/// Fetches a router's routing table over its management CLI.
#[async_trait]
pub trait CliRouteFetcher: Send + Sync {
    async fn fetch_routes(
        &self,
        ip: Ipv4Addr,
        credential: &CliCredential,
    ) -> Result<Vec<RouteEntry>, ProbeError>;
}

fn to_rows(ip: Ipv4Addr, entries: &[RouteEntry]) -> (Vec<RouterRoute>, Vec<RouterNetwork>) {
    let mut routes = Vec::with_capacity(entries.len());
    let mut networks = Vec::new();
    let mut seen = HashSet::new();

    for entry in entries {
        let destination = match cidr_string(entry.destination, entry.netmask) {
            Ok(cidr) => cidr,
            Err(e) => {
                log_warn!("Dropping CLI route on {}: {:#}", ip, e);
                continue;
            }
        };

        if entry.netmask != Ipv4Addr::UNSPECIFIED && seen.insert(destination.clone()) {
            networks.push(RouterNetwork {
                cidr: destination.clone(),
                is_local: entry.next_hop.is_none(),
            });
        }

        routes.push(RouterRoute {
            destination,
            next_hop: entry.next_hop.map(|hop| hop.to_string()),
            protocol: entry.protocol.as_str().to_string(),
            admin_distance: entry.admin_distance,
            metric: entry.metric,
            source: RouteSource::Cli,
        });
    }

    (routes, networks)
}

impl Crawler {
    /// Pulls routes for an already-recorded router through `fetcher` and
    /// stores them tagged `source = cli`. Returns the number of rows written.
    ///
    /// Refused for routers that already hold SNMP routes.
    pub async fn fetch_routes_via_cli(
        &self,
        run_id: i64,
        router_ip: &str,
        credential: &CliCredential,
        fetcher: &dyn CliRouteFetcher,
    ) -> DiscoveryResult<usize> {
        let ip: Ipv4Addr = router_ip
            .trim()
            .parse()
            .map_err(|_| DiscoveryError::InvalidAddress(router_ip.to_string()))?;
        let router_key = ip.to_string();

        {
            let conn = self.conn()?;
            let status = database::get_run_status(&conn, run_id)
                .map_err(DiscoveryError::store)?
                .ok_or(DiscoveryError::RunNotFound(run_id))?;

            if !database::router_exists(&conn, run_id, &router_key)
                .map_err(DiscoveryError::store)?
            {
                return Err(DiscoveryError::RouterNotFound {
                    run_id,
                    ip: router_key,
                });
            }

            let snmp_routes =
                database::get_router_routes(&conn, run_id, &router_key, Some(RouteSource::Snmp))
                    .map_err(DiscoveryError::store)?;
            if !snmp_routes.is_empty() {
                return Err(DiscoveryError::InvalidTransition {
                    run_id,
                    status,
                    action: "fetch CLI routes for a router with SNMP routes in",
                });
            }
        }

        let entries = fetcher.fetch_routes(ip, credential).await?;
        let (routes, networks) = to_rows(ip, &entries);

        let conn = self.conn()?;
        let written = database::append_routes(&conn, run_id, &router_key, &routes, &networks)
            .map_err(DiscoveryError::store)?;

        log_stderr!(run_id, ip = %ip, routes = written, "Stored CLI routes");
        Ok(written)
    }
}
