//! Frontier, visited set and adjacency bookkeeping for one crawl
//!
//! Pure state machine: the live loop and frontier reconstruction drive the
//! same `next_target` / `absorb` calls, so a replayed crawl ends up in
//! exactly the state the interrupted one had.

use ipnetwork::Ipv4Network;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;

use crate::database::{EdgeReason, RouterInterfaceRecord, RouterRoute};
use crate::network::{is_ignored_address, shared_network};

/// What the crawl needs to know about one recorded host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    pub ip: Ipv4Addr,
    pub interfaces: Vec<(Ipv4Addr, Ipv4Addr)>,
    pub next_hops: Vec<Ipv4Addr>,
}

impl HostFacts {
    /// Builds facts from persisted rows. Rows that do not parse are skipped.
    pub fn from_records(
        ip: Ipv4Addr,
        interfaces: &[RouterInterfaceRecord],
        routes: &[RouterRoute],
    ) -> Self {
        let interfaces = interfaces
            .iter()
            .filter_map(|iface| Some((iface.ip.parse().ok()?, iface.netmask.parse().ok()?)))
            .collect();
        let next_hops = routes
            .iter()
            .filter_map(|route| route.next_hop.as_deref())
            .filter_map(|hop| hop.parse().ok())
            .collect();

        Self {
            ip,
            interfaces,
            next_hops,
        }
    }
}

/// An edge the crawler should persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlannedEdge {
    pub from: Ipv4Addr,
    pub to: Ipv4Addr,
    pub reason: EdgeReason,
}

/// Result of pulling the next address off the frontier
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NextTarget {
    /// Address to query, `None` when the frontier ran dry
    pub ip: Option<Ipv4Addr>,
    /// Edges resolved while skipping aliases of recorded routers
    pub edges: Vec<PlannedEdge>,
}

#[derive(Debug, Default)]
pub struct CrawlState {
    frontier: VecDeque<Ipv4Addr>,
    visited: HashSet<Ipv4Addr>,
    recorded: HashSet<Ipv4Addr>,
    /// interface address -> router that owns it
    aliases: HashMap<Ipv4Addr, Ipv4Addr>,
    /// shared networks of recorded routers, in absorb order
    networks: Vec<(Ipv4Network, Ipv4Addr)>,
    /// pending candidate -> routers that named it as a next hop
    referrers: HashMap<Ipv4Addr, Vec<Ipv4Addr>>,
}

impl CrawlState {
    pub fn seeded(root: Ipv4Addr) -> Self {
        let mut state = Self::default();
        state.visited.insert(root);
        state.frontier.push_back(root);
        state
    }

    pub fn has_pending(&self) -> bool {
        !self.frontier.is_empty()
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    pub fn recorded_len(&self) -> usize {
        self.recorded.len()
    }

    pub fn is_recorded(&self, ip: Ipv4Addr) -> bool {
        self.recorded.contains(&ip)
    }

    /// Router an address belongs to, if it is known.
    fn resolve(&self, ip: Ipv4Addr) -> Option<Ipv4Addr> {
        if self.recorded.contains(&ip) {
            Some(ip)
        } else {
            self.aliases.get(&ip).copied()
        }
    }

    /// Pops addresses until one needs querying. Already-recorded hosts are
    /// dropped; aliases of recorded routers turn their referrers into edges.
    pub fn next_target(&mut self) -> NextTarget {
        let mut edges = Vec::new();

        while let Some(ip) = self.frontier.pop_front() {
            if self.recorded.contains(&ip) {
                continue;
            }
            if let Some(&router) = self.aliases.get(&ip) {
                for referrer in self.referrers.remove(&ip).unwrap_or_default() {
                    if referrer != router {
                        edges.push(PlannedEdge {
                            from: referrer,
                            to: router,
                            reason: EdgeReason::NextHop,
                        });
                    }
                }
                continue;
            }
            return NextTarget {
                ip: Some(ip),
                edges,
            };
        }

        NextTarget { ip: None, edges }
    }

    /// Records a queried host and returns the edges that became resolvable.
    pub fn absorb(&mut self, facts: &HostFacts) -> Vec<PlannedEdge> {
        let host = facts.ip;
        let mut edges: Vec<PlannedEdge> = Vec::new();
        let mut linked: HashSet<(Ipv4Addr, Ipv4Addr)> = HashSet::new();
        let mut push = |edges: &mut Vec<PlannedEdge>, from, to, reason| {
            if from != to && linked.insert((from, to)) {
                edges.push(PlannedEdge { from, to, reason });
            }
        };

        self.recorded.insert(host);
        self.visited.insert(host);

        let own: HashSet<Ipv4Addr> = std::iter::once(host)
            .chain(facts.interfaces.iter().map(|(ip, _)| *ip))
            .collect();

        for (ip, _) in &facts.interfaces {
            if !is_ignored_address(*ip) && *ip != host && !self.recorded.contains(ip) {
                self.aliases.entry(*ip).or_insert(host);
                self.visited.insert(*ip);
            }
        }

        // Routers that named this host (or one of its addresses) earlier
        let mut named: Vec<Ipv4Addr> = vec![host];
        named.extend(facts.interfaces.iter().map(|(ip, _)| *ip));
        for addr in named {
            if self.aliases.get(&addr).is_some_and(|owner| *owner != host) {
                continue;
            }
            for referrer in self.referrers.remove(&addr).unwrap_or_default() {
                push(&mut edges, referrer, host, EdgeReason::NextHop);
            }
        }

        let mut seen_hops = HashSet::new();
        for hop in &facts.next_hops {
            let hop = *hop;
            if is_ignored_address(hop) || own.contains(&hop) || !seen_hops.insert(hop) {
                continue;
            }

            if let Some(router) = self.resolve(hop) {
                push(&mut edges, host, router, EdgeReason::NextHop);
            } else {
                if self.visited.insert(hop) {
                    self.frontier.push_back(hop);
                }
                let referrers = self.referrers.entry(hop).or_default();
                if !referrers.contains(&host) {
                    referrers.push(host);
                }
            }
        }

        let mut own_networks = Vec::new();
        for (ip, netmask) in &facts.interfaces {
            let Some(net) = shared_network(*ip, *netmask) else {
                continue;
            };
            for (other_net, other) in &self.networks {
                if *other_net == net && *other != host {
                    push(&mut edges, host, *other, EdgeReason::SharedSubnet);
                }
            }
            if !own_networks.contains(&net) {
                own_networks.push(net);
            }
        }
        self.networks
            .extend(own_networks.into_iter().map(|net| (net, host)));

        edges
    }
}
