#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use nexus_routemap::{
    InterfaceAddress, ProbeError, RouteEntry, RouteProtocol, RouterProbe, SnmpCredentials,
    SystemInfo,
};

pub fn ip(s: &str) -> Ipv4Addr {
    s.parse().expect("test address should parse")
}

/// What a scripted host answers to the four adapter queries
#[derive(Debug, Clone)]
pub struct ScriptedHost {
    pub system: Result<SystemInfo, ProbeError>,
    pub forwarding: bool,
    pub interfaces: Vec<InterfaceAddress>,
    pub routes: Vec<RouteEntry>,
    pub routes_error: Option<ProbeError>,
}

impl ScriptedHost {
    pub fn router(name: &str) -> Self {
        Self {
            system: Ok(SystemInfo {
                sys_descr: Some(format!("Cisco IOS Software, {} router", name)),
                sys_object_id: Some("1.3.6.1.4.1.9.1.1".to_string()),
                sys_name: Some(name.to_string()),
            }),
            forwarding: true,
            interfaces: Vec::new(),
            routes: Vec::new(),
            routes_error: None,
        }
    }

    pub fn failing(err: ProbeError) -> Self {
        Self {
            system: Err(err),
            forwarding: false,
            interfaces: Vec::new(),
            routes: Vec::new(),
            routes_error: None,
        }
    }

    pub fn iface(mut self, addr: &str, mask: &str) -> Self {
        self.interfaces.push(InterfaceAddress {
            if_index: Some(self.interfaces.len() as i64 + 1),
            ip: ip(addr),
            netmask: ip(mask),
        });
        self
    }

    pub fn routes_fail(mut self, err: ProbeError) -> Self {
        self.routes_error = Some(err);
        self
    }

    pub fn route(mut self, dest: &str, mask: &str, next_hop: Option<&str>) -> Self {
        self.routes.push(RouteEntry {
            destination: ip(dest),
            netmask: ip(mask),
            next_hop: next_hop.map(ip),
            protocol: if next_hop.is_some() {
                RouteProtocol::Ospf
            } else {
                RouteProtocol::Connected
            },
            metric: Some(10),
            admin_distance: None,
        });
        self
    }
}

type QueryHook = Box<dyn Fn(Ipv4Addr) + Send + Sync>;

/// `RouterProbe` answering from a script. Unknown addresses time out.
#[derive(Default)]
pub struct FakeProbe {
    hosts: HashMap<Ipv4Addr, ScriptedHost>,
    queries: Mutex<HashMap<Ipv4Addr, usize>>,
    hook: Option<QueryHook>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, addr: &str, host: ScriptedHost) -> Self {
        self.hosts.insert(ip(addr), host);
        self
    }

    /// Called with the address every time a host's system group is read.
    pub fn on_query(mut self, hook: impl Fn(Ipv4Addr) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn query_count(&self, addr: &str) -> usize {
        self.queries
            .lock()
            .expect("query lock should not be poisoned")
            .get(&ip(addr))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_queries(&self) -> usize {
        self.queries
            .lock()
            .expect("query lock should not be poisoned")
            .values()
            .sum()
    }

    fn scripted(&self, ip: Ipv4Addr) -> Result<&ScriptedHost, ProbeError> {
        self.hosts
            .get(&ip)
            .ok_or(ProbeError::Unreachable { ip, attempts: 2 })
    }
}

#[async_trait]
impl RouterProbe for FakeProbe {
    async fn get_system_info(
        &self,
        ip: Ipv4Addr,
        _creds: &SnmpCredentials,
    ) -> Result<SystemInfo, ProbeError> {
        *self
            .queries
            .lock()
            .expect("query lock should not be poisoned")
            .entry(ip)
            .or_default() += 1;
        if let Some(hook) = &self.hook {
            hook(ip);
        }
        self.scripted(ip)?.system.clone()
    }

    async fn get_ip_forwarding(
        &self,
        ip: Ipv4Addr,
        _creds: &SnmpCredentials,
    ) -> Result<bool, ProbeError> {
        Ok(self.scripted(ip)?.forwarding)
    }

    async fn get_interface_addresses(
        &self,
        ip: Ipv4Addr,
        _creds: &SnmpCredentials,
    ) -> Result<Vec<InterfaceAddress>, ProbeError> {
        Ok(self.scripted(ip)?.interfaces.clone())
    }

    async fn get_routing_entries(
        &self,
        ip: Ipv4Addr,
        _creds: &SnmpCredentials,
    ) -> Result<Vec<RouteEntry>, ProbeError> {
        let host = self.scripted(ip)?;
        match &host.routes_error {
            Some(err) => Err(err.clone()),
            None => Ok(host.routes.clone()),
        }
    }
}

/// Four routers in a line joined by /30 links:
/// 10.0.12.1 - 10.0.12.2|10.0.23.1 - 10.0.23.2|10.0.34.1 - 10.0.34.2
pub fn chain_probe() -> FakeProbe {
    FakeProbe::new()
        .host(
            "10.0.12.1",
            ScriptedHost::router("r1")
                .iface("10.0.12.1", "255.255.255.252")
                .route("10.0.12.0", "255.255.255.252", None)
                .route("0.0.0.0", "0.0.0.0", Some("10.0.12.2")),
        )
        .host(
            "10.0.12.2",
            ScriptedHost::router("r2")
                .iface("10.0.12.2", "255.255.255.252")
                .iface("10.0.23.1", "255.255.255.252")
                .route("10.0.12.0", "255.255.255.252", None)
                .route("10.0.23.0", "255.255.255.252", None)
                .route("10.0.34.0", "255.255.255.252", Some("10.0.23.2")),
        )
        .host(
            "10.0.23.2",
            ScriptedHost::router("r3")
                .iface("10.0.23.2", "255.255.255.252")
                .iface("10.0.34.1", "255.255.255.252")
                .route("10.0.12.0", "255.255.255.252", Some("10.0.23.1"))
                .route("10.0.34.0", "255.255.255.252", None)
                .route("192.168.4.0", "255.255.255.0", Some("10.0.34.2")),
        )
        .host(
            "10.0.34.2",
            ScriptedHost::router("r4")
                .iface("10.0.34.2", "255.255.255.252")
                .iface("192.168.4.1", "255.255.255.0")
                .route("0.0.0.0", "0.0.0.0", Some("10.0.34.1")),
        )
}

pub fn creds() -> SnmpCredentials {
    SnmpCredentials::v2c("public")
}
