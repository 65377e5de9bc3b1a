// src/topology/mod.rs
mod command;
mod route;
mod scan;

pub use command::{ProbeError, SystemToolRunner, ToolRunner};
pub use route::{
    detect_default_route, RouteResolver, UdpRouteResolver, ROUTE_CANDIDATES, UNREACHABLE_ERRNOS,
};
pub use scan::{
    merge_windows, parse_ifconfig_linux, parse_ifconfig_macos, parse_ip_addr, parse_ipconfig,
    parse_netsh, scan_interfaces, DeviceLabel, InterfaceMap, Platform,
};

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// A local address as seen by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEndpoint {
    pub ip: IpAddr,
    /// Device name; empty when the address was not found by a scan.
    pub label: String,
    pub link_up: bool,
    /// Carries the default route.
    pub is_external: bool,
}

impl NetworkEndpoint {
    fn discovered(ip: IpAddr, label: DeviceLabel) -> Self {
        Self {
            ip,
            label: label.device,
            link_up: label.link_up,
            is_external: false,
        }
    }

    fn local(ip: IpAddr) -> Self {
        Self {
            ip,
            label: String::new(),
            link_up: true,
            is_external: false,
        }
    }

    fn wildcard(ip: IpAddr) -> Self {
        Self {
            label: "all interfaces".to_string(),
            ..Self::local(ip)
        }
    }

    fn external(ip: IpAddr) -> Self {
        Self {
            ip,
            label: String::new(),
            link_up: true,
            is_external: true,
        }
    }

    /// Text shown next to the address, e.g. `eth0, external`.
    pub fn description(&self) -> String {
        let mut parts = Vec::new();
        if !self.label.is_empty() {
            parts.push(self.label.as_str());
        }
        if !self.link_up {
            parts.push("LINK-DOWN");
        }
        if self.is_external {
            parts.push("external");
        }
        if parts.is_empty() {
            return "local only".to_string();
        }
        parts.join(", ")
    }
}

/// Endpoints discovered by one probe run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    endpoints: BTreeMap<IpAddr, NetworkEndpoint>,
}

impl Topology {
    pub fn get(&self, ip: &IpAddr) -> Option<&NetworkEndpoint> {
        self.endpoints.get(ip)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoints ordered by description, then address.
    pub fn by_description(&self) -> Vec<&NetworkEndpoint> {
        let mut eps: Vec<_> = self.endpoints.values().collect();
        eps.sort_by_cached_key(|ep| (ep.description(), ep.ip));
        eps
    }

    fn insert(&mut self, endpoint: NetworkEndpoint) {
        self.endpoints.insert(endpoint.ip, endpoint);
    }

    /// Add listen addresses the scan could not see, e.g. IPv6 ones.
    ///
    /// A missing explicit address is added as-is. A wildcard is added only
    /// when no endpoint of its family was found, so its sockets still get
    /// announced.
    fn cover_unscanned(&mut self, listen_ips: &[IpAddr]) {
        for &ip in listen_ips {
            if self.endpoints.contains_key(&ip) {
                continue;
            }
            if ip.is_unspecified() {
                let seen = self.endpoints.keys().any(|k| k.is_ipv4() == ip.is_ipv4());
                if !seen {
                    self.insert(NetworkEndpoint::wildcard(ip));
                }
            } else if ip.is_loopback() {
                self.insert(NetworkEndpoint::local(ip));
            } else {
                self.insert(NetworkEndpoint::external(ip));
            }
        }
    }
}

/// Figures out which local addresses the configured interfaces map to.
pub struct TopologyProber {
    platform: Platform,
    runner: Arc<dyn ToolRunner>,
    resolver: Arc<dyn RouteResolver>,
}

impl TopologyProber {
    pub fn new(
        platform: Platform,
        runner: Arc<dyn ToolRunner>,
        resolver: Arc<dyn RouteResolver>,
    ) -> Self {
        Self {
            platform,
            runner,
            resolver,
        }
    }

    /// Prober for the running host using the real tools.
    pub fn system(command_timeout: std::time::Duration) -> Self {
        Self::new(
            Platform::current(),
            Arc::new(SystemToolRunner::new(command_timeout)),
            Arc::new(UdpRouteResolver),
        )
    }

    /// Describe the addresses reachable through `listen_ips`. Never fails;
    /// the worst case is an empty or generic topology.
    pub async fn probe(&self, listen_ips: &[IpAddr]) -> Topology {
        let mut topology = Topology::default();

        if listen_ips.iter().all(|ip| ip.is_loopback()) {
            for &ip in listen_ips {
                topology.insert(NetworkEndpoint::local(ip));
            }
            return topology;
        }

        let mut found = scan_interfaces(self.platform, self.runner.as_ref()).await;
        debug!(count = found.len(), "interfaces discovered");

        let wildcard = listen_ips.iter().any(|ip| ip.is_unspecified());
        if !wildcard {
            found.retain(|ip, _| listen_ips.contains(ip));
        }
        for (ip, label) in found {
            topology.insert(NetworkEndpoint::discovered(ip, label));
        }

        if let Some(route) = self.default_route().await {
            if wildcard || listen_ips.contains(&route) {
                match topology.endpoints.get_mut(&route) {
                    Some(ep) => ep.is_external = true,
                    None => topology.insert(NetworkEndpoint::external(route)),
                }
            }
        }

        if topology.is_empty() {
            for &ip in listen_ips.iter().filter(|ip| !ip.is_loopback()) {
                topology.insert(NetworkEndpoint::external(ip));
            }
        }
        topology.cover_unscanned(listen_ips);

        topology
    }

    async fn default_route(&self) -> Option<IpAddr> {
        let resolver = self.resolver.clone();
        match tokio::task::spawn_blocking(move || detect_default_route(resolver.as_ref())).await {
            Ok(route) => route,
            Err(e) => {
                debug!(error = %e, "route probe task failed");
                None
            }
        }
    }
}
