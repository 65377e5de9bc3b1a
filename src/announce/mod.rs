// src/announce/mod.rs
// Operator-facing "available @ ..." lines.
pub mod title;

pub use title::{emit_title, render_title, requested_tags, RoleTagTable, NO_MEMBERS};

use crate::config::TlsMode;
use crate::server::BindReport;
use crate::topology::Topology;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn for_port(port: u16, tls: TlsMode) -> Self {
        match tls {
            TlsMode::HttpOnly => Scheme::Http,
            TlsMode::HttpsOnly => Scheme::Https,
            TlsMode::Auto if port == 443 => Scheme::Https,
            TlsMode::Auto => Scheme::Http,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        })
    }
}

/// One endpoint that is actually serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub ip: IpAddr,
    pub port: u16,
    pub scheme: Scheme,
    pub description: String,
    pub is_external: bool,
}

impl fmt::Display for Announcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "available @ {}://{}/  ({})",
            self.scheme,
            SocketAddr::new(self.ip, self.port),
            self.description
        )
    }
}

/// One announcement per serving (endpoint, port), ordered by endpoint
/// description and then port. Ports that did not bind are left out.
pub fn announcements(topology: &Topology, report: &BindReport, tls: TlsMode) -> Vec<Announcement> {
    topology
        .by_description()
        .into_iter()
        .flat_map(|ep| {
            let description = ep.description();
            report
                .served_ports(ep.ip)
                .into_iter()
                .map(move |port| Announcement {
                    ip: ep.ip,
                    port,
                    scheme: Scheme::for_port(port, tls),
                    description: description.clone(),
                    is_external: ep.is_external,
                })
        })
        .collect()
}

/// Log every announcement.
pub fn log_announcements(lines: &[Announcement], tls: TlsMode) {
    for line in lines {
        info!("{}", line);
    }
    if tls == TlsMode::Auto && lines.iter().any(|l| l.scheme == Scheme::Http) {
        info!("https is detected per connection, so the http addresses above also accept tls");
    }
}
