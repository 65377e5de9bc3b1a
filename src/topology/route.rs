// src/topology/route.rs
//! Default-route detection.
//!
//! Connecting a UDP socket sends nothing but makes the OS pick a route and a
//! source address for it. Probing a few broadcast-style destinations tells us
//! which local address would carry non-local traffic, without privileges and
//! without touching the network.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use tracing::debug;

/// Probe destinations, in priority order. Port 1 is arbitrary.
pub const ROUTE_CANDIDATES: [Ipv4Addr; 4] = [
    Ipv4Addr::new(10, 255, 255, 255),
    Ipv4Addr::new(172, 31, 255, 255),
    Ipv4Addr::new(192, 168, 255, 255),
    Ipv4Addr::new(239, 255, 255, 255),
];

/// errno values meaning "no route to this candidate", which is expected.
#[cfg(unix)]
pub const UNREACHABLE_ERRNOS: &[i32] = &[libc::ENETUNREACH, libc::EHOSTUNREACH];
#[cfg(windows)]
pub const UNREACHABLE_ERRNOS: &[i32] = &[10051, 10065];
#[cfg(not(any(unix, windows)))]
pub const UNREACHABLE_ERRNOS: &[i32] = &[];

/// Resolves the local source address the OS would use to reach `dest`.
pub trait RouteResolver: Send + Sync {
    fn source_for(&self, dest: SocketAddr) -> io::Result<IpAddr>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UdpRouteResolver;

impl RouteResolver for UdpRouteResolver {
    fn source_for(&self, dest: SocketAddr) -> io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(dest)?;
        Ok(socket.local_addr()?.ip())
    }
}

/// Source address of the default route, if any candidate is routable.
pub fn detect_default_route(resolver: &dyn RouteResolver) -> Option<IpAddr> {
    for candidate in ROUTE_CANDIDATES {
        let dest = SocketAddr::from((candidate, 1));
        match resolver.source_for(dest) {
            Ok(source) => return Some(source),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!("eaccess {} (trying next)", candidate);
            }
            Err(e) if is_unreachable(&e) => {}
            Err(e) => {
                debug!("route lookup failed; err {}", e);
            }
        }
    }
    debug!("no default route found");
    None
}

fn is_unreachable(e: &io::Error) -> bool {
    e.raw_os_error()
        .is_some_and(|code| UNREACHABLE_ERRNOS.contains(&code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Answers each probe from a script, recording what was asked.
    struct Scripted {
        answers: Mutex<Vec<io::Result<IpAddr>>>,
        asked: Mutex<Vec<SocketAddr>>,
    }

    impl Scripted {
        fn new(answers: Vec<io::Result<IpAddr>>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().rev().collect()),
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    impl RouteResolver for Scripted {
        fn source_for(&self, dest: SocketAddr) -> io::Result<IpAddr> {
            self.asked.lock().unwrap().push(dest);
            self.answers
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(io::ErrorKind::Other.into()))
        }
    }

    fn unreachable() -> io::Result<IpAddr> {
        Err(io::Error::from_raw_os_error(UNREACHABLE_ERRNOS[0]))
    }

    #[test]
    fn third_candidate_wins() {
        let resolver = Scripted::new(vec![
            unreachable(),
            Err(io::ErrorKind::PermissionDenied.into()),
            Ok("192.168.1.5".parse().unwrap()),
        ]);

        let route = detect_default_route(&resolver);
        assert_eq!(route, Some("192.168.1.5".parse().unwrap()));

        let asked = resolver.asked.lock().unwrap();
        assert_eq!(asked.len(), 3);
        assert_eq!(asked[2], SocketAddr::from((ROUTE_CANDIDATES[2], 1)));
    }

    #[test]
    fn no_candidate_means_no_route() {
        let resolver = Scripted::new(vec![
            unreachable(),
            unreachable(),
            Err(io::ErrorKind::Other.into()),
            unreachable(),
        ]);
        assert_eq!(detect_default_route(&resolver), None);
        assert_eq!(resolver.asked.lock().unwrap().len(), ROUTE_CANDIDATES.len());
    }

    #[test]
    fn real_resolver_does_not_panic() {
        // result depends on the host; only the contract is checked
        let _ = detect_default_route(&UdpRouteResolver);
    }
}
