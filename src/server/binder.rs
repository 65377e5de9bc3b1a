// src/server/binder.rs
use super::listener::{BindError, BoundSocket, ListenTarget};
use crate::config::BindPolicy;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of attempting one (interface, port) pair.
#[derive(Debug)]
pub enum BindOutcome {
    Bound(Arc<BoundSocket>),
    Skipped(BindError),
    Fatal(BindError),
}

/// What to do with a failed binding under a given policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Disposition {
    Skip,
    Abort,
}

pub(super) fn disposition(policy: BindPolicy, err: &BindError) -> Disposition {
    match policy {
        _ if !err.is_recoverable() => Disposition::Abort,
        BindPolicy::Strict => Disposition::Abort,
        BindPolicy::IgnoreFailed | BindPolicy::IgnoreAll => Disposition::Skip,
    }
}

/// Outcome of a whole startup binding pass. Never contains a `Fatal` outcome;
/// those abort the pass instead.
#[derive(Debug, Default)]
pub struct BindReport {
    outcomes: Vec<(ListenTarget, BindOutcome)>,
}

impl BindReport {
    pub fn outcomes(&self) -> &[(ListenTarget, BindOutcome)] {
        &self.outcomes
    }

    /// Bound sockets in the order they were bound.
    pub fn sockets(&self) -> Vec<Arc<BoundSocket>> {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                BindOutcome::Bound(socket) => Some(socket.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn requested(&self) -> usize {
        self.outcomes.len()
    }

    pub fn bound(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, BindOutcome::Bound(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, BindOutcome::Skipped(_)))
            .count()
    }

    /// Ports actually serving `ip`.
    ///
    /// An address that was a bind target answers with its own bindings,
    /// even if none succeeded. Any other address is served by whatever bound
    /// on the wildcard address of its family.
    pub fn served_ports(&self, ip: IpAddr) -> BTreeSet<u16> {
        let requested_directly = self.outcomes.iter().any(|(t, _)| t.ip == ip);

        self.outcomes
            .iter()
            .filter_map(|(target, outcome)| match outcome {
                BindOutcome::Bound(socket) => Some((target, socket.local_addr().port())),
                _ => None,
            })
            .filter(|(target, _)| {
                if requested_directly {
                    target.ip == ip
                } else {
                    target.ip.is_unspecified() && target.ip.is_ipv4() == ip.is_ipv4()
                }
            })
            .map(|(_, port)| port)
            .collect()
    }
}

/// Bind every (interface, port) pair, interface-major, under `policy`.
pub fn bind_all(
    interfaces: &[IpAddr],
    ports: &[u16],
    policy: BindPolicy,
) -> Result<BindReport, BindError> {
    let mut report = BindReport::default();

    for &ip in interfaces {
        for &port in ports {
            let target = ListenTarget::new(ip, port);
            let outcome = match BoundSocket::bind(target) {
                Ok(socket) => {
                    debug!(%target, local = %socket.local_addr(), "bound");
                    BindOutcome::Bound(Arc::new(socket))
                }
                Err(e) => match disposition(policy, &e) {
                    Disposition::Skip => {
                        warn!(%target, "could not listen on {}: {}", target, e);
                        BindOutcome::Skipped(e)
                    }
                    Disposition::Abort => BindOutcome::Fatal(e),
                },
            };

            match outcome {
                BindOutcome::Fatal(e) => {
                    close_all(&report);
                    return Err(e);
                }
                outcome => report.outcomes.push((target, outcome)),
            }
        }
    }

    if report.bound() == 0 && policy != BindPolicy::IgnoreAll {
        return Err(BindError::Exhausted);
    }

    if report.bound() != report.requested() {
        info!(
            "only {} of {} requested bindings are listening",
            report.bound(),
            report.requested()
        );
    }

    Ok(report)
}

fn close_all(report: &BindReport) {
    for socket in report.sockets() {
        socket.close();
    }
}
