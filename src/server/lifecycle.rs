// src/server/lifecycle.rs
use super::binder::{bind_all, disposition, BindReport, Disposition};
use super::broker::{BrokerEvent, BrokerHandle};
use super::listener::{BindError, BoundSocket};
use crate::config::BindPolicy;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// `Created -> Bound -> Listening -> Stopped`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Bound,
    Listening,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("cannot {action} while the service is {state:?}")]
    InvalidState {
        action: &'static str,
        state: ServiceState,
    },

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("listen() failed on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: BindError,
    },
}

/// Owns the bound sockets from startup until shutdown.
///
/// `shutdown` takes `&self` and may be called from any thread, any number
/// of times.
#[derive(Debug)]
pub struct TcpService {
    sockets: Vec<Arc<BoundSocket>>,
    backlog: i32,
    policy: BindPolicy,
    broker: BrokerHandle,
    state: Mutex<ServiceState>,
}

impl TcpService {
    pub fn new(backlog: i32, policy: BindPolicy, broker: BrokerHandle) -> Self {
        Self {
            sockets: Vec::new(),
            backlog,
            policy,
            broker,
            state: Mutex::new(ServiceState::Created),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.lock_state()
    }

    pub fn sockets(&self) -> &[Arc<BoundSocket>] {
        &self.sockets
    }

    /// Bind every (interface, port) pair. A failed pass leaves the service
    /// `Stopped`; nothing is ever bound twice.
    pub fn bind(&mut self, interfaces: &[IpAddr], ports: &[u16]) -> Result<BindReport, ServiceError> {
        let state = self.state();
        if state != ServiceState::Created {
            return Err(ServiceError::InvalidState {
                action: "bind",
                state,
            });
        }

        match bind_all(interfaces, ports, self.policy) {
            Ok(report) => {
                self.sockets = report.sockets();
                *self.lock_state() = ServiceState::Bound;
                Ok(report)
            }
            Err(e) => {
                *self.lock_state() = ServiceState::Stopped;
                Err(e.into())
            }
        }
    }

    /// Start listening on every socket and hand each one to the broker.
    ///
    /// A socket that cannot listen is judged by the bind policy: skipped and
    /// closed when tolerated, otherwise every socket is closed and the
    /// service stops. Either way `run` happens at most once.
    pub fn run(&self) -> Result<(), ServiceError> {
        let mut state = self.lock_state();
        if *state != ServiceState::Bound {
            return Err(ServiceError::InvalidState {
                action: "start listening",
                state: *state,
            });
        }

        let mut listening = 0;
        for socket in &self.sockets {
            let addr = socket.local_addr();
            if let Err(e) = socket.listen(self.backlog) {
                let err = BindError::classify(socket.target(), e);
                match disposition(self.policy, &err) {
                    Disposition::Skip => {
                        warn!(pair = %socket.target(), "could not listen on {}: {}", addr, err);
                        socket.close();
                        continue;
                    }
                    Disposition::Abort => {
                        self.close_all();
                        *state = ServiceState::Stopped;
                        return Err(ServiceError::Listen { addr, source: err });
                    }
                }
            }

            info!(
                "listening @ {}  f{} p{}",
                addr,
                socket.descriptor(),
                std::process::id()
            );
            self.broker.notify(BrokerEvent::Listen(socket.clone()));
            listening += 1;
        }

        if listening == 0 && self.policy != BindPolicy::IgnoreAll {
            self.close_all();
            *state = ServiceState::Stopped;
            return Err(BindError::Exhausted.into());
        }

        *state = ServiceState::Listening;
        Ok(())
    }

    /// Close every socket. Safe to call repeatedly and concurrently.
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        if *state == ServiceState::Stopped {
            debug!("shutdown requested again; already stopped");
            return;
        }
        *state = ServiceState::Stopped;

        let closed = self.close_all();
        debug!(closed, total = self.sockets.len(), "listeners closed");
        info!("ok bye");
    }

    fn close_all(&self) -> usize {
        self.sockets.iter().filter(|s| s.close()).count()
    }

    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};
    use tokio::sync::mpsc::UnboundedReceiver;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn bound(
        ports: &[u16],
        policy: BindPolicy,
    ) -> (TcpService, UnboundedReceiver<BrokerEvent>) {
        let (broker, rx) = BrokerHandle::channel();
        let mut service = TcpService::new(16, policy, broker);
        service.bind(&[LOCALHOST], ports).unwrap();
        (service, rx)
    }

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn drain(rx: &mut UnboundedReceiver<BrokerEvent>) -> usize {
        let mut n = 0;
        while rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }

    #[test]
    fn starts_created_and_binds_once() {
        let (broker, _rx) = BrokerHandle::channel();
        let mut service = TcpService::new(16, BindPolicy::Strict, broker);
        assert_eq!(service.state(), ServiceState::Created);
        assert!(matches!(
            service.run(),
            Err(ServiceError::InvalidState { state: ServiceState::Created, .. })
        ));

        let report = service.bind(&[LOCALHOST], &[0]).unwrap();
        assert_eq!(report.bound(), 1);
        assert_eq!(service.state(), ServiceState::Bound);
        assert!(matches!(
            service.bind(&[LOCALHOST], &[0]),
            Err(ServiceError::InvalidState { .. })
        ));
        assert_eq!(service.sockets().len(), 1);
    }

    #[test]
    fn failed_bind_stops_the_service() {
        let (broker, _rx) = BrokerHandle::channel();
        let mut service = TcpService::new(16, BindPolicy::Strict, broker);
        let test_net = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));

        let err = service.bind(&[test_net], &[0]).unwrap_err();
        assert!(matches!(err, ServiceError::Bind(BindError::NoInterface { .. })));
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[test]
    fn runs_once() {
        let (service, mut rx) = bound(&[0, 0], BindPolicy::Strict);

        service.run().unwrap();
        assert_eq!(service.state(), ServiceState::Listening);
        assert_eq!(drain(&mut rx), 2);

        assert!(matches!(
            service.run(),
            Err(ServiceError::InvalidState { .. })
        ));
        assert_eq!(drain(&mut rx), 0);
    }

    #[test]
    fn duplicate_port_is_announced_once_when_tolerant() {
        // depending on the platform the second bind or the second listen fails
        let port = free_port();
        let (service, mut rx) = bound(&[port, port], BindPolicy::IgnoreFailed);

        service.run().unwrap();
        assert_eq!(service.state(), ServiceState::Listening);
        assert_eq!(drain(&mut rx), 1);

        assert!(service.run().is_err());
        assert_eq!(drain(&mut rx), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn listen_failure_under_strict_stops_and_closes_everything() {
        // SO_REUSEADDR lets both bind on linux; the clash shows at listen()
        let port = free_port();
        let (service, mut rx) = bound(&[port, port], BindPolicy::Strict);
        assert_eq!(service.sockets().len(), 2);

        let err = service.run().unwrap_err();
        assert!(
            matches!(err, ServiceError::Listen { source: BindError::Busy { .. }, .. }),
            "{err:?}"
        );
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(service.sockets().iter().all(|s| !s.is_open()));

        assert_eq!(drain(&mut rx), 1);
        assert!(service.run().is_err());
        assert_eq!(drain(&mut rx), 0);
    }

    #[test]
    fn shutdown_twice_is_harmless() {
        let (service, _rx) = bound(&[0, 0], BindPolicy::Strict);
        service.run().unwrap();
        service.shutdown();
        service.shutdown();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(service.sockets().iter().all(|s| s.is_closed() && !s.is_open()));
    }

    #[test]
    fn cannot_listen_after_shutdown() {
        let (service, mut rx) = bound(&[0, 0], BindPolicy::Strict);
        service.shutdown();
        assert!(service.run().is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn shutdown_from_another_thread() {
        let (service, _rx) = bound(&[0, 0], BindPolicy::Strict);
        let service = Arc::new(service);
        service.run().unwrap();

        let remote = service.clone();
        std::thread::spawn(move || remote.shutdown()).join().unwrap();
        service.shutdown();
        assert_eq!(service.state(), ServiceState::Stopped);
    }
}
