// ────────────────────────────────
// src/server/listener.rs
// Encapsulates low‑level TCP bind/listen/close so the broker only ever
// sees a ready socket.
// ────────────────────────────────
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, TryLockError};
use std::time::Duration;
use tracing::debug;

/// How long `close` waits when poking a listener to wake a blocked accept.
const WAKE_TIMEOUT: Duration = Duration::from_millis(250);

/// One (interface, port) pair requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenTarget {
    pub ip: IpAddr,
    pub port: u16,
}

impl ListenTarget {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for ListenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("port {} is busy on interface {}", .target.port, .target.ip)]
    Busy {
        target: ListenTarget,
        #[source]
        source: io::Error,
    },

    #[error("interface {} does not exist", .target.ip)]
    NoInterface {
        target: ListenTarget,
        #[source]
        source: io::Error,
    },

    #[error("could not listen on {target}: {source}")]
    Fatal {
        target: ListenTarget,
        #[source]
        source: io::Error,
    },

    #[error("could not listen on any of the given interfaces")]
    Exhausted,
}

impl BindError {
    /// Sort a bind() failure into busy / missing interface / anything else.
    pub fn classify(target: ListenTarget, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::AddrInUse => Self::Busy { target, source },
            io::ErrorKind::AddrNotAvailable => Self::NoInterface { target, source },
            _ => Self::Fatal { target, source },
        }
    }

    /// Busy ports and missing interfaces may be skipped by a tolerant policy.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::NoInterface { .. })
    }

    pub fn target(&self) -> Option<ListenTarget> {
        match self {
            Self::Busy { target, .. }
            | Self::NoInterface { target, .. }
            | Self::Fatal { target, .. } => Some(*target),
            Self::Exhausted => None,
        }
    }
}

/// A bound (and later listening) TCP socket.
///
/// Shared between the lifecycle, which may close it at any time, and the
/// broker, which accepts on it. `close` releases the descriptor right away
/// unless an accept is in flight; that accept is woken and releases it on
/// its way out.
#[derive(Debug)]
pub struct BoundSocket {
    target: ListenTarget,
    local_addr: SocketAddr,
    socket: RwLock<Option<Socket>>,
    closed: AtomicBool,
}

impl BoundSocket {
    /// Create, configure and bind a socket for `target`. Does not listen.
    pub fn bind(target: ListenTarget) -> Result<Self, BindError> {
        let addr = target.socket_addr();
        let fatal = |source| BindError::Fatal { target, source };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(fatal)?;
        socket.set_reuse_address(true).map_err(fatal)?;
        if let Err(e) = socket.set_nodelay(true) {
            debug!(%target, error = %e, "could not disable nagle");
        }

        socket
            .bind(&addr.into())
            .map_err(|e| BindError::classify(target, e))?;

        let local_addr = socket
            .local_addr()
            .ok()
            .and_then(|a| a.as_socket())
            .unwrap_or(addr);

        Ok(Self {
            target,
            local_addr,
            socket: RwLock::new(Some(socket)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn target(&self) -> ListenTarget {
        self.target
    }

    /// Address actually bound; differs from the target when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        match self.handle().as_ref() {
            Some(socket) if !self.is_closed() => socket.listen(backlog),
            _ => Err(closed_error()),
        }
    }

    /// Accept one connection. Fails cleanly once the socket has been closed,
    /// including when the close happens while this call is blocked.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let accepted = {
            let guard = self.handle();
            match guard.as_ref() {
                Some(socket) if !self.is_closed() => socket.accept(),
                _ => return Err(closed_error()),
            }
        };

        if self.is_closed() {
            self.release();
            return Err(closed_error());
        }

        let (conn, peer) = accepted?;
        let peer = peer
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-inet peer"))?;
        Ok((conn.into(), peer))
    }

    /// Returns `true` only for the call that actually closed the socket.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(socket) = self.handle().as_ref() {
            // not-connected is the normal answer for a listener on some platforms
            let _ = socket.shutdown(Shutdown::Both);
        }
        if !self.release() {
            self.wake_acceptor();
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// `false` once the descriptor has been released.
    pub fn is_open(&self) -> bool {
        self.handle().is_some()
    }

    /// Raw descriptor for log lines, `-1` once released.
    #[cfg(unix)]
    pub fn descriptor(&self) -> i64 {
        use std::os::unix::io::AsRawFd;
        self.handle().as_ref().map_or(-1, |s| s.as_raw_fd() as i64)
    }

    #[cfg(windows)]
    pub fn descriptor(&self) -> i64 {
        use std::os::windows::io::AsRawSocket;
        self.handle().as_ref().map_or(-1, |s| s.as_raw_socket() as i64)
    }

    fn handle(&self) -> RwLockReadGuard<'_, Option<Socket>> {
        self.socket.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the descriptor unless an accept is still using it.
    fn release(&self) -> bool {
        match self.socket.try_write() {
            Ok(mut guard) => {
                guard.take();
                true
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().take();
                true
            }
            Err(TryLockError::WouldBlock) => false,
        }
    }

    /// shutdown() does not wake a blocked accept everywhere (BSD, Windows);
    /// a throwaway connection does.
    fn wake_acceptor(&self) {
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr {
                SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        if let Err(e) = TcpStream::connect_timeout(&addr, WAKE_TIMEOUT) {
            debug!(%addr, error = %e, "wake-up connection failed");
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "listener has been closed")
}
