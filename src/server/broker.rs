// src/server/broker.rs
// Hand-off of listening sockets to the dispatch layer.
use super::listener::BoundSocket;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// The socket is listening; the broker may start accepting on it.
    Listen(Arc<BoundSocket>),
}

impl BrokerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerEvent::Listen(_) => "listen",
        }
    }
}

/// Sending side of the broker channel. Notifications are fire-and-forget.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<BrokerEvent>,
}

impl BrokerHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BrokerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, event: BrokerEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            tracing::warn!("broker is gone; dropped {} event", kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::listener::ListenTarget;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn delivers_in_order() {
        let (broker, mut rx) = BrokerHandle::channel();
        let target = ListenTarget::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let a = Arc::new(BoundSocket::bind(target).unwrap());
        let b = Arc::new(BoundSocket::bind(target).unwrap());

        broker.notify(BrokerEvent::Listen(a.clone()));
        broker.notify(BrokerEvent::Listen(b.clone()));

        let BrokerEvent::Listen(first) = rx.recv().await.unwrap();
        let BrokerEvent::Listen(second) = rx.recv().await.unwrap();
        assert!(Arc::ptr_eq(&first, &a));
        assert!(Arc::ptr_eq(&second, &b));
    }

    #[test]
    fn notify_after_receiver_dropped_does_not_panic() {
        let (broker, rx) = BrokerHandle::channel();
        drop(rx);
        let target = ListenTarget::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let socket = Arc::new(BoundSocket::bind(target).unwrap());
        broker.notify(BrokerEvent::Listen(socket));
    }
}
