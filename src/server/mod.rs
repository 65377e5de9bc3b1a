pub mod binder;
pub mod broker;
pub mod builder;
pub mod lifecycle;
pub mod listener;

pub use binder::{bind_all, BindOutcome, BindReport};
pub use broker::{BrokerEvent, BrokerHandle};
pub use builder::{ServiceBuilder, Startup};
pub use lifecycle::{ServiceError, ServiceState, TcpService};
pub use listener::{BindError, BoundSocket, ListenTarget};
