// ────────────────────────────────
// src/server/builder.rs
// ────────────────────────────────
use super::binder::BindReport;
use super::broker::BrokerHandle;
use super::lifecycle::{ServiceError, TcpService};
use crate::announce::{self, Announcement};
use crate::config::Config;
use crate::topology::{Topology, TopologyProber};

/// Everything startup produced, for callers that want more than the service.
#[derive(Debug)]
pub struct Startup {
    pub service: TcpService,
    pub report: BindReport,
    pub topology: Topology,
    pub announcements: Vec<Announcement>,
    pub title: Option<String>,
}

/// Builder pattern so `main.rs` can inject its broker channel (and tests
/// their fake tools).
pub struct ServiceBuilder {
    config: Config,
    broker: BrokerHandle,
    prober: TopologyProber,
    emit_title: bool,
}

impl ServiceBuilder {
    pub fn new(config: Config, broker: BrokerHandle) -> Self {
        let prober = TopologyProber::system(config.probe.command_timeout());
        Self {
            config,
            broker,
            prober,
            emit_title: true,
        }
    }

    /// Replace the topology prober, e.g. with one fed by canned tool output.
    pub fn with_prober(mut self, prober: TopologyProber) -> Self {
        self.prober = prober;
        self
    }

    /// Compose the title but don't write it to the terminal.
    pub fn without_title_output(mut self) -> Self {
        self.emit_title = false;
        self
    }

    /// Bind every configured pair, describe what is serving, and return the
    /// service ready to `run`. Only binding can fail.
    pub async fn build(self) -> Result<TcpService, ServiceError> {
        Ok(self.start().await?.service)
    }

    pub async fn start(self) -> Result<Startup, ServiceError> {
        let listen = &self.config.listen;

        // 1️⃣ Bind everything up front so a fatal error leaves nothing open.
        let mut service = TcpService::new(listen.backlog, listen.bind_policy, self.broker);
        let report = service.bind(&listen.interfaces, &listen.ports)?;

        // 2️⃣ Work out which addresses those sockets answer on.
        let topology = self.prober.probe(&listen.interfaces).await;

        let announcements = announce::announcements(&topology, &report, self.config.tls);
        announce::log_announcements(&announcements, self.config.tls);

        let title = self.config.title.template.as_deref().map(|template| {
            let requested = announce::requested_tags(template);
            let table =
                announce::RoleTagTable::build(&announcements, &requested, &self.config.title.tags);
            announce::render_title(template, &table)
        });
        if let (Some(title), true) = (&title, self.emit_title) {
            announce::emit_title(title);
        }

        Ok(Startup {
            service,
            report,
            topology,
            announcements,
            title,
        })
    }
}
