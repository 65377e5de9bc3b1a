// src/config/models.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,

    #[serde(default)]
    pub tls: TlsMode,

    #[serde(default)]
    pub title: TitleConfig,

    #[serde(default)]
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Interface addresses to bind, in the order they are attempted.
    #[serde(default = "default_interfaces")]
    pub interfaces: Vec<IpAddr>,

    /// Ports bound on every interface.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,

    /// Queue depth passed to listen().
    #[serde(default = "default_backlog")]
    pub backlog: i32,

    #[serde(default)]
    pub bind_policy: BindPolicy,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            interfaces: default_interfaces(),
            ports: default_ports(),
            backlog: default_backlog(),
            bind_policy: BindPolicy::default(),
        }
    }
}

fn default_interfaces() -> Vec<IpAddr> {
    vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)]
}

fn default_ports() -> Vec<u16> {
    vec![3923]
}

fn default_backlog() -> i32 {
    128
}

/// What happens when an (interface, port) pair cannot be bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindPolicy {
    /// Any failure aborts startup.
    #[default]
    #[serde(rename = "strict")]
    Strict,
    /// Busy ports and missing interfaces are skipped, but at least one
    /// binding has to succeed.
    #[serde(rename = "ign_ebind")]
    IgnoreFailed,
    /// Busy ports and missing interfaces are skipped, even if nothing binds.
    #[serde(rename = "ign_ebind_all")]
    IgnoreAll,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plain and TLS are both accepted; the protocol is sniffed per connection.
    #[default]
    Auto,
    HttpsOnly,
    HttpOnly,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TitleConfig {
    /// Terminal title template; words starting with `$` name a role tag.
    #[serde(default)]
    pub template: Option<String>,

    /// Extra role tags, each matching endpoints by ip prefix.
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout(),
        }
    }
}

fn default_command_timeout() -> u64 {
    2000
}

impl ProbeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.listen.interfaces.is_empty() {
            bail!("at least one interface must be configured");
        }
        if self.listen.ports.is_empty() {
            bail!("at least one port must be configured");
        }
        if self.listen.backlog < 1 {
            bail!("listen backlog must be positive, got {}", self.listen.backlog);
        }
        if self.probe.command_timeout_ms == 0 {
            bail!("probe command timeout must be at least 1ms");
        }
        for name in self.title.tags.keys() {
            if name.is_empty() || name.contains(char::is_whitespace) || name.contains('$') {
                bail!("invalid title tag name {:?}", name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_backlog() {
        let mut config = Config::default();
        config.listen.backlog = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_tag_names() {
        let mut config = Config::default();
        config.title.tags.insert("two words".into(), vec!["10.".into()]);
        assert!(config.validate().is_err());
    }
}
