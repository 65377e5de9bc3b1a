// src/topology/scan.rs
//! Interface discovery by parsing the text output of the host's own tools.
//!
//! One strategy per OS family:
//!
//! * Linux: `ip addr`, falling back to `ifconfig` (busybox, termux, old hosts)
//! * macOS: `ifconfig`
//! * Windows: `ipconfig` and `netsh interface ip show address`, merged
//!
//! Only IPv4 addresses are reported. Every parser walks its input one line
//! at a time and never fails; unrecognised lines are ignored.

use super::command::{ProbeError, ToolRunner};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLabel {
    pub device: String,
    pub link_up: bool,
}

impl DeviceLabel {
    fn new(device: impl Into<String>, link_up: bool) -> Self {
        Self {
            device: device.into(),
            link_up,
        }
    }
}

impl fmt::Display for DeviceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.link_up {
            write!(f, "{}", self.device)
        } else {
            write!(f, "{}, LINK-DOWN", self.device)
        }
    }
}

pub type InterfaceMap = BTreeMap<IpAddr, DeviceLabel>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

pub async fn scan_interfaces(platform: Platform, runner: &dyn ToolRunner) -> InterfaceMap {
    match platform {
        Platform::Linux => scan_linux(runner).await,
        Platform::MacOs => match runner.run("ifconfig", &[]).await {
            Ok(text) => parse_ifconfig_macos(&text),
            Err(e) => unavailable(e),
        },
        Platform::Windows => scan_windows(runner).await,
    }
}

async fn scan_linux(runner: &dyn ToolRunner) -> InterfaceMap {
    if let Ok(text) = runner.run("ip", &["addr"]).await {
        return parse_ip_addr(&text);
    }
    match runner.run("ifconfig", &[]).await {
        Ok(text) => parse_ifconfig_linux(&text),
        Err(e) => unavailable(e),
    }
}

async fn scan_windows(runner: &dyn ToolRunner) -> InterfaceMap {
    let (ipconfig, netsh) = futures::join!(
        runner.run("ipconfig", &[]),
        runner.run("netsh", &["interface", "ip", "show", "address"]),
    );

    let (ipconfig, netsh) = match (ipconfig, netsh) {
        (Err(e), Err(_)) => return unavailable(e),
        pair => pair,
    };

    // ipconfig sees more adapters and their link state, netsh has better names
    let (found, offline) = ipconfig.map(|text| parse_ipconfig(&text)).unwrap_or_default();
    let named = netsh.map(|text| parse_netsh(&text)).unwrap_or_default();
    merge_windows(found, &offline, named)
}

fn unavailable(e: ProbeError) -> InterfaceMap {
    debug!(error = %e, "interface detection unavailable");
    InterfaceMap::new()
}

/// Line scanner state shared by the unix parsers.
#[derive(Debug, Clone, Copy)]
enum ScanState<'a> {
    AwaitingDevice,
    HaveDevice { name: &'a str, up: bool },
}

/// `true` if `line` contains `word` as a whole flag token.
fn has_flag(line: &str, word: &str) -> bool {
    line.split(|c: char| matches!(c, '<' | '>' | ',' | ' ' | '\t'))
        .any(|t| t == word)
}

fn parse_ipv4(token: &str) -> Option<Ipv4Addr> {
    token.split('/').next()?.parse().ok()
}

fn is_indented(line: &str) -> bool {
    line.starts_with(|c: char| c.is_whitespace())
}

/// Parse `ip addr` output.
///
/// ```text
/// 2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP
///     inet 192.168.1.5/24 brd 192.168.1.255 scope global eth0
/// ```
pub fn parse_ip_addr(text: &str) -> InterfaceMap {
    let mut eps = InterfaceMap::new();
    let mut state = ScanState::AwaitingDevice;

    for line in text.lines() {
        if let Some(name) = ip_addr_header(line) {
            state = ScanState::HaveDevice {
                name,
                up: has_flag(line, "UP"),
            };
            continue;
        }

        let ScanState::HaveDevice { name, up } = state else {
            continue;
        };
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("inet") {
            continue;
        }
        let Some(ip) = tokens.next().and_then(parse_ipv4) else {
            continue;
        };
        // the address label comes last and carries aliases like eth0:1
        let device = match tokens.last() {
            Some(label) if label.starts_with(name) => label,
            _ => name,
        };
        eps.insert(IpAddr::V4(ip), DeviceLabel::new(device, up));
    }

    eps
}

fn ip_addr_header(line: &str) -> Option<&str> {
    let (index, rest) = line.trim_start().split_once(':')?;
    index.trim().parse::<u32>().ok()?;
    let name = rest.trim_start().split([':', ' ']).next()?;
    let name = name.split('@').next()?;
    (!name.is_empty()).then_some(name)
}

/// Parse Linux `ifconfig` output, both the net-tools 2.x layout and the
/// legacy `inet addr:` one.
///
/// Interfaces are blank-line separated blocks and the `UP` flag may come
/// after the address, so entries are committed when a block ends.
pub fn parse_ifconfig_linux(text: &str) -> InterfaceMap {
    let mut eps = InterfaceMap::new();
    let mut state = ScanState::AwaitingDevice;
    let mut pending: Vec<Ipv4Addr> = Vec::new();

    let mut commit = |state: &ScanState<'_>, pending: &mut Vec<Ipv4Addr>| {
        if let ScanState::HaveDevice { name, up } = state {
            for ip in pending.iter() {
                eps.insert(IpAddr::V4(*ip), DeviceLabel::new(*name, *up));
            }
        }
        pending.clear();
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            commit(&state, &mut pending);
            state = ScanState::AwaitingDevice;
            continue;
        }

        if !is_indented(line) {
            commit(&state, &mut pending);
            let name = line.split([':', ' ']).next().unwrap_or_default();
            state = ScanState::HaveDevice { name, up: false };
        }

        let ScanState::HaveDevice { up, .. } = &mut state else {
            continue;
        };
        if has_flag(line, "UP") {
            *up = true;
        }
        let mut tokens = line.split_whitespace();
        if tokens.next() == Some("inet") {
            let addr = tokens.next().unwrap_or_default();
            if let Some(ip) = parse_ipv4(addr.trim_start_matches("addr:")) {
                pending.push(ip);
            }
        }
    }
    commit(&state, &mut pending);

    eps
}

/// Parse macOS `ifconfig` output.
///
/// ```text
/// en0: flags=8863<UP,BROADCAST,SMART,RUNNING,SIMPLEX,MULTICAST> mtu 1500
/// 	inet 192.168.1.5 netmask 0xffffff00 broadcast 192.168.1.255
/// ```
pub fn parse_ifconfig_macos(text: &str) -> InterfaceMap {
    let mut eps = InterfaceMap::new();
    let mut state = ScanState::AwaitingDevice;

    for line in text.lines() {
        if !is_indented(line) {
            state = match line.split_once(':') {
                Some((name, _)) if !name.is_empty() && !name.contains(' ') => {
                    ScanState::HaveDevice {
                        name,
                        up: has_flag(line, "UP"),
                    }
                }
                _ => ScanState::AwaitingDevice,
            };
            continue;
        }

        let ScanState::HaveDevice { name, up } = state else {
            continue;
        };
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("inet") {
            continue;
        }
        if let Some(ip) = tokens.next().and_then(parse_ipv4) {
            eps.insert(IpAddr::V4(ip), DeviceLabel::new(name, up));
        }
    }

    eps
}

/// Parse Windows `ipconfig` output.
///
/// Returns the discovered addresses and the set of adapters that are
/// disconnected or never showed an IPv4 address.
pub fn parse_ipconfig(text: &str) -> (InterfaceMap, BTreeSet<String>) {
    let mut eps = InterfaceMap::new();
    let mut offline = BTreeSet::new();
    let mut current: Option<String> = None;

    let retire = |dev: String, eps: &InterfaceMap, offline: &mut BTreeSet<String>| {
        if !eps.values().any(|l| l.device == dev) {
            offline.insert(dev);
        }
    };

    for line in text.lines() {
        let line = line.trim_end_matches('\r');

        if !line.is_empty() && !is_indented(line) {
            if let Some(header) = line.strip_suffix(':') {
                if let Some(dev) = current.take() {
                    retire(dev, &eps, &mut offline);
                }
                let name = match header.split_once(" adapter ") {
                    Some((_, name)) => name,
                    None => header,
                };
                current = Some(name.to_string());
            }
            continue;
        }

        if line.ends_with(": Media disconnected") {
            if let Some(dev) = current.take() {
                offline.insert(dev);
            }
            continue;
        }

        if let Some(ip) = ipconfig_address(line) {
            if let Some(dev) = current.take() {
                eps.insert(IpAddr::V4(ip), DeviceLabel::new(dev, true));
            }
        }
    }
    if let Some(dev) = current {
        retire(dev, &eps, &mut offline);
    }

    (eps, offline)
}

fn ipconfig_address(line: &str) -> Option<Ipv4Addr> {
    let trimmed = line.trim_start();
    if !(trimmed.starts_with("IPv4 ") || trimmed.starts_with("IP ")) {
        return None;
    }
    let (_, value) = trimmed.split_once(':')?;
    // tolerate suffixes such as "(Preferred)"
    let value = value.trim_start();
    let end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

/// Parse `netsh interface ip show address` output.
pub fn parse_netsh(text: &str) -> InterfaceMap {
    let mut eps = InterfaceMap::new();
    let mut device: Option<&str> = None;

    for line in text.lines() {
        let line = line.trim_end_matches('\r').trim_end();

        if let Some(name) = netsh_header(line) {
            device = Some(name);
            continue;
        }

        let Some(dev) = device else {
            continue;
        };
        if !has_ip_word(line) {
            continue;
        }
        let Some((_, value)) = line.rsplit_once(':') else {
            continue;
        };
        if let Ok(ip) = value.trim().parse::<Ipv4Addr>() {
            eps.insert(IpAddr::V4(ip), DeviceLabel::new(dev, true));
        }
    }

    eps
}

fn netsh_header(line: &str) -> Option<&str> {
    let inner = line.strip_suffix('"')?;
    let (_, name) = inner.rsplit_once(" \"")?;
    (!name.is_empty()).then_some(name)
}

/// Matches "IP Address:" and localised forms like "IP-Adresse:", but not
/// "IPv6" or "DHCP".
fn has_ip_word(line: &str) -> bool {
    line.split_whitespace().any(|token| {
        token
            .strip_prefix("IP")
            .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric()))
    })
}

/// netsh names win over ipconfig names; anything ipconfig saw offline is
/// marked link-down whichever source named it.
pub fn merge_windows(
    ipconfig: InterfaceMap,
    offline: &BTreeSet<String>,
    netsh: InterfaceMap,
) -> InterfaceMap {
    let mut eps = ipconfig;
    eps.extend(netsh);
    for label in eps.values_mut() {
        if offline.contains(&label.device) {
            label.link_up = false;
        }
    }
    eps
}
