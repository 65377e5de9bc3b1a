// src/announce/title.rs
//! Terminal title composition.
//!
//! A template such as `"cpp $pub"` has each `$tag` word replaced by the
//! endpoints carrying that role tag:
//!
//! * `all` - every serving endpoint
//! * `pub` - endpoints on the default route, or `all` when there are none
//! * `ip-<prefix>` - endpoints whose address starts with `<prefix>`
//! * any tag from the config's `title.tags`, matched by its list of prefixes

use super::Announcement;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::net::{IpAddr, SocketAddr};

/// Shown for a tag without members.
pub const NO_MEMBERS: &str = "(none)";

/// Role tag name -> endpoint strings (`ip` or `ip:port`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleTagTable {
    tags: BTreeMap<String, BTreeSet<String>>,
}

struct Member {
    ip: IpAddr,
    endpoint: String,
    is_external: bool,
}

impl Member {
    fn new(line: &Announcement) -> Self {
        // default ports need no suffix
        let endpoint = match line.port {
            80 | 443 => line.ip.to_string(),
            port => SocketAddr::new(line.ip, port).to_string(),
        };
        Self {
            ip: line.ip,
            endpoint,
            is_external: line.is_external,
        }
    }

    fn matches_prefix(&self, prefix: &str) -> bool {
        self.endpoint.starts_with(prefix) || self.ip.to_string().starts_with(prefix)
    }
}

impl RoleTagTable {
    /// Build the table for the tags `requested` by a template, plus every
    /// custom tag.
    pub fn build(
        lines: &[Announcement],
        requested: &[String],
        custom: &BTreeMap<String, Vec<String>>,
    ) -> Self {
        let members: Vec<Member> = lines.iter().map(Member::new).collect();
        let select = |keep: &dyn Fn(&Member) -> bool| -> BTreeSet<String> {
            dedupe(
                members
                    .iter()
                    .filter(|&m| keep(m))
                    .map(|m| m.endpoint.clone())
                    .collect(),
            )
        };

        let all = select(&|_: &Member| true);
        let external = select(&|m: &Member| m.is_external);
        let public = if external.is_empty() {
            all.clone()
        } else {
            external
        };

        let prefixed = requested.iter().filter_map(|tag| {
            let prefix = tag.strip_prefix("ip-")?;
            Some((tag.clone(), select(&|m: &Member| m.matches_prefix(prefix))))
        });
        let configured = custom.iter().map(|(tag, prefixes)| {
            let set = select(&|m: &Member| prefixes.iter().any(|p| m.matches_prefix(p)));
            (tag.clone(), set)
        });

        let tags = [("all".to_string(), all), ("pub".to_string(), public)]
            .into_iter()
            .chain(prefixed)
            .chain(configured)
            .collect();

        Self { tags }
    }

    pub fn members(&self, tag: &str) -> Option<&BTreeSet<String>> {
        self.tags.get(tag)
    }

    /// Sorted, space-joined members of `tag`, or [`NO_MEMBERS`].
    pub fn render(&self, tag: &str) -> String {
        match self.tags.get(tag) {
            Some(set) if !set.is_empty() => set.iter().cloned().collect::<Vec<_>>().join(" "),
            _ => NO_MEMBERS.to_string(),
        }
    }
}

/// Drop `ip:port` entries whose bare `ip` is already a member.
fn dedupe(set: BTreeSet<String>) -> BTreeSet<String> {
    set.iter()
        .filter(|ep| match ep.parse::<SocketAddr>() {
            Ok(addr) => !set.contains(&addr.ip().to_string()),
            Err(_) => true,
        })
        .cloned()
        .collect()
}

/// Tag names referenced by `$word`s in the template.
pub fn requested_tags(template: &str) -> Vec<String> {
    template
        .split(' ')
        .filter_map(|word| word.strip_prefix('$'))
        .map(str::to_string)
        .collect()
}

pub fn render_title(template: &str, table: &RoleTagTable) -> String {
    template
        .split(' ')
        .map(|word| match word.strip_prefix('$') {
            Some(tag) => table.render(tag),
            None => word.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Set the terminal title through stderr. Failures are ignored.
pub fn emit_title(title: &str) {
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "\x1b]0;{}\x1b\\", title);
    let _ = stderr.flush();
}
