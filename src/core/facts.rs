//! Fact collaborator: host details that influence encoding and persistence
//!
//! The reconciliation core never probes the host directly; it consumes a
//! [`Facts`] implementation. Production uses [`SystemFacts`]; tests supply
//! a [`StaticFacts`] map.
//!
//! Two facts matter here:
//! - `iptables_version` selects the mark encoding (no mask support before
//!   1.4.2)
//! - `os_family` selects the boot-persistence command

use std::collections::HashMap;
use std::process::Command;
use tracing::debug;

/// Read-only host fact lookup.
pub trait Facts {
    /// Returns the fact value, or `None` when it cannot be determined.
    fn value(&self, name: &str) -> Option<String>;
}

/// Encoding capabilities derived from the installed binary version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `--set-xmark mark/mask` is available (iptables >= 1.4.2)
    pub mark_mask: bool,
}

impl Capabilities {
    pub const MODERN: Capabilities = Capabilities { mark_mask: true };

    /// Derives capabilities from the `iptables_version` fact. An unknown
    /// version is treated as modern.
    pub fn from_facts(facts: &dyn Facts) -> Self {
        let mark_mask = facts
            .value("iptables_version")
            .and_then(|v| parse_version(&v))
            .is_none_or(|v| v >= (1, 4, 2));
        Capabilities { mark_mask }
    }
}

/// Parses `major.minor.patch` with any trailing garbage ignored.
fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version
        .split('.')
        .map(|p| p.chars().take_while(char::is_ascii_digit).collect::<String>());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some((major, minor, patch))
}

/// The OS-specific save-to-disk command, as argv. `None` means no known
/// persistence mechanism for this host; changes then survive only until
/// reboot.
pub fn persistence_command(facts: &dyn Facts) -> Option<Vec<String>> {
    match facts.value("os_family")?.as_str() {
        "Debian" => Some(vec![
            "netfilter-persistent".to_string(),
            "save".to_string(),
        ]),
        "RedHat" => Some(vec![
            "service".to_string(),
            "iptables".to_string(),
            "save".to_string(),
        ]),
        other => {
            debug!(os_family = other, "no persistence command for this OS family");
            None
        }
    }
}

/// Facts gathered from the live host.
pub struct SystemFacts;

impl Facts for SystemFacts {
    fn value(&self, name: &str) -> Option<String> {
        match name {
            "iptables_version" => {
                let output = Command::new("iptables").arg("--version").output().ok()?;
                // "iptables v1.8.7 (nf_tables)"
                let text = String::from_utf8_lossy(&output.stdout).to_string();
                text.split_whitespace()
                    .find_map(|w| w.strip_prefix('v'))
                    .map(String::from)
            }
            "os_family" => {
                let release = std::fs::read_to_string("/etc/os-release").ok()?;
                os_family_from_release(&release)
            }
            _ => None,
        }
    }
}

fn os_family_from_release(release: &str) -> Option<String> {
    let mut ids = Vec::new();
    for line in release.lines() {
        if let Some(value) = line
            .strip_prefix("ID=")
            .or_else(|| line.strip_prefix("ID_LIKE="))
        {
            ids.extend(
                value
                    .trim_matches('"')
                    .split_whitespace()
                    .map(str::to_lowercase),
            );
        }
    }
    if ids.iter().any(|id| matches!(id.as_str(), "debian" | "ubuntu")) {
        return Some("Debian".to_string());
    }
    if ids
        .iter()
        .any(|id| matches!(id.as_str(), "rhel" | "fedora" | "centos"))
    {
        return Some("RedHat".to_string());
    }
    None
}

/// Fixed fact map, for tests and explicit configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticFacts(pub HashMap<String, String>);

impl StaticFacts {
    pub fn with(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }
}

impl Facts for StaticFacts {
    fn value(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!(parse_version("1.4.21"), Some((1, 4, 21)));
        assert_eq!(parse_version("1.8.7"), Some((1, 8, 7)));
        assert_eq!(parse_version("1.4"), Some((1, 4, 0)));
        assert_eq!(parse_version("garbage"), None);
    }

    #[test]
    fn test_mark_capability_cutoff() {
        let old = StaticFacts::with(&[("iptables_version", "1.4.1")]);
        assert!(!Capabilities::from_facts(&old).mark_mask);

        let exact = StaticFacts::with(&[("iptables_version", "1.4.2")]);
        assert!(Capabilities::from_facts(&exact).mark_mask);

        let modern = StaticFacts::with(&[("iptables_version", "1.8.7")]);
        assert!(Capabilities::from_facts(&modern).mark_mask);

        // Unknown version: assume modern
        let unknown = StaticFacts::default();
        assert!(Capabilities::from_facts(&unknown).mark_mask);
    }

    #[test]
    fn test_persistence_selection() {
        let debian = StaticFacts::with(&[("os_family", "Debian")]);
        assert_eq!(
            persistence_command(&debian),
            Some(vec!["netfilter-persistent".to_string(), "save".to_string()])
        );

        let redhat = StaticFacts::with(&[("os_family", "RedHat")]);
        assert_eq!(
            persistence_command(&redhat),
            Some(vec![
                "service".to_string(),
                "iptables".to_string(),
                "save".to_string()
            ])
        );

        let other = StaticFacts::with(&[("os_family", "Gentoo")]);
        assert_eq!(persistence_command(&other), None);
    }

    #[test]
    fn test_os_family_from_release() {
        let ubuntu = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n";
        assert_eq!(os_family_from_release(ubuntu), Some("Debian".to_string()));

        let fedora = "NAME=\"Fedora Linux\"\nID=fedora\n";
        assert_eq!(os_family_from_release(fedora), Some("RedHat".to_string()));

        let arch = "NAME=\"Arch Linux\"\nID=arch\n";
        assert_eq!(os_family_from_release(arch), None);
    }
}
