//! Desired-state document loading
//!
//! A document is JSON with two arrays of named records:
//!
//! ```json
//! {
//!   "chains": [
//!     { "name": "INPUT:filter:IPv4", "policy": "drop", "purge": true }
//!   ],
//!   "rules": [
//!     { "name": "100 allow ssh", "chain": "INPUT", "proto": "tcp",
//!       "dport": ["22"], "action": "accept" }
//!   ]
//! }
//! ```
//!
//! Arrays rather than objects keep declaration order, which breaks ordinal
//! ties during reconciliation. Unknown protocol spellings from older rule
//! sets (`iptables`, `ip6tables`, `ebtables`) are accepted as aliases.

use serde::Deserialize;
use std::path::Path;
use tracing::warn;

use crate::core::chain::Chain;
use crate::core::error::{Error, Result};
use crate::core::reconcile::DesiredState;
use crate::core::rule::Rule;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Document {
    chains: Vec<Chain>,
    rules: Vec<Rule>,
}

/// Parses a desired-state document.
///
/// Declared rules get the conventional `tcp` protocol match when they
/// specify none, matching how rule sets are written by hand.
///
/// # Errors
///
/// Returns [`Error::DesiredState`] on malformed JSON and for duplicate
/// entity names.
pub fn parse_desired(text: &str) -> Result<DesiredState> {
    let document: Document =
        serde_json::from_str(text).map_err(|e| Error::DesiredState(e.to_string()))?;

    let mut seen = std::collections::HashSet::new();
    for name in document
        .chains
        .iter()
        .map(|c| &c.name)
        .chain(document.rules.iter().map(|r| &r.name))
    {
        if !seen.insert(name.clone()) {
            return Err(Error::DesiredState(format!("duplicate entity name {name:?}")));
        }
    }

    let mut rules = document.rules;
    for rule in &mut rules {
        if rule.proto.is_none() {
            rule.proto = Some("tcp".to_string());
        }
        if rule.line.is_some() {
            // `line` is read-only, only discovered rules carry it
            warn!(rule = %rule.name, "ignoring declared line attribute");
            rule.line = None;
        }
    }

    Ok(DesiredState {
        chains: document.chains,
        rules,
    })
}

/// Loads a desired-state document from disk.
///
/// # Errors
///
/// Returns `Err` when the file cannot be read or parsed.
pub fn load_desired(path: &Path) -> Result<DesiredState> {
    let text = std::fs::read_to_string(path)?;
    parse_desired(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chain::Policy;
    use crate::core::rule::{Action, Ensure, Protocol, Table};

    #[test]
    fn test_parse_document() {
        let state = parse_desired(
            r#"{
                "chains": [
                    { "name": "INPUT:filter:IPv4", "policy": "drop", "purge": true,
                      "ignore": ["-j DOCKER"], "ignore_foreign": true }
                ],
                "rules": [
                    { "name": "100 allow ssh", "chain": "INPUT", "proto": "tcp",
                      "dport": ["22"], "action": "accept" },
                    { "name": "200 drop rest", "chain": "INPUT", "ensure": "absent" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(state.chains.len(), 1);
        assert_eq!(state.chains[0].policy, Some(Policy::Drop));
        assert!(state.chains[0].purge);
        assert_eq!(state.rules.len(), 2);
        assert_eq!(state.rules[0].name, "100 allow ssh");
        assert_eq!(state.rules[0].action, Some(Action::Accept));
        assert_eq!(state.rules[0].table, Table::Filter);
        assert_eq!(state.rules[1].ensure, Ensure::Absent);
    }

    #[test]
    fn test_proto_defaults_to_tcp() {
        let state = parse_desired(
            r#"{ "rules": [ { "name": "100 a", "chain": "INPUT" } ] }"#,
        )
        .unwrap();
        assert_eq!(state.rules[0].proto.as_deref(), Some("tcp"));
    }

    #[test]
    fn test_legacy_protocol_alias_accepted() {
        let state = parse_desired(
            r#"{ "rules": [ { "name": "100 a", "chain": "INPUT", "protocol": "ip6tables" } ] }"#,
        )
        .unwrap();
        assert_eq!(state.rules[0].protocol, Protocol::IPv6);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = parse_desired(
            r#"{ "rules": [
                { "name": "100 a", "chain": "INPUT" },
                { "name": "100 a", "chain": "OUTPUT" }
            ] }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_declared_line_is_stripped() {
        let state = parse_desired(
            r#"{ "rules": [ { "name": "100 a", "chain": "INPUT", "line": "-A INPUT -j DROP" } ] }"#,
        )
        .unwrap();
        assert_eq!(state.rules[0].line, None);
    }

    #[test]
    fn test_malformed_document() {
        assert!(parse_desired("{ not json").is_err());
        assert!(parse_desired(r#"{ "surprise": [] }"#).is_err());
    }

    #[test]
    fn test_load_desired_from_disk() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "rules": [ {{ "name": "100 a", "chain": "INPUT" }} ] }}"#
        )
        .unwrap();
        let state = load_desired(file.path()).unwrap();
        assert_eq!(state.rules.len(), 1);

        assert!(load_desired(Path::new("/nonexistent/iptsync.json")).is_err());
    }
}
