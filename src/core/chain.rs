//! Chain data structures and table/chain legality constraints
//!
//! A [`Chain`] is one named rule container within one table/protocol. Its
//! composite identity is `{chain}:{table}:{protocol}`, e.g.
//! `INPUT:filter:IPv4` or `BROUTING:broute:ethernet`.
//!
//! This module also centralizes the business logic about which chains are
//! built-in and which built-ins each table permits. Violations are hard
//! configuration errors caught before any command is issued, not warnings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::rule::{Protocol, Table};

/// Policy of a built-in chain
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Policy {
    #[default]
    Accept,
    Drop,
    Queue,
    Return,
}

impl Policy {
    /// Returns the uppercase token as printed by `iptables-save` and
    /// expected by `-P`.
    pub const fn as_token(self) -> &'static str {
        match self {
            Policy::Accept => "ACCEPT",
            Policy::Drop => "DROP",
            Policy::Queue => "QUEUE",
            Policy::Return => "RETURN",
        }
    }

    /// Parses the uppercase token from save output.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "ACCEPT" => Some(Policy::Accept),
            "DROP" => Some(Policy::Drop),
            "QUEUE" => Some(Policy::Queue),
            "RETURN" => Some(Policy::Return),
            _ => None,
        }
    }
}

/// Composite chain identity: `{chain}:{table}:{protocol}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    pub chain: String,
    pub table: Table,
    pub protocol: Protocol,
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain, self.table, self.protocol)
    }
}

impl FromStr for ChainId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let chain = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| format!("invalid chain name {s:?}: missing chain"))?;
        let table = parts
            .next()
            .ok_or_else(|| format!("invalid chain name {s:?}: missing table"))?;
        let protocol = parts
            .next()
            .ok_or_else(|| format!("invalid chain name {s:?}: missing protocol"))?;
        Ok(ChainId {
            chain: chain.to_string(),
            table: table
                .parse()
                .map_err(|_| format!("unknown table {table:?} in {s:?}"))?,
            protocol: parse_protocol(protocol)
                .ok_or_else(|| format!("unknown protocol {protocol:?} in {s:?}"))?,
        })
    }
}

fn parse_protocol(token: &str) -> Option<Protocol> {
    match token {
        "IPv4" | "iptables" => Some(Protocol::IPv4),
        "IPv6" | "ip6tables" => Some(Protocol::IPv6),
        "ethernet" | "ebtables" => Some(Protocol::Ethernet),
        _ => None,
    }
}

/// One declared or discovered chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Chain {
    /// Composite name, `{chain}:{table}:{protocol}`
    pub name: String,
    pub ensure: super::rule::Ensure,
    /// Legal only on built-in chains valid for the table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    /// Delete unmanaged rules in this chain during reconciliation
    pub purge: bool,
    /// Regexes exempting matching live rule text from purge
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
    /// Exempt rules in the reserved foreign ordinal range from purge
    pub ignore_foreign: bool,
}

impl Default for Chain {
    fn default() -> Self {
        Self {
            name: String::new(),
            ensure: super::rule::Ensure::Present,
            policy: None,
            purge: false,
            ignore: Vec::new(),
            ignore_foreign: false,
        }
    }
}

impl Chain {
    /// Parses the composite name into its identity parts.
    ///
    /// # Errors
    ///
    /// Returns a message when the name is not `{chain}:{table}:{protocol}`.
    pub fn id(&self) -> Result<ChainId, String> {
        self.name.parse()
    }

    /// Validates the policy/table/built-in constraints for this chain.
    ///
    /// # Errors
    ///
    /// Returns the violated constraint as a message.
    pub fn check_invariants(&self) -> Result<(), String> {
        let id = self.id()?;
        if let Some(policy) = self.policy {
            if !is_builtin(&id.chain) {
                return Err(format!(
                    "policy {policy} is only legal on built-in chains, {} is user-defined",
                    id.chain
                ));
            }
            if !builtin_legal_for_table(&id.chain, id.table) {
                return Err(format!(
                    "chain {} is not legal in table {}",
                    id.chain, id.table
                ));
            }
        }
        if is_builtin(&id.chain) && !builtin_legal_for_table(&id.chain, id.table) {
            return Err(format!(
                "chain {} is not legal in table {}",
                id.chain, id.table
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Built-in Chain Constraints
// ═══════════════════════════════════════════════════════════════════════════

/// The chains predefined by the firewall subsystem. They are never created
/// or destroyed, only flushed and policy-set.
pub const BUILTIN_CHAINS: [&str; 6] = [
    "INPUT",
    "OUTPUT",
    "FORWARD",
    "PREROUTING",
    "POSTROUTING",
    "BROUTING",
];

/// Returns `true` if the chain name is one of the built-in chains.
#[inline]
pub fn is_builtin(chain: &str) -> bool {
    BUILTIN_CHAINS.contains(&chain)
}

/// Built-in chains each table permits. A built-in outside this matrix is a
/// structural configuration error.
#[inline]
pub fn builtin_legal_for_table(chain: &str, table: Table) -> bool {
    let permitted: &[&str] = match table {
        Table::Filter | Table::Security => &["INPUT", "OUTPUT", "FORWARD"],
        Table::Nat => &["PREROUTING", "POSTROUTING", "INPUT", "OUTPUT"],
        Table::Mangle => &["PREROUTING", "POSTROUTING", "INPUT", "OUTPUT", "FORWARD"],
        Table::Raw => &["PREROUTING", "OUTPUT"],
        Table::Rawpost => &["POSTROUTING"],
        Table::Broute => &["BROUTING"],
    };
    permitted.contains(&chain)
}
