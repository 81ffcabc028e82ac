//! Firewall rule data structures
//!
//! This module defines the core data structures for representing iptables
//! rules as declarative records. A [`Rule`] carries:
//! - An identity `name` whose leading unsigned integer (the *ordinal*)
//!   fixes its relative position within a chain
//! - Placement: `table`, `chain`, `protocol` (IPv4/IPv6/Ethernet backend)
//! - A fixed, enumerated schema of optional match/target attributes, each
//!   mapped to one or more CLI flags by the codec
//! - `line`: the exact save-format text, present only on rules discovered
//!   on the live system
//!
//! Negated single-value attributes keep a `"! "` prefix inside the string
//! value (`source: "! 10.0.0.0/8"`), so re-encoding is exact.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

/// Ordinal at or above which a live rule is considered foreign
/// (not managed by this system) by the purge filter.
pub const FOREIGN_ORDINAL: u32 = 9000;

/// Ordinal assigned to discovered rules that carry no comment at all.
pub const UNMANAGED_ORDINAL: u32 = 9999;

/// Netfilter table a rule or chain lives in
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Table {
    #[default]
    Filter,
    Nat,
    Mangle,
    Raw,
    Rawpost,
    Broute,
    Security,
}

impl Table {
    /// Returns the table name as passed to `-t`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
            Table::Mangle => "mangle",
            Table::Raw => "raw",
            Table::Rawpost => "rawpost",
            Table::Broute => "broute",
            Table::Security => "security",
        }
    }
}

/// Which firewall binary family a rule belongs to.
///
/// The legacy binary names are accepted as aliases in desired-state
/// documents for compatibility with older rule sets.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Protocol {
    #[default]
    #[serde(rename = "IPv4", alias = "iptables")]
    #[strum(serialize = "IPv4")]
    IPv4,
    #[serde(rename = "IPv6", alias = "ip6tables")]
    #[strum(serialize = "IPv6")]
    IPv6,
    #[serde(rename = "ethernet", alias = "ebtables")]
    #[strum(serialize = "ethernet")]
    Ethernet,
}

/// Whether an entity should exist on the live system
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
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

/// Generic terminating action (the three targets that are not jumps)
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Accept,
    Drop,
    Reject,
}

impl Action {
    /// Returns the uppercase target token as iptables expects it.
    pub const fn as_target(self) -> &'static str {
        match self {
            Action::Accept => "ACCEPT",
            Action::Drop => "DROP",
            Action::Reject => "REJECT",
        }
    }

    /// Maps a `-j` target token back to an action, if it is one of the
    /// three generic actions.
    pub fn from_target(target: &str) -> Option<Self> {
        match target {
            "ACCEPT" => Some(Action::Accept),
            "DROP" => Some(Action::Drop),
            "REJECT" => Some(Action::Reject),
            _ => None,
        }
    }
}

/// One declarative firewall rule.
///
/// Every match/target attribute is independently optional. The attribute
/// set is a fixed schema: unknown flags on discovered rules are preserved
/// only through [`Rule::line`] and never populate structured fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Rule {
    /// Identity: `<ordinal> <free text>`. The ordinal orders rules within
    /// a chain.
    pub name: String,
    pub ensure: Ensure,
    pub table: Table,
    pub chain: String,
    pub protocol: Protocol,

    /// Exact save-format text. Only present on rules discovered on the
    /// live system; used for deletion and purge matching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,

    // Match attributes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sport: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dport: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iniface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outiface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_flags: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub state: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ctstate: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_match: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_algo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_stop: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month_days: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub week_days: Option<String>,

    // Target attributes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_mark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tosource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub todest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toports: Option<String>,
}

impl Rule {
    /// Parses the leading unsigned integer of the rule name.
    ///
    /// Returns `None` when the name does not start with digits; validation
    /// rejects such names for desired rules before reconciliation.
    pub fn ordinal(&self) -> Option<u32> {
        let digits: String = self.name.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return None;
        }
        digits.parse().ok()
    }

    /// Returns `true` when the name ordinal falls in the reserved foreign
    /// range (>= 9000).
    pub fn is_foreign(&self) -> bool {
        self.ordinal().is_some_and(|n| n >= FOREIGN_ORDINAL)
    }

    /// Checks the attribute invariants that make a rule structurally valid:
    /// at most one of `jump`/`goto`, and `action` never combined with
    /// `jump`.
    ///
    /// # Errors
    ///
    /// Returns the offending constraint as a message.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.jump.is_some() && self.goto.is_some() {
            return Err("jump and goto are mutually exclusive".to_string());
        }
        if self.action.is_some() && self.jump.is_some() {
            return Err("action and jump are mutually exclusive".to_string());
        }
        if self.action.is_some() && self.goto.is_some() {
            return Err("action and goto are mutually exclusive".to_string());
        }
        Ok(())
    }

    /// Value-for-value comparison of every declared attribute, used by the
    /// reconciler to detect drift. Addresses compare canonically so that
    /// `1.1.1.1` (declared) matches `1.1.1.1/32` (as printed by
    /// `iptables-save`); everything else compares verbatim.
    pub fn same_values(&self, other: &Rule) -> bool {
        self.table == other.table
            && self.chain == other.chain
            && self.protocol == other.protocol
            && self.proto == other.proto
            && address_eq(self.source.as_deref(), other.source.as_deref())
            && address_eq(self.destination.as_deref(), other.destination.as_deref())
            && self.sport == other.sport
            && self.dport == other.dport
            && self.iniface == other.iniface
            && self.outiface == other.outiface
            && self.tcp_flags == other.tcp_flags
            && self.state == other.state
            && self.ctstate == other.ctstate
            && self.icmp == other.icmp
            && self.limit == other.limit
            && self.burst == other.burst
            && self.uid == other.uid
            && self.gid == other.gid
            && self.string_match == other.string_match
            && self.string_algo == other.string_algo
            && self.time_start == other.time_start
            && self.time_stop == other.time_stop
            && self.month_days == other.month_days
            && self.week_days == other.week_days
            && self.jump == other.jump
            && self.goto == other.goto
            && self.action == other.action
            && self.log_level == other.log_level
            && self.log_prefix == other.log_prefix
            && self.reject == other.reject
            && self.set_mark == other.set_mark
            && self.tosource == other.tosource
            && self.todest == other.todest
            && self.toports == other.toports
    }
}

/// Canonical form of an address attribute for comparison.
///
/// Keeps any `"! "` negation prefix, and normalizes the remainder to CIDR
/// notation when it parses as an address or network.
pub fn canonical_address(value: &str) -> String {
    let (neg, addr) = match value.strip_prefix("! ") {
        Some(rest) => ("! ", rest),
        None => ("", value),
    };
    let canonical = addr
        .parse::<IpNetwork>()
        .map_or_else(|_| addr.to_string(), |net| net.to_string());
    format!("{neg}{canonical}")
}

fn address_eq(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => canonical_address(a) == canonical_address(b),
        _ => false,
    }
}
