//! Per-protocol backend configuration
//!
//! One parameterized [`Backend`] value per firewall binary family replaces
//! any global command tables: the scanner, enumerator, and emitter all take
//! the backend they operate on explicitly.

use super::rule::{Protocol, Table};

/// Static configuration for one firewall binary family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backend {
    /// Mutating binary, e.g. `iptables`
    pub binary: &'static str,
    /// Read-only listing binary, e.g. `iptables-save`
    pub save_binary: &'static str,
    pub protocol: Protocol,
    /// Tables this binary supports, in enumeration order
    pub tables: &'static [Table],
}

pub const IPTABLES: Backend = Backend {
    binary: "iptables",
    save_binary: "iptables-save",
    protocol: Protocol::IPv4,
    tables: &[
        Table::Filter,
        Table::Nat,
        Table::Mangle,
        Table::Raw,
        Table::Security,
    ],
};

pub const IP6TABLES: Backend = Backend {
    binary: "ip6tables",
    save_binary: "ip6tables-save",
    protocol: Protocol::IPv6,
    tables: &[
        Table::Filter,
        Table::Nat,
        Table::Mangle,
        Table::Raw,
        Table::Rawpost,
        Table::Security,
    ],
};

pub const EBTABLES: Backend = Backend {
    binary: "ebtables",
    save_binary: "ebtables-save",
    protocol: Protocol::Ethernet,
    tables: &[Table::Filter, Table::Nat, Table::Broute],
};

/// All known backends in enumeration order.
pub const ALL: [Backend; 3] = [IPTABLES, IP6TABLES, EBTABLES];

impl Backend {
    /// Returns the backend serving a protocol.
    pub fn for_protocol(protocol: Protocol) -> Backend {
        match protocol {
            Protocol::IPv4 => IPTABLES,
            Protocol::IPv6 => IP6TABLES,
            Protocol::Ethernet => EBTABLES,
        }
    }

    /// Returns `true` if this binary family supports the table.
    pub fn supports(&self, table: Table) -> bool {
        self.tables.contains(&table)
    }
}
