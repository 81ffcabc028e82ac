//! Chain table scanner for `iptables-save`-style output
//!
//! Splits save output into per-table segments on the `*tablename` header,
//! and within a segment yields chain declarations (`:NAME POLICY [p:b]`)
//! and `-A` rule lines in declaration order. Known-fatal diagnostics
//! (kernel module load failures) empty the scan instead of aborting it.

use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::warn;

use super::chain::Policy;
use super::rule::Table;

/// One chain declaration from a save segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedChain {
    pub name: String,
    /// `None` for user-defined chains, which print `-` instead of a policy
    pub policy: Option<Policy>,
}

/// One `*table` segment of save output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSegment {
    pub table: Table,
    pub chains: Vec<ScannedChain>,
    /// `-A` lines, in declaration order
    pub rule_lines: Vec<String>,
}

fn chain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^:(\S+)\s+(\S+)").expect("chain regex"))
}

fn fatal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "FATAL: ..." from iptables, "can't initialize ..." from the legacy
    // tools when a kernel module is unavailable
    RE.get_or_init(|| Regex::new(r"(?m)^(FATAL:|.*can't initialize)").expect("fatal regex"))
}

/// Splits save output into table segments.
///
/// Output naming an unknown table is skipped with a warning rather than
/// failing the scan; a fatal diagnostic yields zero segments.
pub fn scan(output: &str) -> Vec<TableSegment> {
    if fatal_regex().is_match(output) {
        warn!("save output contains a fatal diagnostic, treating as empty");
        return Vec::new();
    }

    let mut segments: Vec<TableSegment> = Vec::new();
    let mut current: Option<TableSegment> = None;

    for line in output.lines() {
        let line = line.trim_end();
        if let Some(table_name) = line.strip_prefix('*') {
            if let Some(done) = current.take() {
                segments.push(done);
            }
            match Table::from_str(table_name) {
                Ok(table) => {
                    current = Some(TableSegment {
                        table,
                        chains: Vec::new(),
                        rule_lines: Vec::new(),
                    });
                }
                Err(_) => {
                    warn!(table = table_name, "skipping unknown table in save output");
                    current = None;
                }
            }
            continue;
        }

        let Some(segment) = current.as_mut() else {
            continue;
        };

        if let Some(caps) = chain_regex().captures(line) {
            segment.chains.push(ScannedChain {
                name: caps[1].to_string(),
                policy: Policy::from_token(&caps[2]),
            });
        } else if line.starts_with("-A ") {
            segment.rule_lines.push(line.to_string());
        }
        // COMMIT, comments, and counters are structure we do not need
    }

    if let Some(done) = current.take() {
        segments.push(done);
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILTER_SAVE: &str = "\
# Generated by iptables-save v1.8.7 on Thu Aug  6 10:11:12 2026
*filter
:INPUT ACCEPT [1042:92340]
:FORWARD DROP [0:0]
:OUTPUT ACCEPT [820:70021]
:fail2ban-ssh - [0:0]
-A INPUT -p tcp -m comment --comment \"100 allow ssh\" -j ACCEPT
-A INPUT -j fail2ban-ssh
-A fail2ban-ssh -j RETURN
COMMIT
# Completed on Thu Aug  6 10:11:12 2026
";

    #[test]
    fn test_scan_single_table() {
        let segments = scan(FILTER_SAVE);
        assert_eq!(segments.len(), 1);
        let seg = &segments[0];
        assert_eq!(seg.table, Table::Filter);
        assert_eq!(seg.chains.len(), 4);
        assert_eq!(seg.chains[0].name, "INPUT");
        assert_eq!(seg.chains[0].policy, Some(Policy::Accept));
        assert_eq!(seg.chains[1].policy, Some(Policy::Drop));
        // User-defined chain prints "-" for its policy slot
        assert_eq!(seg.chains[3].name, "fail2ban-ssh");
        assert_eq!(seg.chains[3].policy, None);
        assert_eq!(seg.rule_lines.len(), 3);
        assert!(seg.rule_lines[0].contains("100 allow ssh"));
    }

    #[test]
    fn test_scan_multiple_tables() {
        let output = "\
*nat
:PREROUTING ACCEPT [0:0]
-A PREROUTING -j RETURN
COMMIT
*mangle
:PREROUTING ACCEPT [0:0]
COMMIT
";
        let segments = scan(output);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].table, Table::Nat);
        assert_eq!(segments[0].rule_lines.len(), 1);
        assert_eq!(segments[1].table, Table::Mangle);
        assert!(segments[1].rule_lines.is_empty());
    }

    #[test]
    fn test_scan_preserves_rule_order() {
        let output = "\
*filter
:INPUT ACCEPT [0:0]
-A INPUT -m comment --comment \"300 c\" -j ACCEPT
-A INPUT -m comment --comment \"100 a\" -j ACCEPT
-A INPUT -m comment --comment \"200 b\" -j ACCEPT
COMMIT
";
        let seg = &scan(output)[0];
        let order: Vec<&str> = seg
            .rule_lines
            .iter()
            .map(|l| {
                if l.contains("300") {
                    "c"
                } else if l.contains("100") {
                    "a"
                } else {
                    "b"
                }
            })
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_scan_fatal_diagnostic_is_empty() {
        let output = "FATAL: could not load /lib/modules/ip_tables.ko\n";
        assert!(scan(output).is_empty());

        let output = "ebtables v2.0: can't initialize ebtables table 'broute'\n";
        assert!(scan(output).is_empty());
    }

    #[test]
    fn test_scan_unknown_table_skipped() {
        let output = "\
*notatable
:INPUT ACCEPT [0:0]
-A INPUT -j ACCEPT
COMMIT
*filter
:INPUT ACCEPT [0:0]
COMMIT
";
        let segments = scan(output);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].table, Table::Filter);
    }

    #[test]
    fn test_scan_empty_output() {
        assert!(scan("").is_empty());
    }
}
