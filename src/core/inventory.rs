//! Instance enumerator: the full in-memory inventory of live state
//!
//! Invokes the read-only listing command once per (protocol, table) pair
//! and feeds the output through the scanner and the rule codec. Rules keep
//! their 0-based position within their chain; that position is the
//! insertion-index baseline the reconciler works against.
//!
//! Enumeration is resilient to partially-unavailable subsystems: a listing
//! command that fails (binary missing, kernel module not loaded) reports
//! that table as absent and enumeration of the remaining tables continues.
//! Nothing is cached across passes; every pass re-reads live state.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::backend::Backend;
use super::chain::{builtin_legal_for_table, is_builtin, ChainId, Policy};
use super::codec::decode_rule;
use super::exec::Executor;
use super::rule::{Protocol, Rule, Table};
use super::scanner;

/// One rule discovered on the live system.
#[derive(Debug, Clone)]
pub struct LiveRule {
    pub rule: Rule,
    /// 0-based position within its chain, in listing order
    pub position: usize,
}

/// One chain discovered on the live system.
#[derive(Debug, Clone)]
pub struct LiveChain {
    pub id: ChainId,
    pub policy: Option<Policy>,
}

/// Complete live state for the enumerated backends.
#[derive(Debug, Default)]
pub struct Inventory {
    pub chains: Vec<LiveChain>,
    pub rules: Vec<LiveRule>,
    /// (protocol, table) pairs whose listing command succeeded
    pub scanned: HashSet<(Protocol, Table)>,
}

impl Inventory {
    /// Enumerates every table of one backend.
    pub fn enumerate(executor: &dyn Executor, backend: &Backend) -> Self {
        let mut inventory = Inventory::default();
        inventory.add_backend(executor, backend);
        inventory
    }

    /// Enumerates every table of several backends into one inventory.
    pub fn enumerate_all(executor: &dyn Executor, backends: &[Backend]) -> Self {
        let mut inventory = Inventory::default();
        for backend in backends {
            inventory.add_backend(executor, backend);
        }
        inventory
    }

    fn add_backend(&mut self, executor: &dyn Executor, backend: &Backend) {
        for &table in backend.tables {
            let argv = vec![
                backend.save_binary.to_string(),
                "-t".to_string(),
                table.to_string(),
            ];
            let output = match executor.execute(&argv) {
                Ok(output) if output.success() => output.stdout,
                Ok(output) => {
                    warn!(
                        binary = backend.save_binary,
                        table = %table,
                        exit_status = output.exit_status,
                        "listing command failed, reporting table as empty"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        binary = backend.save_binary,
                        table = %table,
                        error = %e,
                        "listing command could not run, reporting table as empty"
                    );
                    continue;
                }
            };
            self.scanned.insert((backend.protocol, table));
            self.add_segments(&output, table, backend.protocol);
        }
    }

    fn add_segments(&mut self, output: &str, table: Table, protocol: Protocol) {
        for segment in scanner::scan(output) {
            if segment.table != table {
                // `-t` should constrain the output; stray segments are
                // tolerated but attributed to their own table
                debug!(expected = %table, found = %segment.table, "extra table segment in save output");
            }
            for chain in &segment.chains {
                self.chains.push(LiveChain {
                    id: ChainId {
                        chain: chain.name.clone(),
                        table: segment.table,
                        protocol,
                    },
                    policy: chain.policy,
                });
            }
            let mut positions: HashMap<String, usize> = HashMap::new();
            for line in &segment.rule_lines {
                let Some(rule) = decode_rule(line, segment.table, protocol) else {
                    continue;
                };
                let position = positions.entry(rule.chain.clone()).or_insert(0);
                self.rules.push(LiveRule {
                    rule,
                    position: *position,
                });
                *position += 1;
            }
        }
    }

    /// Finds a discovered chain by identity.
    pub fn chain(&self, id: &ChainId) -> Option<&LiveChain> {
        self.chains.iter().find(|c| &c.id == id)
    }

    /// A chain is present when it was scanned, or when it is a built-in of
    /// a successfully-listed table (built-ins always exist even when the
    /// save output omits an untouched table section).
    pub fn chain_present(&self, id: &ChainId) -> bool {
        self.chain(id).is_some()
            || (is_builtin(&id.chain)
                && builtin_legal_for_table(&id.chain, id.table)
                && self.scanned.contains(&(id.protocol, id.table)))
    }

    /// Live policy for comparison purposes. Built-ins with no explicit
    /// policy in the scan assume ACCEPT, the kernel's ambient default, so
    /// untouched tables do not report spurious drift.
    pub fn effective_policy(&self, id: &ChainId) -> Option<Policy> {
        match self.chain(id) {
            Some(chain) => chain.policy.or_else(|| {
                is_builtin(&id.chain).then_some(Policy::Accept)
            }),
            None => (is_builtin(&id.chain) && self.chain_present(id)).then_some(Policy::Accept),
        }
    }

    /// Rules of one chain, in live order.
    pub fn rules_in_chain(&self, id: &ChainId) -> Vec<&LiveRule> {
        let mut rules: Vec<&LiveRule> = self
            .rules
            .iter()
            .filter(|r| {
                r.rule.chain == id.chain
                    && r.rule.table == id.table
                    && r.rule.protocol == id.protocol
            })
            .collect();
        rules.sort_by_key(|r| r.position);
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{EBTABLES, IPTABLES};
    use crate::core::mocks::MockExecutor;

    const FILTER_SAVE: &str = "\
*filter
:INPUT ACCEPT [10:100]
:FORWARD ACCEPT [0:0]
:OUTPUT ACCEPT [9:90]
:fail2ban-ssh - [0:0]
-A INPUT -p tcp -m multiport --dports 22 -m comment --comment \"100 allow ssh\" -j ACCEPT
-A INPUT -p tcp -m multiport --dports 80,443 -m comment --comment \"200 allow web\" -j ACCEPT
-A INPUT -s 169.254.0.0/16 -j DROP
-A fail2ban-ssh -j RETURN
COMMIT
";

    fn executor() -> MockExecutor {
        MockExecutor::new().with_save_output("iptables-save", "filter", FILTER_SAVE)
    }

    fn id(chain: &str) -> ChainId {
        ChainId {
            chain: chain.to_string(),
            table: Table::Filter,
            protocol: Protocol::IPv4,
        }
    }

    #[test]
    fn test_enumerate_collects_chains_and_rules() {
        let inventory = Inventory::enumerate(&executor(), &IPTABLES);

        assert!(inventory.chain_present(&id("INPUT")));
        assert!(inventory.chain_present(&id("fail2ban-ssh")));
        assert!(!inventory.chain_present(&id("no-such-chain")));

        let input_rules = inventory.rules_in_chain(&id("INPUT"));
        assert_eq!(input_rules.len(), 3);
        assert_eq!(input_rules[0].rule.name, "100 allow ssh");
        assert_eq!(input_rules[0].position, 0);
        assert_eq!(input_rules[1].rule.name, "200 allow web");
        assert_eq!(input_rules[1].position, 1);
        // Uncommented rule gets a synthetic foreign name but keeps its slot
        assert!(input_rules[2].rule.name.starts_with("9999 "));
        assert_eq!(input_rules[2].position, 2);

        // Positions are tracked per chain
        let f2b = inventory.rules_in_chain(&id("fail2ban-ssh"));
        assert_eq!(f2b.len(), 1);
        assert_eq!(f2b[0].position, 0);
    }

    #[test]
    fn test_failed_table_is_absent_others_continue() {
        // Only filter is scripted; nat/mangle/raw/security fail
        let inventory = Inventory::enumerate(&executor(), &IPTABLES);

        assert!(inventory.scanned.contains(&(Protocol::IPv4, Table::Filter)));
        assert!(!inventory.scanned.contains(&(Protocol::IPv4, Table::Nat)));

        let nat_prerouting = ChainId {
            chain: "PREROUTING".to_string(),
            table: Table::Nat,
            protocol: Protocol::IPv4,
        };
        assert!(!inventory.chain_present(&nat_prerouting));
        assert_eq!(inventory.effective_policy(&nat_prerouting), None);
    }

    #[test]
    fn test_builtin_policy_defaults_to_accept() {
        let output = "*filter\n:INPUT DROP [0:0]\nCOMMIT\n";
        let mock = MockExecutor::new().with_save_output("iptables-save", "filter", output);
        let inventory = Inventory::enumerate(&mock, &IPTABLES);

        assert_eq!(inventory.effective_policy(&id("INPUT")), Some(Policy::Drop));
        // OUTPUT was not in the scan but filter listed fine: present with
        // the ambient ACCEPT default
        assert!(inventory.chain_present(&id("OUTPUT")));
        assert_eq!(inventory.effective_policy(&id("OUTPUT")), Some(Policy::Accept));
        // User chains have no implied policy
        assert_eq!(inventory.effective_policy(&id("fail2ban-ssh")), None);
    }

    #[test]
    fn test_enumerate_all_separates_protocols() {
        let mock = MockExecutor::new()
            .with_save_output("iptables-save", "filter", FILTER_SAVE)
            .with_save_output("ebtables-save", "broute", "*broute\n:BROUTING ACCEPT\nCOMMIT\n");
        let inventory = Inventory::enumerate_all(&mock, &[IPTABLES, EBTABLES]);

        let brouting = ChainId {
            chain: "BROUTING".to_string(),
            table: Table::Broute,
            protocol: Protocol::Ethernet,
        };
        assert!(inventory.chain_present(&brouting));
        assert_eq!(inventory.effective_policy(&brouting), Some(Policy::Accept));
        // The IPv4 inventory is unaffected by the ethernet scan
        assert!(inventory.chain_present(&id("INPUT")));
    }
}
