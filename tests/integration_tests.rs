//! Integration tests for iptsync
//!
//! These drive full reconciliation passes - enumerate, plan, apply -
//! against the scripted mock executor, pinning the exact command
//! sequences the engine emits. No test touches a real netfilter
//! installation.

use iptsync::config;
use iptsync::core::backend::{EBTABLES, IPTABLES};
use iptsync::core::emit::{apply_plan, Emitter};
use iptsync::core::facts::StaticFacts;
use iptsync::core::inventory::Inventory;
use iptsync::core::mocks::MockExecutor;
use iptsync::core::reconcile::{self, Op};

const DESIRED: &str = r#"{
    "chains": [
        { "name": "INPUT:filter:IPv4", "policy": "drop", "purge": true }
    ],
    "rules": [
        { "name": "100 allow ssh", "chain": "INPUT", "dport": ["22"], "action": "accept" },
        { "name": "200 allow web", "chain": "INPUT", "dport": ["80", "443"], "action": "accept" }
    ]
}"#;

const LIVE_DRIFTED: &str = "\
*filter
:INPUT ACCEPT [0:0]
:FORWARD ACCEPT [0:0]
:OUTPUT ACCEPT [0:0]
-A INPUT -p tcp -m multiport --dports 22 -m comment --comment \"100 allow ssh\" -j ACCEPT
-A INPUT -s 172.17.0.0/16 -j ACCEPT
COMMIT
";

const LIVE_CONVERGED: &str = "\
*filter
:INPUT DROP [0:0]
:FORWARD ACCEPT [0:0]
:OUTPUT ACCEPT [0:0]
-A INPUT -p tcp -m multiport --dports 22 -m comment --comment \"100 allow ssh\" -j ACCEPT
-A INPUT -p tcp -m multiport --dports 80,443 -m comment --comment \"200 allow web\" -j ACCEPT
COMMIT
";

#[test]
fn test_full_pass_converges_drifted_state() {
    let mock = MockExecutor::new().with_save_output("iptables-save", "filter", LIVE_DRIFTED);
    let desired = config::parse_desired(DESIRED).unwrap();
    let inventory = Inventory::enumerate(&mock, &IPTABLES);
    let plan = reconcile::plan(&desired, &inventory);

    assert!(plan.errors.is_empty());

    let facts = StaticFacts::default();
    let emitter = Emitter::new(&mock, &facts);
    let report = apply_plan(plan, &emitter);
    assert!(report.success());
    assert_eq!(report.applied, 3);

    assert_eq!(
        mock.mutations(),
        vec![
            // Policy drift
            vec!["iptables", "-t", "filter", "-P", "INPUT", "DROP"],
            // Purge of the unmanaged docker rule, by its exact saved text
            vec!["iptables", "-t", "filter", "-D", "INPUT", "-s", "172.17.0.0/16", "-j", "ACCEPT"],
            // Missing rule inserted at its ordinal position
            vec![
                "iptables", "-t", "filter", "-I", "INPUT", "2", "-p", "tcp", "-m", "multiport",
                "--dports", "80,443", "-m", "comment", "--comment", "200 allow web", "-j", "ACCEPT"
            ],
        ]
    );
}

#[test]
fn test_second_pass_plans_zero_commands() {
    let mock = MockExecutor::new().with_save_output("iptables-save", "filter", LIVE_CONVERGED);
    let desired = config::parse_desired(DESIRED).unwrap();
    let inventory = Inventory::enumerate(&mock, &IPTABLES);
    let plan = reconcile::plan(&desired, &inventory);

    assert!(
        plan.is_converged(),
        "expected no ops on converged state, got {:?}",
        plan.ops
    );
}

#[test]
fn test_ignore_patterns_exempt_live_rules_from_purge() {
    let desired = config::parse_desired(
        r#"{
            "chains": [
                { "name": "INPUT:filter:IPv4", "purge": true,
                  "ignore": ["172\\.17\\.", "-j fail2ban"] }
            ],
            "rules": [
                { "name": "100 allow ssh", "chain": "INPUT", "dport": ["22"], "action": "accept" }
            ]
        }"#,
    )
    .unwrap();
    let live = "\
*filter
:INPUT ACCEPT [0:0]
-A INPUT -p tcp -m multiport --dports 22 -m comment --comment \"100 allow ssh\" -j ACCEPT
-A INPUT -s 172.17.0.0/16 -j ACCEPT
-A INPUT -j fail2ban-ssh
-A INPUT -s 10.1.2.3/32 -j DROP
COMMIT
";
    let mock = MockExecutor::new().with_save_output("iptables-save", "filter", live);
    let inventory = Inventory::enumerate(&mock, &IPTABLES);
    let plan = reconcile::plan(&desired, &inventory);

    // Only the 10.1.2.3 rule is purgeable; the two ignored lines survive
    let deletes: Vec<&Op> = plan
        .ops
        .iter()
        .filter(|op| matches!(op, Op::DeleteRule { .. }))
        .collect();
    assert_eq!(deletes.len(), 1);
    match deletes[0] {
        Op::DeleteRule { rule } => {
            assert!(rule.line.as_deref().unwrap().contains("10.1.2.3"));
        }
        _ => unreachable!(),
    }
}

#[test]
fn test_foreign_rules_survive_purge_when_ignored() {
    let desired = config::parse_desired(
        r#"{
            "chains": [
                { "name": "INPUT:filter:IPv4", "purge": true, "ignore_foreign": true }
            ]
        }"#,
    )
    .unwrap();
    let live = "\
*filter
:INPUT ACCEPT [0:0]
-A INPUT -m comment --comment \"9005 other manager\" -j ACCEPT
-A INPUT -m comment --comment \"150 was ours once\" -j ACCEPT
COMMIT
";
    let mock = MockExecutor::new().with_save_output("iptables-save", "filter", live);
    let inventory = Inventory::enumerate(&mock, &IPTABLES);
    let plan = reconcile::plan(&desired, &inventory);

    assert_eq!(plan.ops.len(), 1);
    assert!(
        matches!(&plan.ops[0], Op::DeleteRule { rule } if rule.name == "150 was ours once")
    );
}

#[test]
fn test_builtin_ebtables_chain_is_flushed_never_deleted() {
    let desired = config::parse_desired(
        r#"{
            "chains": [
                { "name": "BROUTING:broute:ethernet", "policy": "drop", "ensure": "absent" }
            ]
        }"#,
    )
    .unwrap();
    let live = "\
*broute
:BROUTING DROP
-A BROUTING -p IPv4 -j ACCEPT
COMMIT
";
    let mock = MockExecutor::new().with_save_output("ebtables-save", "broute", live);
    let inventory = Inventory::enumerate(&mock, &EBTABLES);
    let plan = reconcile::plan(&desired, &inventory);
    assert!(plan.errors.is_empty());

    let facts = StaticFacts::default();
    let emitter = Emitter::new(&mock, &facts);
    let report = apply_plan(plan, &emitter);
    assert!(report.success());

    // Flush always precedes the policy reset, and no -X is ever issued
    assert_eq!(
        mock.mutations(),
        vec![
            vec!["ebtables", "-t", "broute", "-F", "BROUTING"],
            vec!["ebtables", "-t", "broute", "-P", "BROUTING", "ACCEPT"],
        ]
    );
}

#[test]
fn test_illegal_chain_issues_zero_commands() {
    let desired = config::parse_desired(
        r#"{
            "chains": [
                { "name": "FORWARD:nat:IPv4", "policy": "accept" }
            ]
        }"#,
    )
    .unwrap();
    let mock = MockExecutor::new()
        .with_save_output("iptables-save", "nat", "*nat\n:PREROUTING ACCEPT [0:0]\nCOMMIT\n");
    let inventory = Inventory::enumerate(&mock, &IPTABLES);
    let plan = reconcile::plan(&desired, &inventory);

    assert_eq!(plan.errors.len(), 1);
    assert!(plan.ops.is_empty());

    let facts = StaticFacts::default();
    let emitter = Emitter::new(&mock, &facts);
    let report = apply_plan(plan, &emitter);
    assert!(!report.success());
    assert!(mock.mutations().is_empty());
}

#[test]
fn test_execution_failure_leaves_other_entities_alone() {
    let desired = config::parse_desired(
        r#"{
            "rules": [
                { "name": "100 a", "chain": "INPUT", "dport": ["10"], "action": "accept" },
                { "name": "200 b", "chain": "INPUT", "dport": ["20"], "action": "accept" }
            ]
        }"#,
    )
    .unwrap();
    let live = "*filter\n:INPUT ACCEPT [0:0]\nCOMMIT\n";
    let mock = MockExecutor::new()
        .with_save_output("iptables-save", "filter", live)
        // First insert fails at position 1
        .with_failure(&["iptables", "-t", "filter", "-I", "INPUT", "1"]);
    let inventory = Inventory::enumerate(&mock, &IPTABLES);
    let plan = reconcile::plan(&desired, &inventory);

    let facts = StaticFacts::default();
    let emitter = Emitter::new(&mock, &facts);
    let report = apply_plan(plan, &emitter);

    // The failed rule is reported; the independent one was still applied.
    // Nothing is rolled back: the caller re-runs reconciliation instead.
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.applied, 1);
    assert_eq!(mock.mutations().len(), 2);
}

#[test]
fn test_persistence_runs_after_each_mutation() {
    let desired = config::parse_desired(
        r#"{
            "rules": [
                { "name": "100 a", "chain": "INPUT", "dport": ["10"], "action": "accept" },
                { "name": "200 b", "chain": "INPUT", "dport": ["20"], "action": "accept" }
            ]
        }"#,
    )
    .unwrap();
    let live = "*filter\n:INPUT ACCEPT [0:0]\nCOMMIT\n";
    let mock = MockExecutor::new().with_save_output("iptables-save", "filter", live);
    let inventory = Inventory::enumerate(&mock, &IPTABLES);
    let plan = reconcile::plan(&desired, &inventory);

    let facts = StaticFacts::with(&[("os_family", "Debian")]);
    let emitter = Emitter::new(&mock, &facts);
    let report = apply_plan(plan, &emitter);
    assert!(report.success());

    // insert, save, insert, save - persistence is per-command, not batched
    let kinds: Vec<String> = mock.mutations().iter().map(|argv| argv[0].clone()).collect();
    assert_eq!(
        kinds,
        vec!["iptables", "netfilter-persistent", "iptables", "netfilter-persistent"]
    );
}

#[test]
fn test_unavailable_table_does_not_block_other_tables() {
    // Only filter is scripted: nat/mangle/raw/security listings fail the
    // way a missing kernel module would
    let desired = config::parse_desired(
        r#"{
            "rules": [
                { "name": "100 a", "chain": "INPUT", "dport": ["10"], "action": "accept" }
            ]
        }"#,
    )
    .unwrap();
    let live = "*filter\n:INPUT ACCEPT [0:0]\nCOMMIT\n";
    let mock = MockExecutor::new().with_save_output("iptables-save", "filter", live);
    let inventory = Inventory::enumerate(&mock, &IPTABLES);
    let plan = reconcile::plan(&desired, &inventory);

    assert!(plan.errors.is_empty());
    assert_eq!(plan.ops.len(), 1);
}

#[test]
fn test_document_round_trip_through_serde() {
    // Desired-state records survive serialization, including purge knobs
    let desired = config::parse_desired(DESIRED).unwrap();
    let rules_json = serde_json::to_string(&desired.rules).unwrap();
    let rules: Vec<iptsync::Rule> = serde_json::from_str(&rules_json).unwrap();
    assert_eq!(rules, desired.rules);

    let chains_json = serde_json::to_string(&desired.chains).unwrap();
    assert!(chains_json.contains("\"purge\":true"));
}
