//! Reconciler: desired state vs. live inventory -> ordered operation plan
//!
//! For each desired chain and rule the reconciler decides no-op, create,
//! update, or delete, honoring the built-in-chain special cases and the
//! table/chain legality matrix. Validation runs before any operation is
//! planned; a structural error aborts only the offending entity and is
//! collected on the plan so independent entities proceed.
//!
//! Rule application order is the core guarantee: within one chain, rules
//! are realized in ascending ordinal order, and every insertion index is
//! computed against the chain's ordering *as it will be* at execution time
//! (a planning model mutates in lockstep with the planned operations, so
//! successive inserts account for earlier ones).

use std::collections::BTreeMap;
use tracing::warn;

use super::backend::Backend;
use super::chain::{builtin_legal_for_table, is_builtin, Chain, ChainId, Policy};
use super::error::Error;
use super::inventory::Inventory;
use super::purge::purge_overrides;
use super::rule::{Ensure, Rule, UNMANAGED_ORDINAL};

/// Desired records for one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct DesiredState {
    pub chains: Vec<Chain>,
    pub rules: Vec<Rule>,
}

/// One planned operation, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    CreateChain { id: ChainId },
    SetPolicy { id: ChainId, policy: Policy },
    FlushChain { id: ChainId },
    DeleteChain { id: ChainId },
    /// Insert at a 1-based position within the chain
    InsertRule { rule: Box<Rule>, position: usize },
    DeleteRule { rule: Box<Rule> },
}

impl Op {
    /// Human-readable notice for this operation, keyed by entity name.
    pub fn describe(&self) -> String {
        match self {
            Op::CreateChain { id } => format!("create chain {id}"),
            Op::SetPolicy { id, policy } => format!("set policy {} on chain {id}", policy.as_token()),
            Op::FlushChain { id } => format!("flush chain {id}"),
            Op::DeleteChain { id } => format!("delete chain {id}"),
            Op::InsertRule { rule, position } => format!(
                "insert rule {} into {}:{}:{} at position {position}",
                rule.name, rule.chain, rule.table, rule.protocol
            ),
            Op::DeleteRule { rule } => format!(
                "delete rule {} from {}:{}:{}",
                rule.name, rule.chain, rule.table, rule.protocol
            ),
        }
    }
}

/// The outcome of one planning pass.
#[derive(Debug, Default)]
pub struct Plan {
    pub ops: Vec<Op>,
    /// Entity-scoped structural errors; the entities behind them got no ops
    pub errors: Vec<Error>,
}

impl Plan {
    pub fn is_converged(&self) -> bool {
        self.ops.is_empty() && self.errors.is_empty()
    }
}

/// Planning model of one chain's rule ordering.
struct Slot {
    ordinal: u32,
    name: String,
}

/// Computes the operation plan converging live state to desired state.
pub fn plan(desired: &DesiredState, inventory: &Inventory) -> Plan {
    let mut plan = Plan::default();

    // Chain validation pass
    let mut present_chains: Vec<(&Chain, ChainId)> = Vec::new();
    let mut absent_chains: Vec<(&Chain, ChainId)> = Vec::new();
    for chain in &desired.chains {
        let id = match chain.id() {
            Ok(id) => id,
            Err(msg) => {
                plan.errors.push(Error::structural(chain.name.as_str(), msg));
                continue;
            }
        };
        if let Err(msg) = chain.check_invariants() {
            plan.errors.push(Error::structural(chain.name.as_str(), msg));
            continue;
        }
        match chain.ensure {
            Ensure::Present => present_chains.push((chain, id)),
            Ensure::Absent => absent_chains.push((chain, id)),
        }
    }

    // Rule validation pass
    let mut valid_rules: Vec<&Rule> = Vec::new();
    for rule in &desired.rules {
        if let Err(msg) = validate_rule(rule) {
            plan.errors.push(Error::structural(rule.name.as_str(), msg));
            continue;
        }
        if absent_chains
            .iter()
            .any(|(_, id)| id.chain == rule.chain && id.table == rule.table && id.protocol == rule.protocol)
            && rule.ensure == Ensure::Present
        {
            plan.errors.push(Error::structural(
                rule.name.as_str(),
                format!("chain {} is declared absent", rule.chain),
            ));
            continue;
        }
        valid_rules.push(rule);
    }

    // Chain creation and policy alignment
    for (chain, id) in &present_chains {
        if inventory.chain_present(id) {
            if let Some(policy) = chain.policy {
                if inventory.effective_policy(id) != Some(policy) {
                    plan.ops.push(Op::SetPolicy {
                        id: id.clone(),
                        policy,
                    });
                }
            }
        } else if is_builtin(&id.chain) {
            // Create on a built-in is only a verification that its table
            // exists; an unlisted table means the subsystem is unavailable
            warn!(chain = %id, "built-in chain unavailable, skipping");
        } else {
            plan.ops.push(Op::CreateChain { id: id.clone() });
        }
    }

    // Rule grouping: declared rules plus purge overrides, keyed by chain
    let mut groups: BTreeMap<String, (ChainId, Vec<Rule>)> = BTreeMap::new();
    for rule in &valid_rules {
        let id = ChainId {
            chain: rule.chain.clone(),
            table: rule.table,
            protocol: rule.protocol,
        };
        groups
            .entry(id.to_string())
            .or_insert_with(|| (id, Vec::new()))
            .1
            .push((*rule).clone());
    }
    for (chain, id) in &present_chains {
        match purge_overrides(chain, id, inventory, &desired.rules) {
            Ok(overrides) => {
                if overrides.is_empty() {
                    continue;
                }
                groups
                    .entry(id.to_string())
                    .or_insert_with(|| (id.clone(), Vec::new()))
                    .1
                    .extend(overrides);
            }
            Err(e) => plan.errors.push(e),
        }
    }

    for (_, (id, rules)) in groups {
        plan_chain_rules(&mut plan, &id, rules, inventory);
    }

    // Chain removal last: flush always precedes delete, and built-ins are
    // flushed and reset to ACCEPT rather than removed
    for (_, id) in &absent_chains {
        if !inventory.chain_present(id) {
            continue;
        }
        let has_rules = !inventory.rules_in_chain(id).is_empty();
        if is_builtin(&id.chain) {
            if has_rules {
                plan.ops.push(Op::FlushChain { id: id.clone() });
            }
            if inventory.effective_policy(id) != Some(Policy::Accept) {
                plan.ops.push(Op::SetPolicy {
                    id: id.clone(),
                    policy: Policy::Accept,
                });
            }
        } else {
            plan.ops.push(Op::FlushChain { id: id.clone() });
            plan.ops.push(Op::DeleteChain { id: id.clone() });
        }
    }

    plan
}

/// Plans the rule operations for one chain.
fn plan_chain_rules(plan: &mut Plan, id: &ChainId, rules: Vec<Rule>, inventory: &Inventory) {
    let live = inventory.rules_in_chain(id);
    let mut model: Vec<Slot> = live
        .iter()
        .map(|l| Slot {
            ordinal: l.rule.ordinal().unwrap_or(UNMANAGED_ORDINAL),
            name: l.rule.name.clone(),
        })
        .collect();

    let find_live = |name: &str| live.iter().find(|l| l.rule.name == name);

    // Deletions first; they never depend on position
    for rule in rules.iter().filter(|r| r.ensure == Ensure::Absent) {
        if let Some(pos) = model.iter().position(|s| s.name == rule.name) {
            model.remove(pos);
            let target = find_live(&rule.name).map_or_else(|| rule.clone(), |l| l.rule.clone());
            plan.ops.push(Op::DeleteRule {
                rule: Box::new(target),
            });
        }
    }

    // Creations and updates in ascending ordinal order (stable: declaration
    // order breaks ties)
    let mut to_apply: Vec<&Rule> = rules.iter().filter(|r| r.ensure == Ensure::Present).collect();
    to_apply.sort_by_key(|r| r.ordinal().unwrap_or(UNMANAGED_ORDINAL));

    for rule in to_apply {
        let ordinal = rule.ordinal().unwrap_or(UNMANAGED_ORDINAL);
        let in_model = model.iter().position(|s| s.name == rule.name);
        match (in_model, find_live(&rule.name)) {
            (Some(pos), Some(live_rule)) => {
                if rule.same_values(&live_rule.rule) {
                    continue;
                }
                // Update: delete the divergent rule, re-insert at the
                // position its ordinal sorts to
                model.remove(pos);
                plan.ops.push(Op::DeleteRule {
                    rule: Box::new(live_rule.rule.clone()),
                });
                insert_at_ordinal(plan, &mut model, rule, ordinal);
            }
            _ => insert_at_ordinal(plan, &mut model, rule, ordinal),
        }
    }
}

fn insert_at_ordinal(plan: &mut Plan, model: &mut Vec<Slot>, rule: &Rule, ordinal: u32) {
    let idx = model
        .iter()
        .position(|s| s.ordinal > ordinal)
        .unwrap_or(model.len());
    model.insert(
        idx,
        Slot {
            ordinal,
            name: rule.name.clone(),
        },
    );
    plan.ops.push(Op::InsertRule {
        rule: Box::new(rule.clone()),
        position: idx + 1,
    });
}

/// Structural validation of one desired rule.
fn validate_rule(rule: &Rule) -> Result<(), String> {
    crate::validators::validate_rule_name(&rule.name)?;
    if rule.chain.is_empty() {
        return Err("rule must name a chain".to_string());
    }
    rule.check_invariants()?;
    for port in rule.sport.iter().chain(rule.dport.iter()) {
        crate::validators::validate_port_entry(port)?;
    }
    for iface in [&rule.iniface, &rule.outiface].into_iter().flatten() {
        crate::validators::validate_interface(iface)?;
    }
    if is_builtin(&rule.chain) && !builtin_legal_for_table(&rule.chain, rule.table) {
        return Err(format!(
            "chain {} is not legal in table {}",
            rule.chain, rule.table
        ));
    }
    if !Backend::for_protocol(rule.protocol).supports(rule.table) {
        return Err(format!(
            "table {} is not supported by the {} backend",
            rule.table, rule.protocol
        ));
    }
    Ok(())
}
