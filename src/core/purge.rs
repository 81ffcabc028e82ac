//! Purge/ignore filter
//!
//! For a chain declared with `purge = true`, computes the supplementary
//! desired-state override that marks unmanaged live rules as absent. The
//! filter deletes nothing itself: its output feeds the reconciler as
//! additional desired-absent entries, and explicitly declared rules of the
//! same name always take precedence over the override.

use regex::Regex;
use tracing::debug;

use super::chain::{Chain, ChainId};
use super::error::{Error, Result};
use super::inventory::Inventory;
use super::rule::{Ensure, Rule};

/// Computes the desired-absent override for one purgeable chain.
///
/// Exemptions, in order:
/// - live rules whose `line` text matches any `ignore` pattern
/// - with `ignore_foreign`, live rules whose name-ordinal is in the
///   reserved foreign range (>= 9000)
/// - rules explicitly declared for this chain (by name), whatever their
///   declared `ensure`
///
/// # Errors
///
/// Returns [`Error::IgnorePattern`] when an ignore entry is not a valid
/// regular expression; no override is produced in that case.
pub fn purge_overrides(
    chain: &Chain,
    id: &ChainId,
    inventory: &Inventory,
    declared: &[Rule],
) -> Result<Vec<Rule>> {
    if !chain.purge {
        return Ok(Vec::new());
    }

    let patterns = chain
        .ignore
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| Error::IgnorePattern {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect::<Result<Vec<Regex>>>()?;

    let mut overrides = Vec::new();
    for live in inventory.rules_in_chain(id) {
        let line = live.rule.line.as_deref().unwrap_or_default();
        if patterns.iter().any(|p| p.is_match(line)) {
            debug!(rule = %live.rule.name, "purge: exempt by ignore pattern");
            continue;
        }
        if chain.ignore_foreign && live.rule.is_foreign() {
            debug!(rule = %live.rule.name, "purge: exempt as foreign");
            continue;
        }
        if declared.iter().any(|d| {
            d.name == live.rule.name
                && d.chain == id.chain
                && d.table == id.table
                && d.protocol == id.protocol
        }) {
            // Explicit desired state wins over the override
            continue;
        }
        let mut absent = live.rule.clone();
        absent.ensure = Ensure::Absent;
        overrides.push(absent);
    }
    Ok(overrides)
}
