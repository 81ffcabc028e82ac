//! Command emitter: reconciliation decisions -> firewall binary invocations
//!
//! Translates each planned [`Op`] into the literal argv for the backend
//! binary and drives the execution collaborator. After every successful
//! mutating command the OS-specific persistence command runs so changes
//! survive reboot; persistence failure is downgraded to a warning because
//! the live state is already correctly changed.

use tracing::{info, warn};

use super::backend::Backend;
use super::codec::{delete_args, insert_args};
use super::error::{Error, Result};
use super::exec::{run_checked, Executor};
use super::facts::{persistence_command, Capabilities, Facts};
use super::reconcile::{Op, Plan};

/// Emits commands for planned operations.
pub struct Emitter<'a> {
    executor: &'a dyn Executor,
    caps: Capabilities,
    persistence: Option<Vec<String>>,
}

/// Outcome of applying one plan. Already-applied changes are never rolled
/// back; failed entities are retried on the next pass.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: usize,
    pub errors: Vec<Error>,
}

impl ApplyReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<'a> Emitter<'a> {
    pub fn new(executor: &'a dyn Executor, facts: &dyn Facts) -> Self {
        Self {
            executor,
            caps: Capabilities::from_facts(facts),
            persistence: persistence_command(facts),
        }
    }

    /// The argv sequences one operation expands to, in execution order.
    /// Used directly for dry-run rendering.
    pub fn commands_for(&self, op: &Op) -> Vec<Vec<String>> {
        match op {
            Op::CreateChain { id } => vec![chain_command(id, &["-N", &id.chain])],
            Op::SetPolicy { id, policy } => {
                vec![chain_command(id, &["-P", &id.chain, policy.as_token()])]
            }
            Op::FlushChain { id } => vec![chain_command(id, &["-F", &id.chain])],
            Op::DeleteChain { id } => vec![chain_command(id, &["-X", &id.chain])],
            Op::InsertRule { rule, position } => {
                let backend = Backend::for_protocol(rule.protocol);
                let mut argv = vec![backend.binary.to_string()];
                argv.extend(insert_args(rule, *position, &self.caps));
                vec![argv]
            }
            Op::DeleteRule { rule } => {
                let backend = Backend::for_protocol(rule.protocol);
                let mut argv = vec![backend.binary.to_string()];
                argv.extend(delete_args(rule, &self.caps));
                vec![argv]
            }
        }
    }

    /// Executes one operation, persisting after each successful command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] when the firewall binary fails; the
    /// persistence step never fails this method.
    pub fn apply(&self, op: &Op) -> Result<()> {
        info!("{}", op.describe());
        for argv in self.commands_for(op) {
            run_checked(self.executor, &argv)?;
            self.persist();
        }
        Ok(())
    }

    /// Fire-and-forget save-to-disk step.
    fn persist(&self) {
        let Some(argv) = &self.persistence else {
            return;
        };
        let result = match self.executor.execute(argv) {
            Ok(output) if output.success() => return,
            Ok(output) => format!("exit status {}", output.exit_status),
            Err(e) => e.to_string(),
        };
        warn!(
            command = argv.join(" "),
            "{}",
            Error::Persistence(result)
        );
    }
}

/// Applies every operation of a plan, continuing past per-entity failures.
/// Structural errors collected during planning carry over into the report.
pub fn apply_plan(plan: Plan, emitter: &Emitter<'_>) -> ApplyReport {
    let mut report = ApplyReport {
        applied: 0,
        errors: plan.errors,
    };
    for op in &plan.ops {
        match emitter.apply(op) {
            Ok(()) => report.applied += 1,
            Err(e) => {
                warn!("{e}");
                report.errors.push(e);
            }
        }
    }
    report
}

fn chain_command(id: &super::chain::ChainId, tail: &[&str]) -> Vec<String> {
    let backend = Backend::for_protocol(id.protocol);
    let mut argv = vec![
        backend.binary.to_string(),
        "-t".to_string(),
        id.table.to_string(),
    ];
    argv.extend(tail.iter().map(|s| (*s).to_string()));
    argv
}
