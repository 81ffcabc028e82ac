//! Stateful executor mock shared by unit and integration tests.
//!
//! Kept in the library (not behind `cfg(test)`) so the integration test
//! crate can drive full reconciliation passes without touching a real
//! netfilter installation.

use std::cell::RefCell;
use std::collections::HashMap;

use super::error::Result;
use super::exec::{CommandOutput, Executor};

/// Scripted [`Executor`].
///
/// Listing commands (`*-save -t <table>`) return canned save output per
/// (binary, table) pair; everything else succeeds unless its argv starts
/// with a configured failure prefix. Every invocation is recorded in
/// order.
#[derive(Debug, Default)]
pub struct MockExecutor {
    save_output: HashMap<(String, String), String>,
    fail_prefixes: Vec<Vec<String>>,
    pub executed: RefCell<Vec<Vec<String>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the save output one `(save_binary, table)` listing returns.
    pub fn with_save_output(mut self, save_binary: &str, table: &str, output: &str) -> Self {
        self.save_output
            .insert((save_binary.to_string(), table.to_string()), output.to_string());
        self
    }

    /// Any command whose argv starts with `prefix` fails with exit 1.
    pub fn with_failure(mut self, prefix: &[&str]) -> Self {
        self.fail_prefixes
            .push(prefix.iter().map(|s| (*s).to_string()).collect());
        self
    }

    /// All mutating commands recorded so far (listing commands excluded).
    pub fn mutations(&self) -> Vec<Vec<String>> {
        self.executed
            .borrow()
            .iter()
            .filter(|argv| !argv.first().is_some_and(|b| b.ends_with("-save")))
            .cloned()
            .collect()
    }
}

impl Executor for MockExecutor {
    fn execute(&self, argv: &[String]) -> Result<CommandOutput> {
        self.executed.borrow_mut().push(argv.to_vec());

        if self
            .fail_prefixes
            .iter()
            .any(|prefix| argv.starts_with(prefix))
        {
            return Ok(CommandOutput {
                stdout: String::new(),
                exit_status: 1,
            });
        }

        if let Some(binary) = argv.first().filter(|b| b.ends_with("-save")) {
            let table = argv
                .iter()
                .position(|a| a == "-t")
                .and_then(|i| argv.get(i + 1))
                .cloned()
                .unwrap_or_default();
            return match self.save_output.get(&(binary.clone(), table)) {
                Some(output) => Ok(CommandOutput {
                    stdout: output.clone(),
                    exit_status: 0,
                }),
                // Table not scripted: behave like a missing kernel module
                None => Ok(CommandOutput {
                    stdout: String::new(),
                    exit_status: 1,
                }),
            };
        }

        Ok(CommandOutput {
            stdout: String::new(),
            exit_status: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_returns_scripted_save_output() {
        let mock = MockExecutor::new().with_save_output("iptables-save", "filter", "*filter\nCOMMIT\n");
        let argv = vec![
            "iptables-save".to_string(),
            "-t".to_string(),
            "filter".to_string(),
        ];
        let out = mock.execute(&argv).unwrap();
        assert!(out.success());
        assert!(out.stdout.starts_with("*filter"));

        // Unscripted table fails like a missing module
        let argv = vec![
            "iptables-save".to_string(),
            "-t".to_string(),
            "broute".to_string(),
        ];
        assert!(!mock.execute(&argv).unwrap().success());
    }

    #[test]
    fn test_mock_records_and_fails_on_prefix() {
        let mock = MockExecutor::new().with_failure(&["iptables", "-t", "filter", "-N"]);
        let create = vec![
            "iptables".to_string(),
            "-t".to_string(),
            "filter".to_string(),
            "-N".to_string(),
            "mychain".to_string(),
        ];
        assert!(!mock.execute(&create).unwrap().success());
        assert_eq!(mock.executed.borrow().len(), 1);
        assert_eq!(mock.mutations().len(), 1);
    }
}
