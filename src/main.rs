//! iptsync - declarative state synchronizer for Linux netfilter
//!
//! Reconciles declared firewall state against the live
//! iptables/ip6tables/ebtables configuration.
//!
//! # Usage
//!
//! ```bash
//! iptsync show                     # Print the live inventory
//! iptsync show --proto IPv6        # One protocol family only
//! iptsync diff rules.json          # Plan without applying
//! iptsync apply rules.json         # Converge live state to the document
//! ```
//!
//! `diff` prints the exact commands `apply` would run. Exit status is
//! non-zero when any entity fails validation or execution.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use iptsync::config;
use iptsync::core::backend::{self, Backend};
use iptsync::core::emit::{apply_plan, Emitter};
use iptsync::core::exec::SystemExecutor;
use iptsync::core::facts::SystemFacts;
use iptsync::core::inventory::Inventory;
use iptsync::core::reconcile::{self, DesiredState};
use iptsync::core::rule::Protocol;

#[derive(Parser)]
#[command(name = "iptsync")]
#[command(about = "Declarative state synchronizer for iptables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the live rule and chain inventory
    Show {
        /// Limit to one protocol family (IPv4, IPv6, ethernet)
        #[arg(long)]
        proto: Option<Protocol>,
    },
    /// Plan against a desired-state document without applying
    Diff {
        /// Path to the desired-state document
        file: PathBuf,
        /// Limit to one protocol family (IPv4, IPv6, ethernet)
        #[arg(long)]
        proto: Option<Protocol>,
    },
    /// Converge live state to a desired-state document
    Apply {
        /// Path to the desired-state document
        file: PathBuf,
        /// Limit to one protocol family (IPv4, IPv6, ethernet)
        #[arg(long)]
        proto: Option<Protocol>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match handle_cli(cli.command) {
        Ok(clean) => {
            if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn backends(proto: Option<Protocol>) -> Vec<Backend> {
    match proto {
        Some(proto) => vec![Backend::for_protocol(proto)],
        None => backend::ALL.to_vec(),
    }
}

/// Restricts a document to one protocol family.
fn filter_desired(mut desired: DesiredState, proto: Option<Protocol>) -> DesiredState {
    let Some(proto) = proto else {
        return desired;
    };
    desired.rules.retain(|r| r.protocol == proto);
    desired
        .chains
        .retain(|c| c.id().is_ok_and(|id| id.protocol == proto));
    desired
}

fn handle_cli(command: Commands) -> iptsync::Result<bool> {
    let executor = SystemExecutor;
    match command {
        Commands::Show { proto } => {
            let inventory = Inventory::enumerate_all(&executor, &backends(proto));
            for chain in &inventory.chains {
                match chain.policy {
                    Some(policy) => println!("chain {} policy {}", chain.id, policy.as_token()),
                    None => println!("chain {}", chain.id),
                }
            }
            for live in &inventory.rules {
                let rule = &live.rule;
                println!(
                    "rule {} ({}:{}:{}) {}",
                    rule.name,
                    rule.chain,
                    rule.table,
                    rule.protocol,
                    rule.line.as_deref().unwrap_or_default()
                );
            }
            Ok(true)
        }
        Commands::Diff { file, proto } => {
            let desired = filter_desired(config::load_desired(&file)?, proto);
            let inventory = Inventory::enumerate_all(&executor, &backends(proto));
            let plan = reconcile::plan(&desired, &inventory);

            let emitter = Emitter::new(&executor, &SystemFacts);
            for op in &plan.ops {
                println!("would: {}", op.describe());
                for argv in emitter.commands_for(op) {
                    println!("       {}", argv.join(" "));
                }
            }
            for err in &plan.errors {
                eprintln!("invalid: {err}");
            }
            if plan.is_converged() {
                println!("live state matches desired state");
            } else {
                println!(
                    "{} operation(s) pending, {} entity error(s)",
                    plan.ops.len(),
                    plan.errors.len()
                );
            }
            Ok(plan.errors.is_empty())
        }
        Commands::Apply { file, proto } => {
            let desired = filter_desired(config::load_desired(&file)?, proto);
            let inventory = Inventory::enumerate_all(&executor, &backends(proto));
            let plan = reconcile::plan(&desired, &inventory);

            let emitter = Emitter::new(&executor, &SystemFacts);
            let report = apply_plan(plan, &emitter);
            println!("{} operation(s) applied", report.applied);
            for err in &report.errors {
                eprintln!("failed: {err}");
            }
            Ok(report.success())
        }
    }
}
