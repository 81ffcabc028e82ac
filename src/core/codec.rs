//! Rule codec: save-line text <-> structured [`Rule`] records
//!
//! Decode turns one `-A <chain> ...` line from `iptables-save` output into
//! a [`Rule`]. Encode produces the exact ordered argv sequence the firewall
//! binary expects for insert and delete operations. The two directions are
//! kept value-consistent: re-decoding a rule created from encoded args
//! yields the same structured values for every attribute the rule declares.
//!
//! Decode never fails on unrecognized flags. Unknown tokens stay visible
//! through [`Rule::line`] so the rule remains deletable and purge-eligible
//! even when not fully understood. A line that cannot be tokenized at all
//! (e.g. a `FATAL:` kernel diagnostic) decodes to `None` and is skipped.

use sha2::{Digest, Sha256};
use tracing::debug;

use super::facts::Capabilities;
use super::rule::{Action, Protocol, Rule, Table, UNMANAGED_ORDINAL};
use super::tokenizer::tokenize;

// ═══════════════════════════════════════════════════════════════════════════
// Decode
// ═══════════════════════════════════════════════════════════════════════════

/// Decodes one save line against a known table and protocol.
///
/// Returns `None` for lines that are not rules (`*filter`, `:INPUT`,
/// `COMMIT`, comments, diagnostics) or cannot be tokenized.
pub fn decode_rule(line: &str, table: Table, protocol: Protocol) -> Option<Rule> {
    let tokens = tokenize(line)?;
    if tokens.len() < 2 || tokens[0].text != "-A" {
        debug!(line, "skipping non-rule line");
        return None;
    }

    let mut rule = Rule {
        table,
        protocol,
        chain: tokens[1].text.clone(),
        line: Some(line.to_string()),
        ..Rule::default()
    };
    let mut comment: Option<String> = None;

    let mut i = 2;
    while i < tokens.len() {
        let token = &tokens[i];
        let negated = token.negated;
        // Consumes the value token following the current flag
        let value = |i: &mut usize| -> Option<String> {
            *i += 1;
            tokens.get(*i).map(|t| apply_negation(&t.text, negated))
        };

        match token.text.as_str() {
            // Module markers carry no information of their own in our
            // schema; the option names below are globally unambiguous.
            "-m" | "--match" => {
                i += 1;
            }
            "-s" | "--source" | "--src" => rule.source = value(&mut i),
            "-d" | "--destination" | "--dst" => rule.destination = value(&mut i),
            "-p" | "--protocol" => rule.proto = value(&mut i),
            "-i" | "--in-interface" => rule.iniface = value(&mut i),
            "-o" | "--out-interface" => rule.outiface = value(&mut i),
            "--sport" | "--sports" | "--source-port" | "--source-ports" => {
                rule.sport = value(&mut i).map(|v| split_ports(&v)).unwrap_or_default();
            }
            "--dport" | "--dports" | "--destination-port" | "--destination-ports" => {
                rule.dport = value(&mut i).map(|v| split_ports(&v)).unwrap_or_default();
            }
            "--tcp-flags" => {
                // Two value tokens: mask, then comparison
                let mask = value(&mut i);
                i += 1;
                let comp = tokens.get(i).map(|t| t.text.clone());
                if let (Some(mask), Some(comp)) = (mask, comp) {
                    rule.tcp_flags = Some(format!("{mask} {comp}"));
                }
            }
            "--state" => {
                rule.state = value(&mut i).map(|v| split_list(&v)).unwrap_or_default();
            }
            "--ctstate" => {
                rule.ctstate = value(&mut i).map(|v| split_list(&v)).unwrap_or_default();
            }
            "--icmp-type" | "--icmpv6-type" => rule.icmp = value(&mut i),
            "--limit" => rule.limit = value(&mut i),
            "--limit-burst" => rule.burst = value(&mut i),
            "--uid-owner" => rule.uid = value(&mut i),
            "--gid-owner" => rule.gid = value(&mut i),
            "--string" => rule.string_match = value(&mut i),
            "--algo" => rule.string_algo = value(&mut i),
            "--timestart" => rule.time_start = value(&mut i),
            "--timestop" => rule.time_stop = value(&mut i),
            "--monthdays" => rule.month_days = value(&mut i),
            "--weekdays" => rule.week_days = value(&mut i),
            "--log-level" => rule.log_level = value(&mut i),
            "--log-prefix" => rule.log_prefix = value(&mut i),
            "--reject-with" => rule.reject = value(&mut i),
            "--set-mark" | "--set-xmark" => rule.set_mark = value(&mut i),
            "--to-source" => rule.tosource = value(&mut i),
            "--to-destination" => rule.todest = value(&mut i),
            "--to-ports" => rule.toports = value(&mut i),
            "--comment" => comment = value(&mut i),
            "-j" | "--jump" => {
                if let Some(target) = value(&mut i) {
                    match Action::from_target(&target) {
                        Some(action) => rule.action = Some(action),
                        None => rule.jump = Some(target),
                    }
                }
            }
            "-g" | "--goto" => rule.goto = value(&mut i),
            other => {
                // Unknown flag: keep it out of the structured schema but
                // swallow its value token when one follows, so the scan
                // stays aligned.
                if other.starts_with('-')
                    && tokens
                        .get(i + 1)
                        .is_some_and(|t| !t.text.starts_with('-'))
                {
                    i += 1;
                }
            }
        }
        i += 1;
    }

    rule.name = rule_name(comment.as_deref(), line);
    if rule.proto.is_none() {
        rule.proto = Some("all".to_string());
    }
    Some(rule)
}

fn apply_negation(value: &str, negated: bool) -> String {
    if negated {
        format!("! {value}")
    } else {
        value.to_string()
    }
}

/// Splits a comma-separated port list, rewriting native `N:M` ranges to the
/// declarative `N-M` form. Whole-list negation rides on the first element.
fn split_ports(value: &str) -> Vec<String> {
    let (neg, list) = match value.strip_prefix("! ") {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    list.split(',')
        .enumerate()
        .map(|(idx, port)| {
            let port = port.replace(':', "-");
            if neg && idx == 0 {
                format!("! {port}")
            } else {
                port
            }
        })
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    let (neg, list) = match value.strip_prefix("! ") {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    list.split(',')
        .enumerate()
        .map(|(idx, item)| {
            if neg && idx == 0 {
                format!("! {item}")
            } else {
                item.to_string()
            }
        })
        .collect()
}

/// Resolves the identity name of a decoded rule.
///
/// A comment whose first token is an unsigned integer IS the name. A
/// comment without a numeric prefix is pushed into the foreign range
/// (ordinal 9000) so purge accounting leaves it alone. No comment at all
/// yields a deterministic synthetic name from the rule text, stable across
/// re-scans of an unchanged rule.
fn rule_name(comment: Option<&str>, line: &str) -> String {
    match comment {
        Some(comment) => {
            let first = comment.split_whitespace().next().unwrap_or("");
            if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
                comment.to_string()
            } else {
                format!("9000 {comment}")
            }
        }
        None => {
            let digest = Sha256::digest(line.as_bytes());
            let hex: String = digest
                .iter()
                .take(6)
                .map(|b| format!("{b:02x}"))
                .collect();
            format!("{UNMANAGED_ORDINAL} {hex}")
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Encode
// ═══════════════════════════════════════════════════════════════════════════

/// Full argument list with the table flag first: `["-t", table] + match
/// args`. This is the canonical encoded form pinned by the round-trip
/// tests.
pub fn general_args(rule: &Rule, caps: &Capabilities) -> Vec<String> {
    let mut args = vec!["-t".to_string(), rule.table.to_string()];
    args.extend(match_args(rule, caps));
    args
}

/// Arguments for inserting the rule at a 1-based position.
pub fn insert_args(rule: &Rule, position: usize, caps: &Capabilities) -> Vec<String> {
    let mut args = vec![
        "-t".to_string(),
        rule.table.to_string(),
        "-I".to_string(),
        rule.chain.clone(),
        position.to_string(),
    ];
    args.extend(match_args(rule, caps));
    args
}

/// Arguments for deleting the rule.
///
/// Discovered rules are deleted from their exact saved text: the tokenized
/// `line` (minus its `-A <chain>` prefix) is replayed, which naturally
/// renders a saved quoted comment as one unquoted argv token. Declared
/// rules fall back to their encoded match args.
pub fn delete_args(rule: &Rule, caps: &Capabilities) -> Vec<String> {
    let mut args = vec![
        "-t".to_string(),
        rule.table.to_string(),
        "-D".to_string(),
        rule.chain.clone(),
    ];
    match rule.line.as_deref().and_then(tokenize) {
        Some(tokens) if tokens.len() >= 2 && tokens[0].text == "-A" => {
            for token in &tokens[2..] {
                if token.negated {
                    args.push("!".to_string());
                }
                args.push(token.text.clone());
            }
        }
        _ => args.extend(match_args(rule, caps)),
    }
    args
}

/// Ordered match/target flags, without the table prefix.
///
/// Flag order is canonical and pinned by tests: matches, then the comment
/// carrying the rule name, then the target and its trailing options.
pub fn match_args(rule: &Rule, caps: &Capabilities) -> Vec<String> {
    let mut args = Vec::new();

    push_value(&mut args, "-s", rule.source.as_deref());
    push_value(&mut args, "-d", rule.destination.as_deref());
    push_value(&mut args, "-i", rule.iniface.as_deref());
    push_value(&mut args, "-o", rule.outiface.as_deref());
    // "all" is the decode-side default for rules without a protocol match;
    // it encodes to no flag at all.
    if let Some(proto) = rule.proto.as_deref().filter(|p| *p != "all") {
        push_value(&mut args, "-p", Some(proto));
    }
    if let Some(flags) = rule.tcp_flags.as_deref() {
        let (neg, flags) = strip_negation(flags);
        if neg {
            args.push("!".to_string());
        }
        args.push("--tcp-flags".to_string());
        args.extend(flags.split_whitespace().map(String::from));
    }
    push_ports(&mut args, "--sports", "--sport", &rule.sport);
    push_ports(&mut args, "--dports", "--dport", &rule.dport);
    push_module_list(&mut args, "state", "--state", &rule.state);
    push_module_list(&mut args, "conntrack", "--ctstate", &rule.ctstate);
    push_value(&mut args, "--icmp-type", rule.icmp.as_deref());
    if rule.limit.is_some() || rule.burst.is_some() {
        args.push("-m".to_string());
        args.push("limit".to_string());
        push_value(&mut args, "--limit", rule.limit.as_deref());
        push_value(&mut args, "--limit-burst", rule.burst.as_deref());
    }
    if rule.string_match.is_some() {
        args.push("-m".to_string());
        args.push("string".to_string());
        push_value(&mut args, "--string", rule.string_match.as_deref());
        push_value(&mut args, "--algo", rule.string_algo.as_deref());
    }
    if rule.time_start.is_some()
        || rule.time_stop.is_some()
        || rule.month_days.is_some()
        || rule.week_days.is_some()
    {
        args.push("-m".to_string());
        args.push("time".to_string());
        push_value(&mut args, "--timestart", rule.time_start.as_deref());
        push_value(&mut args, "--timestop", rule.time_stop.as_deref());
        push_value(&mut args, "--monthdays", rule.month_days.as_deref());
        push_value(&mut args, "--weekdays", rule.week_days.as_deref());
    }
    if rule.uid.is_some() || rule.gid.is_some() {
        args.push("-m".to_string());
        args.push("owner".to_string());
        push_value(&mut args, "--uid-owner", rule.uid.as_deref());
        push_value(&mut args, "--gid-owner", rule.gid.as_deref());
    }
    if !rule.name.is_empty() {
        args.push("-m".to_string());
        args.push("comment".to_string());
        args.push("--comment".to_string());
        args.push(rule.name.clone());
    }

    // Target, then its trailing options
    if let Some(action) = rule.action {
        args.push("-j".to_string());
        args.push(action.as_target().to_string());
    } else if let Some(jump) = rule.jump.as_deref() {
        args.push("-j".to_string());
        args.push(jump.to_string());
    } else if let Some(goto) = rule.goto.as_deref() {
        args.push("-g".to_string());
        args.push(goto.to_string());
    }
    push_value(&mut args, "--log-level", rule.log_level.as_deref());
    push_value(&mut args, "--log-prefix", rule.log_prefix.as_deref());
    push_value(&mut args, "--reject-with", rule.reject.as_deref());
    if let Some(mark) = rule.set_mark.as_deref() {
        push_mark(&mut args, mark, caps);
    }
    push_value(&mut args, "--to-source", rule.tosource.as_deref());
    push_value(&mut args, "--to-destination", rule.todest.as_deref());
    push_value(&mut args, "--to-ports", rule.toports.as_deref());

    args
}

/// Emits `[!,] <flag>, <value>` with negation as its own preceding token.
fn push_value(args: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value {
        let (neg, value) = strip_negation(value);
        if neg {
            args.push("!".to_string());
        }
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

fn push_ports(args: &mut Vec<String>, multi_flag: &str, single_flag: &str, ports: &[String]) {
    if ports.is_empty() {
        return;
    }
    let (neg, first) = strip_negation(&ports[0]);
    let native: Vec<String> = std::iter::once(first.to_string())
        .chain(ports[1..].iter().cloned())
        .map(|p| p.replace('-', ":"))
        .collect();
    if ports.len() > 1 {
        args.push("-m".to_string());
        args.push("multiport".to_string());
        if neg {
            args.push("!".to_string());
        }
        args.push(multi_flag.to_string());
        args.push(native.join(","));
    } else {
        if neg {
            args.push("!".to_string());
        }
        args.push(single_flag.to_string());
        args.push(native.join(","));
    }
}

fn push_module_list(args: &mut Vec<String>, module: &str, flag: &str, list: &[String]) {
    if list.is_empty() {
        return;
    }
    args.push("-m".to_string());
    args.push(module.to_string());
    let (neg, first) = strip_negation(&list[0]);
    if neg {
        args.push("!".to_string());
    }
    args.push(flag.to_string());
    let joined: Vec<&str> = std::iter::once(first)
        .chain(list[1..].iter().map(String::as_str))
        .collect();
    args.push(joined.join(","));
}

/// Mark encoding differs by installed iptables version: `--set-xmark
/// mark/mask` when masks are supported, bare `--set-mark mark` before.
fn push_mark(args: &mut Vec<String>, mark: &str, caps: &Capabilities) {
    if caps.mark_mask {
        args.push("--set-xmark".to_string());
        args.push(mark.to_string());
    } else {
        args.push("--set-mark".to_string());
        args.push(mark.split('/').next().unwrap_or(mark).to_string());
    }
}

fn strip_negation(value: &str) -> (bool, &str) {
    match value.strip_prefix("! ") {
        Some(rest) => (true, rest),
        None => (false, value),
    }
}
