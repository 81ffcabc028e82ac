//! Save-line tokenizer
//!
//! Converts one line of `iptables-save`-style rule syntax into an ordered
//! token list. Two quirks of the format live here and nowhere else:
//!
//! - Double-quoted values (comment text, log prefixes) form a single token
//!   even when they contain spaces. Quotes are stripped; `\"` and `\\`
//!   escapes inside are resolved.
//! - A standalone `!` is not a token of its own. It attaches as a negation
//!   marker to the token that follows it (`! -s 1.1.1.1` negates `-s`).

/// One token of a save line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// Set when the token was preceded by a standalone `!`
    pub negated: bool,
}

/// Tokenizes one save line.
///
/// Returns `None` when the line cannot be tokenized at all (empty input,
/// unterminated quote, or a trailing dangling `!`), so a single garbled
/// line never aborts an inventory scan.
pub fn tokenize(line: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    let mut pending_negation = false;

    loop {
        // Skip inter-token whitespace
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&c) = chars.peek() else { break };

        if c == '"' {
            chars.next();
            let mut text = String::new();
            let mut terminated = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        terminated = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some(escaped) => text.push(escaped),
                        None => return None,
                    },
                    _ => text.push(c),
                }
            }
            if !terminated {
                return None;
            }
            tokens.push(Token {
                text,
                negated: std::mem::take(&mut pending_negation),
            });
        } else {
            let mut text = String::new();
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                text.push(c);
            }
            if text == "!" {
                // Attaches to the following token
                pending_negation = true;
            } else {
                tokens.push(Token {
                    text,
                    negated: std::mem::take(&mut pending_negation),
                });
            }
        }
    }

    if pending_negation || tokens.is_empty() {
        return None;
    }
    Some(tokens)
}
