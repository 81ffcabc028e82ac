//! Input validation for desired-state documents
//!
//! Centralized checks for the fields whose bad values would otherwise
//! surface only as opaque iptables errors at apply time. Validation is
//! entity-scoped: one bad rule is reported and skipped, the rest of the
//! document proceeds.

/// Validates a rule name: an unsigned integer ordinal, whitespace, then
/// free text.
///
/// # Examples
///
/// ```
/// use iptsync::validators::validate_rule_name;
///
/// assert!(validate_rule_name("100 allow ssh").is_ok());
/// assert!(validate_rule_name("allow ssh").is_err());
/// assert!(validate_rule_name("100").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` when the ordinal prefix or the trailing text is missing.
pub fn validate_rule_name(name: &str) -> Result<(), String> {
    let digits: &str = {
        let end = name
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(name.len(), |(i, _)| i);
        &name[..end]
    };
    if digits.is_empty() {
        return Err("name must begin with an unsigned integer ordinal".to_string());
    }
    if digits.parse::<u32>().is_err() {
        return Err("ordinal prefix does not fit an unsigned 32-bit integer".to_string());
    }
    let rest = &name[digits.len()..];
    if !rest.starts_with(char::is_whitespace) || rest.trim().is_empty() {
        return Err("name needs free text after the ordinal".to_string());
    }
    Ok(())
}

/// Validates one port entry: `N` or `N-M`, ports 1-65535, range ascending.
/// A leading `! ` negation marker is allowed.
///
/// # Errors
///
/// Returns `Err` for port 0, values above 65535, or a descending range.
pub fn validate_port_entry(entry: &str) -> Result<(), String> {
    let entry = entry.strip_prefix("! ").unwrap_or(entry);
    let parse = |p: &str| -> Result<u16, String> {
        let port: u16 = p
            .parse()
            .map_err(|_| format!("invalid port {p:?}"))?;
        if port == 0 {
            return Err("port must be between 1 and 65535".to_string());
        }
        Ok(port)
    };
    match entry.split_once('-') {
        Some((start, end)) => {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(format!("port range {start}-{end} is descending"));
            }
            Ok(())
        }
        None => parse(entry).map(|_| ()),
    }
}

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// A `+` suffix wildcard (iptables interface globbing) is permitted.
///
/// # Errors
///
/// Returns `Err` if the interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<(), String> {
    let name = name.strip_prefix("! ").unwrap_or(name);
    if name.is_empty() {
        return Err("interface name must not be empty".to_string());
    }
    if name.len() > 15 {
        return Err("interface name too long (max 15 characters)".to_string());
    }
    if name == "." || name == ".." {
        return Err("invalid interface name".to_string());
    }
    let body = name.strip_suffix('+').unwrap_or(name);
    if !body
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("interface name contains invalid characters".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_name_shapes() {
        assert!(validate_rule_name("000 allow foo").is_ok());
        assert!(validate_rule_name("9999 d41d8cd9").is_ok());
        assert!(validate_rule_name("nope").is_err());
        assert!(validate_rule_name("100").is_err());
        assert!(validate_rule_name("100 ").is_err());
        assert!(validate_rule_name("100x allow").is_err());
        assert!(validate_rule_name("").is_err());
        // Ordinal larger than u32
        assert!(validate_rule_name("99999999999 huge").is_err());
    }

    #[test]
    fn test_port_entries() {
        assert!(validate_port_entry("22").is_ok());
        assert!(validate_port_entry("512-1024").is_ok());
        assert!(validate_port_entry("! 22").is_ok());
        assert!(validate_port_entry("0").is_err());
        assert!(validate_port_entry("70000").is_err());
        assert!(validate_port_entry("1024-512").is_err());
        assert!(validate_port_entry("http").is_err());
    }

    #[test]
    fn test_interface_names() {
        assert!(validate_interface("eth0").is_ok());
        assert!(validate_interface("br-lan.42").is_ok());
        assert!(validate_interface("veth+").is_ok());
        assert!(validate_interface("! eth0").is_ok());
        assert!(validate_interface("").is_err());
        assert!(validate_interface("waytoolonginterface0").is_err());
        assert!(validate_interface("..").is_err());
        assert!(validate_interface("eth 0").is_err());
    }
}
