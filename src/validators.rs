//! Input validation for fwunit.yaml
//!
//! Source names end up as cache keys, CLI arguments and (usually) file names,
//! so they are restricted to a conservative character set. Address lists are
//! parsed with the field they came from attached to the error.

use crate::core::error::ConfigError;
use crate::core::range_set::IpSet;
use std::sync::LazyLock;

/// Validates a source name.
///
/// Allowed: ASCII alphanumerics, `-`, `_` and `.`, at most 64 characters,
/// not starting with `.`.
///
/// # Examples
///
/// ```
/// use fwunit::validators::validate_source_name;
///
/// assert!(validate_source_name("edge-fw1").is_ok());
/// assert!(validate_source_name("../etc").is_err());
/// ```
///
/// # Errors
///
/// Returns `ConfigError::InvalidSource` describing the problem.
pub fn validate_source_name(name: &str) -> Result<(), ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidSource {
        source_name: name.to_string(),
        message: message.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("source name is empty"));
    }
    if name.len() > 64 {
        return Err(invalid("source name too long (max 64 characters)"));
    }
    if name.starts_with('.') {
        return Err(invalid("source name must not start with '.'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("source name contains invalid characters"));
    }
    Ok(())
}

/// Parses a list of address specifications belonging to `field` of `source`.
///
/// Each entry may itself hold several comma separated addresses.
///
/// # Errors
///
/// Returns `ConfigError::InvalidSource` naming the field and the bad entry.
pub fn parse_addresses<S: AsRef<str>>(
    source: &str,
    field: &str,
    entries: &[S],
) -> Result<IpSet, ConfigError> {
    entries.iter().try_fold(IpSet::new(), |acc, entry| {
        let set: IpSet = entry
            .as_ref()
            .parse()
            .map_err(|e: ConfigError| ConfigError::InvalidSource {
                source_name: source.to_string(),
                message: format!("{field}: {e}"),
            })?;
        Ok(acc.union(&set))
    })
}

static RESERVED: LazyLock<Vec<(&'static str, IpSet)>> = LazyLock::new(|| {
    [
        ("loopback", "127.0.0.0/8, ::1"),
        ("link-local", "169.254.0.0/16, fe80::/10"),
        ("multicast", "224.0.0.0/4, ff00::/8"),
    ]
    .into_iter()
    .filter_map(|(label, addrs)| Some((label, addrs.parse().ok()?)))
    .collect()
});

/// Checks an address space for reserved ranges that no firewall owns.
///
/// Returns a warning message if found, `None` otherwise.
pub fn check_reserved_addresses(addrs: &IpSet) -> Option<String> {
    let found: Vec<&str> = RESERVED
        .iter()
        .filter(|(_, reserved)| addrs.overlaps(reserved))
        .map(|(label, _)| *label)
        .collect();
    if found.is_empty() {
        None
    } else {
        Some(format!("address space includes {} addresses", found.join("/")))
    }
}
