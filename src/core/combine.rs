//! Merging per-source rule sets into one global rule set
//!
//! Each source is authoritative for one [`AddressSpace`]. Filtering is
//! assumed to happen only at the two endpoints of a flow:
//!
//! - a flow inside one space is decided by that space's source
//! - a flow from space A to space B is permitted only if both A's and B's
//!   rules permit it
//! - a flow with an endpoint outside every declared space is denied
//!
//! Address spaces must not overlap, so every address has at most one owner.

use crate::core::error::ConfigError;
use crate::core::range_set::IpSet;
use crate::core::rule::{combine_names, simplify_rules, Rule};
use crate::core::rule_set::RuleSet;
use tracing::{debug, info};

/// The addresses one source is authoritative for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpace {
    pub name: String,
    pub addrs: IpSet,
}

impl AddressSpace {
    pub fn new(name: impl Into<String>, addrs: IpSet) -> Self {
        Self {
            name: name.into(),
            addrs,
        }
    }
}

/// A normalized rule set together with the space it answers for
#[derive(Debug, Clone, Copy)]
pub struct Authority<'a> {
    pub space: &'a AddressSpace,
    pub rules: &'a RuleSet,
}

fn check_disjoint(sources: &[Authority<'_>]) -> Result<(), ConfigError> {
    for (i, a) in sources.iter().enumerate() {
        for b in &sources[i + 1..] {
            if a.space.addrs.overlaps(&b.space.addrs) {
                return Err(ConfigError::OverlappingAddressSpaces {
                    first: a.space.name.clone(),
                    second: b.space.name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Rules of `rules` restricted to `src × dst`
fn restrict(rules: &RuleSet, src: &IpSet, dst: &IpSet) -> Vec<Rule> {
    rules
        .rules()
        .iter()
        .map(|r| {
            Rule::new(
                r.src.intersection(src),
                r.dst.intersection(dst),
                r.app.clone(),
                r.name.as_str(),
            )
        })
        .filter(|r| !r.is_empty())
        .collect()
}

/// Rules permitting a flow only where both `from` and `to` permit it,
/// restricted to `from`'s space as source and `to`'s space as destination.
///
/// Each outbound rule is intersected with each inbound rule, on addresses
/// and on applications.
fn cross(from: Authority<'_>, to: Authority<'_>) -> Vec<Rule> {
    let src_space = &from.space.addrs;
    let dst_space = &to.space.addrs;
    let outbound = restrict(from.rules, src_space, dst_space);
    let inbound = restrict(to.rules, src_space, dst_space);

    let mut rules = Vec::new();
    for x in &outbound {
        for y in &inbound {
            let Some(app) = x.app.intersection(&y.app) else {
                continue;
            };
            let rule = Rule::new(
                x.src.intersection(&y.src),
                x.dst.intersection(&y.dst),
                app,
                combine_names(&x.name, &y.name),
            );
            if !rule.is_empty() {
                rules.push(rule);
            }
        }
    }
    rules
}

/// Combines per-source rule sets into one.
///
/// # Errors
///
/// Returns `ConfigError::OverlappingAddressSpaces` if two sources claim the
/// same address.
pub fn combine(sources: &[Authority<'_>]) -> Result<RuleSet, ConfigError> {
    check_disjoint(sources)?;

    let mut rules = Vec::new();
    for from in sources {
        for to in sources {
            let region = if from.space.name == to.space.name {
                restrict(from.rules, &from.space.addrs, &to.space.addrs)
            } else {
                cross(*from, *to)
            };
            debug!(
                "combine {} -> {}: {} rules",
                from.space.name,
                to.space.name,
                region.len()
            );
            rules.extend(region);
        }
    }

    let rules = simplify_rules(rules);
    info!(
        "combined {} sources into {} rules",
        sources.len(),
        rules.len()
    );
    Ok(RuleSet::new(rules))
}
