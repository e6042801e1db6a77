//! Shared test utilities for core module tests
//!
//! Property tests work over a tiny universe of sixteen IPv4 addresses
//! (`10.0.0.0` to `10.0.0.15`) so that every `(src, dst)` point can be
//! checked exhaustively. This module is only compiled in test mode.

use crate::core::normalize::{Action, Policy, ZoneMap};
use crate::core::range_set::{to_address, Address, IpRange, IpSet};
use crate::core::rule::{App, Rule};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

/// Number of addresses in the test universe
pub const UNIVERSE: u8 = 16;

/// Zone covering the whole test universe
pub const INSIDE: &str = "inside";

/// The `i`th address of the test universe
pub fn addr(i: u8) -> Address {
    to_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, i)))
}

/// Addresses `lo..=hi` of the test universe, in either order
pub fn span(lo: u8, hi: u8) -> IpSet {
    IpSet::from_range(IpRange::new(addr(lo.min(hi)), addr(lo.max(hi))).unwrap())
}

/// Every address of the test universe
pub fn universe() -> IpSet {
    span(0, UNIVERSE - 1)
}

pub fn set(s: &str) -> IpSet {
    s.parse().unwrap()
}

pub fn rule(src: &str, dst: &str, app: App, name: &str) -> Rule {
    Rule::new(set(src), set(dst), app, name)
}

/// A policy between two addresses sets of the `inside` zone
pub fn policy(name: &str, src: IpSet, dst: IpSet, app: App, action: Action) -> Policy {
    Policy {
        name: name.to_string(),
        from_zone: INSIDE.to_string(),
        to_zone: INSIDE.to_string(),
        src,
        dst,
        app,
        action,
    }
}

/// A zone map with one zone holding the whole test universe
pub fn inside_zone() -> ZoneMap {
    ZoneMap::new(BTreeMap::from([(INSIDE.to_string(), universe())]))
}

/// Reference first-match evaluation of an ordered policy list
pub fn first_match(policies: &[Policy], s: Address, d: Address, app: &App) -> bool {
    policies
        .iter()
        .find(|p| p.src.contains(s) && p.dst.contains(d) && p.app.includes(app))
        .is_some_and(|p| p.action == Action::Permit)
}
