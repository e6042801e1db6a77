//! First-match policy normalization
//!
//! Device policies are ordered: the first policy whose match covers a packet
//! decides it. [`normalize`] folds such a list into a [`RuleSet`] where order
//! no longer matters and at most one rule matches any `(src, dst, app)`.
//!
//! For each application the fold keeps a "claimed" [`IpPairs`], the union of
//! every earlier policy that could have matched. A permit contributes only
//! its rectangle minus what is already claimed. Deny policies contribute
//! nothing but still claim.
//!
//! Before matching, each policy's source is narrowed to the addresses its
//! `from_zone` routes to, and its destination to its `to_zone`. Directly
//! connected subnets get an implicit any-app permit for traffic inside the
//! subnet, evaluated ahead of every policy.

use crate::core::error::ConfigError;
use crate::core::pairs::IpPairs;
use crate::core::range_set::{IpRange, IpSet};
use crate::core::rule::{simplify_rules, App, Rule};
use crate::core::rule_set::RuleSet;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// What a matching policy does with the traffic
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[strum(serialize = "permit")]
    Permit,
    #[strum(serialize = "deny")]
    Deny,
}

/// One entry of an ordered, first-match policy list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub from_zone: String,
    pub to_zone: String,
    pub src: IpSet,
    pub dst: IpSet,
    pub app: App,
    pub action: Action,
}

/// A route: traffic for `destination` leaves through `zone`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub destination: IpNetwork,
    pub zone: String,
}

/// Addresses reachable through each zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneMap {
    zones: BTreeMap<String, IpSet>,
}

impl ZoneMap {
    pub fn new(zones: BTreeMap<String, IpSet>) -> Self {
        Self { zones }
    }

    /// Attributes every routed address to the zone of its most specific
    /// route. For equally specific routes the later one wins.
    pub fn from_routes(routes: &[Route]) -> Self {
        let mut sorted: Vec<&Route> = routes.iter().collect();
        sorted.sort_by_key(|r| axis_prefix(r.destination));

        let mut zones: BTreeMap<String, IpSet> = BTreeMap::new();
        for route in sorted {
            let range = IpSet::from_range(IpRange::from_network(route.destination));
            for addrs in zones.values_mut() {
                *addrs = addrs.difference(&range);
            }
            let entry = zones.entry(route.zone.clone()).or_default();
            *entry = entry.union(&range);
        }
        Self { zones }
    }

    pub fn get(&self, zone: &str) -> Option<&IpSet> {
        self.zones.get(zone)
    }

    pub fn zones(&self) -> impl Iterator<Item = (&str, &IpSet)> {
        self.zones.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn axis_prefix(net: IpNetwork) -> u8 {
    match net {
        IpNetwork::V4(v4) => v4.prefix() + 96,
        IpNetwork::V6(v6) => v6.prefix(),
    }
}

/// A policy resolved against the zone map
struct Entry {
    name: String,
    pairs: IpPairs,
    app: App,
    action: Action,
}

/// Everything a normalizer needs about one device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Routes used to build the zone map
    #[serde(default)]
    pub routes: Vec<Route>,
    /// Explicit zone addresses, merged over the routed ones
    #[serde(default)]
    pub zones: BTreeMap<String, IpSet>,
    /// Directly connected subnets
    #[serde(default)]
    pub connected: Vec<IpSet>,
    pub policies: Vec<Policy>,
}

impl PolicyDocument {
    pub fn zone_map(&self) -> ZoneMap {
        let mut map = ZoneMap::from_routes(&self.routes);
        for (zone, addrs) in &self.zones {
            let entry = map.zones.entry(zone.clone()).or_default();
            *entry = entry.union(addrs);
        }
        map
    }

    /// # Errors
    ///
    /// See [`normalize`].
    pub fn normalize(&self) -> Result<RuleSet, ConfigError> {
        normalize(&self.policies, &self.zone_map(), &self.connected)
    }
}

fn zone_addrs<'a>(zones: &'a ZoneMap, policy: &Policy, zone: &str) -> Result<&'a IpSet, ConfigError> {
    let addrs = zones.get(zone).ok_or_else(|| ConfigError::UnknownZone {
        policy: policy.name.clone(),
        zone: zone.to_string(),
    })?;
    if addrs.is_empty() {
        return Err(ConfigError::ZoneWithoutRoute(zone.to_string()));
    }
    Ok(addrs)
}

fn resolve(
    policies: &[Policy],
    zones: &ZoneMap,
    connected: &[IpSet],
) -> Result<Vec<Entry>, ConfigError> {
    let mut entries: Vec<Entry> = connected
        .iter()
        .filter(|subnet| !subnet.is_empty())
        .map(|subnet| Entry {
            name: format!("local {subnet}"),
            pairs: IpPairs::from_pair(subnet.clone(), subnet.clone()),
            app: App::Any,
            action: Action::Permit,
        })
        .collect();

    for policy in policies {
        let src_space = zone_addrs(zones, policy, &policy.from_zone)?;
        let dst_space = zone_addrs(zones, policy, &policy.to_zone)?;
        let src = policy.src.intersection(src_space);
        let dst = policy.dst.intersection(dst_space);
        debug!(
            "policy {} ({} -> {}): {} -> {} {} {}",
            policy.name, policy.from_zone, policy.to_zone, src, dst, policy.app, policy.action
        );
        entries.push(Entry {
            name: policy.name.clone(),
            pairs: IpPairs::from_pair(src, dst),
            app: policy.app.clone(),
            action: policy.action,
        });
    }
    Ok(entries)
}

/// First-match fold over the entries that `matches` selects.
///
/// Returns each permit's contribution; contributions are pairwise disjoint.
fn fold(entries: &[Entry], matches: impl Fn(&App) -> bool) -> Vec<(&str, IpPairs)> {
    let mut claimed = IpPairs::new();
    let mut contributions = Vec::new();
    for entry in entries.iter().filter(|e| matches(&e.app)) {
        if entry.action == Action::Permit {
            let fresh = entry.pairs.difference(&claimed);
            if !fresh.is_empty() {
                contributions.push((entry.name.as_str(), fresh));
            }
        }
        claimed = claimed.union(&entry.pairs);
    }
    contributions
}

fn union_of(contributions: &[(&str, IpPairs)]) -> IpPairs {
    contributions
        .iter()
        .fold(IpPairs::new(), |acc, (_, pairs)| acc.union(pairs))
}

/// Normalizes an ordered first-match policy list into a flat rule set.
///
/// Every application is resolved exactly. Where all of them are permitted
/// the rules use [`App::Any`]. Where only applications that no policy names
/// are permitted (an app-specific policy shadowing a later any-app permit),
/// the rules use [`App::AllExcept`] listing every named application, and the
/// named ones get rules of their own.
///
/// # Errors
///
/// - `ConfigError::UnknownZone` if a policy references a zone not in `zones`
/// - `ConfigError::ZoneWithoutRoute` if a referenced zone has no addresses
pub fn normalize(
    policies: &[Policy],
    zones: &ZoneMap,
    connected: &[IpSet],
) -> Result<RuleSet, ConfigError> {
    let entries = resolve(policies, zones, connected)?;

    let mut apps: BTreeSet<&str> = BTreeSet::new();
    for entry in &entries {
        match &entry.app {
            App::Any => {}
            App::Named(name) => {
                apps.insert(name);
            }
            App::AllExcept(except) => apps.extend(except.iter().map(String::as_str)),
        }
    }

    // Entries matching an application no policy names
    let other = fold(&entries, |a| a.name().is_none());
    let mut any = union_of(&other);

    let mut per_app: Vec<(App, Vec<(&str, IpPairs)>)> = Vec::with_capacity(apps.len());
    for name in &apps {
        let app = App::named(*name);
        let contributions = fold(&entries, |a| a.includes(&app));
        any = any.intersection(&union_of(&contributions));
        per_app.push((app, contributions));
    }

    let unnamed = App::all_except(apps.iter().copied());
    let mut rules = Vec::new();
    for (name, pairs) in &other {
        rules.extend(Rule::from_pairs(&pairs.intersection(&any), &App::Any, name));
        rules.extend(Rule::from_pairs(&pairs.difference(&any), &unnamed, name));
    }
    for (app, contributions) in &per_app {
        for (name, pairs) in contributions {
            rules.extend(Rule::from_pairs(&pairs.difference(&any), app, name));
        }
    }

    let rules = simplify_rules(rules);
    info!(
        "normalized {} policies ({} apps) into {} rules",
        policies.len(),
        apps.len(),
        rules.len()
    );
    Ok(RuleSet::new(rules))
}
