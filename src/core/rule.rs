//! Flat permit rules
//!
//! A [`Rule`] permits traffic from any address in `src` to any address in
//! `dst` for one application. Rules carry a `name` for provenance: the policy
//! (or policies, joined with `+`) the permission came from.
//!
//! # Example
//!
//! ```
//! use fwunit::core::rule::{App, Rule};
//!
//! let rule = Rule::new(
//!     "192.168.13.0/24".parse().unwrap(),
//!     "192.168.13.45".parse().unwrap(),
//!     App::named("puppet"),
//!     "puppet-clients",
//! );
//! assert_eq!(rule.to_string(), "puppet-clients: 192.168.13.0/24 -> 192.168.13.45 (puppet)");
//! ```

use crate::core::pairs::IpPairs;
use crate::core::range_set::IpSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Application matched by a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum App {
    /// Every application, tracked separately from named applications
    Any,
    Named(String),
    /// Every application except the listed ones
    AllExcept(BTreeSet<String>),
}

impl App {
    pub fn named(name: impl Into<String>) -> Self {
        App::Named(name.into())
    }

    pub fn all_except<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        App::AllExcept(names.into_iter().map(Into::into).collect())
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            App::Named(name) => Some(name),
            App::Any | App::AllExcept(_) => None,
        }
    }

    pub const fn is_any(&self) -> bool {
        matches!(self, App::Any)
    }

    /// `true` if none of the applications `self` matches is in `except`
    pub fn avoids(&self, except: &BTreeSet<String>) -> bool {
        match self {
            App::Any => except.is_empty(),
            App::Named(name) => !except.contains(name),
            App::AllExcept(names) => except.is_subset(names),
        }
    }

    /// `true` if every application `other` matches is also matched by `self`
    pub fn includes(&self, other: &App) -> bool {
        match self {
            App::Any => true,
            App::Named(name) => other.name() == Some(name.as_str()),
            App::AllExcept(except) => other.avoids(except),
        }
    }

    /// `true` if some application is matched by both
    pub fn overlaps(&self, other: &App) -> bool {
        self.intersection(other).is_some()
    }

    /// The applications matched by both, if any
    pub fn intersection(&self, other: &App) -> Option<App> {
        match (self, other) {
            (App::Any, app) | (app, App::Any) => Some(app.clone()),
            (App::Named(a), App::Named(b)) => (a == b).then(|| self.clone()),
            (App::Named(name), App::AllExcept(except)) | (App::AllExcept(except), App::Named(name)) => {
                (!except.contains(name)).then(|| App::Named(name.clone()))
            }
            (App::AllExcept(a), App::AllExcept(b)) => Some(App::AllExcept(a.union(b).cloned().collect())),
        }
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            App::Any => write!(f, "any"),
            App::Named(name) => write!(f, "{name}"),
            App::AllExcept(except) => {
                let names: Vec<&str> = except.iter().map(String::as_str).collect();
                write!(f, "any except {}", names.join(", "))
            }
        }
    }
}

impl From<&str> for App {
    fn from(name: &str) -> Self {
        App::named(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rule {
    pub src: IpSet,
    pub dst: IpSet,
    pub app: App,
    pub name: String,
}

impl Rule {
    pub fn new(src: IpSet, dst: IpSet, app: App, name: impl Into<String>) -> Self {
        Self {
            src,
            dst,
            app,
            name: name.into(),
        }
    }

    /// The rectangle covered by this rule
    pub fn pairs(&self) -> IpPairs {
        IpPairs::from_pair(self.src.clone(), self.dst.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty() || self.dst.is_empty()
    }

    /// Rules for every rectangle of `pairs`, all sharing one app and name.
    pub fn from_pairs(pairs: &IpPairs, app: &App, name: &str) -> Vec<Rule> {
        pairs
            .iter()
            .map(|p| Rule::new(p.src.clone(), p.dst.clone(), app.clone(), name))
            .collect()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {} ({})", self.name, self.src, self.dst, self.app)
    }
}

/// Joins provenance names with `+`, dropping duplicates but keeping order.
pub fn combine_names(a: &str, b: &str) -> String {
    let mut parts: Vec<&str> = a.split('+').collect();
    for part in b.split('+') {
        if !parts.contains(&part) {
            parts.push(part);
        }
    }
    parts.join("+")
}

/// Merges same-app rules that share a source set or a destination set.
///
/// Rectangles are only ever joined along one axis, so rules that were
/// disjoint stay disjoint. Empty rules are dropped and the output is sorted.
pub fn simplify_rules(rules: Vec<Rule>) -> Vec<Rule> {
    let mut by_app: BTreeMap<App, Vec<Rule>> = BTreeMap::new();
    for rule in rules.into_iter().filter(|r| !r.is_empty()) {
        by_app.entry(rule.app.clone()).or_default().push(rule);
    }

    let mut out = Vec::new();
    for (_, mut group) in by_app {
        loop {
            let before = group.len();
            group = merge_on(group, |r| &r.dst, |a, b| a.src = a.src.union(&b.src));
            group = merge_on(group, |r| &r.src, |a, b| a.dst = a.dst.union(&b.dst));
            if group.len() == before {
                break;
            }
        }
        out.extend(group);
    }
    out.sort();
    out
}

fn merge_on(
    rules: Vec<Rule>,
    key: impl Fn(&Rule) -> &IpSet,
    join: impl Fn(&mut Rule, &Rule),
) -> Vec<Rule> {
    let mut merged: Vec<Rule> = Vec::with_capacity(rules.len());
    for rule in rules {
        if let Some(existing) = merged.iter_mut().find(|m| key(&**m) == key(&rule)) {
            join(existing, &rule);
            existing.name = combine_names(&existing.name, &rule.name);
        } else {
            merged.push(rule);
        }
    }
    merged
}
