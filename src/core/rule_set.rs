//! Flat, order-independent rule sets
//!
//! A [`RuleSet`] is persisted as its list of [`Rule`]s. Whenever it is built
//! or deserialized it rebuilds an index: one [`IpPairs`] per named
//! application, one per [`App::AllExcept`] exclusion list, plus one for
//! [`App::Any`]. Queries only read the index.

use crate::core::pairs::IpPairs;
use crate::core::rule::{App, Rule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Rule>", into = "Vec<Rule>")]
pub struct RuleSet {
    rules: Vec<Rule>,
    by_app: BTreeMap<String, IpPairs>,
    excepting: BTreeMap<BTreeSet<String>, IpPairs>,
    any: IpPairs,
}

impl RuleSet {
    /// Builds a rule set and its per-application index. Empty rules are dropped.
    pub fn new(rules: Vec<Rule>) -> Self {
        let rules: Vec<Rule> = rules.into_iter().filter(|r| !r.is_empty()).collect();
        let mut by_app: BTreeMap<String, IpPairs> = BTreeMap::new();
        let mut excepting: BTreeMap<BTreeSet<String>, IpPairs> = BTreeMap::new();
        let mut any = IpPairs::new();
        for rule in &rules {
            let entry = match &rule.app {
                App::Any => &mut any,
                App::Named(name) => by_app.entry(name.clone()).or_default(),
                App::AllExcept(except) => excepting.entry(except.clone()).or_default(),
            };
            *entry = entry.union(&rule.pairs());
        }
        Self {
            rules,
            by_app,
            excepting,
            any,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn into_rules(self) -> Vec<Rule> {
        self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Named applications with at least one rule
    pub fn apps(&self) -> impl Iterator<Item = &str> {
        self.by_app.keys().map(String::as_str)
    }

    /// Pairs permitted for every application
    pub fn any_pairs(&self) -> &IpPairs {
        &self.any
    }

    /// Pairs permitted by rules naming `app` (not including any-app rules)
    pub fn app_pairs(&self, app: &str) -> Option<&IpPairs> {
        self.by_app.get(app)
    }

    /// Pairs permitted for every application outside each exclusion list
    pub fn excepting_pairs(&self) -> impl Iterator<Item = (&BTreeSet<String>, &IpPairs)> {
        self.excepting.iter()
    }

    /// Everything permitted for `app`: the pairs of every rule whose
    /// application includes it.
    ///
    /// For [`App::Any`] this is the any-app set alone.
    pub fn permitted(&self, app: &App) -> IpPairs {
        let mut pairs = match app.name().and_then(|name| self.by_app.get(name)) {
            Some(own) => own.union(&self.any),
            None => self.any.clone(),
        };
        for (except, extra) in &self.excepting {
            if app.avoids(except) {
                pairs = pairs.union(extra);
            }
        }
        pairs
    }

    /// Rules that can match traffic for `app`
    pub fn rules_for<'a>(&'a self, app: &'a App) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |r| r.app.includes(app))
    }

    /// Index pairs of rules that could both match one `(src, dst, app)`.
    ///
    /// A well-formed rule set returns nothing here.
    pub fn overlapping_rules(&self) -> Vec<(usize, usize)> {
        let mut overlaps = Vec::new();
        for (i, a) in self.rules.iter().enumerate() {
            for (j, b) in self.rules.iter().enumerate().skip(i + 1) {
                if a.app.overlaps(&b.app) && a.src.overlaps(&b.src) && a.dst.overlaps(&b.dst) {
                    overlaps.push((i, j));
                }
            }
        }
        overlaps
    }
}

impl From<Vec<Rule>> for RuleSet {
    fn from(rules: Vec<Rule>) -> Self {
        Self::new(rules)
    }
}

impl From<RuleSet> for Vec<Rule> {
    fn from(set: RuleSet) -> Self {
        set.rules
    }
}
