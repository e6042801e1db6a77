//! Read-only questions asked of a [`RuleSet`]
//!
//! Permit and deny are not complements. A query region `src × dst` can be
//! fully permitted, fully denied, or neither; the last case is reported as
//! [`Coverage::Partial`] with both halves so callers never have to round it to
//! a boolean.

use crate::core::pairs::IpPairs;
use crate::core::range_set::IpSet;
use crate::core::rule::{App, Rule};
use crate::core::rule_set::RuleSet;
use std::collections::BTreeSet;
use std::fmt;

/// How much of a query region is permitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    Permitted,
    Denied,
    /// Some pairs are permitted and some are not
    Partial {
        permitted: IpPairs,
        denied: IpPairs,
    },
}

impl Coverage {
    pub const fn outcome(&self) -> Outcome {
        match self {
            Coverage::Permitted => Outcome::Permitted,
            Coverage::Denied => Outcome::Denied,
            Coverage::Partial { .. } => Outcome::Partial,
        }
    }
}

/// Coverage without the subsets, for display and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
pub enum Outcome {
    #[strum(serialize = "Flow permitted")]
    Permitted,
    #[strum(serialize = "Flow denied")]
    Denied,
    #[strum(serialize = "Flow partially permitted")]
    Partial,
}

impl Outcome {
    /// Process exit status for this answer: 0 when decisive, 2 when partial
    pub const fn exit_code(self) -> u8 {
        match self {
            Outcome::Permitted | Outcome::Denied => 0,
            Outcome::Partial => 2,
        }
    }
}

/// Applications permitted between two address sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppSet {
    /// Any-app rules overlap the region, so the set is unbounded
    Any,
    Apps(BTreeSet<String>),
    /// Every application except the listed ones
    AllExcept(BTreeSet<String>),
}

impl AppSet {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AppSet::Apps(names.into_iter().map(Into::into).collect())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, AppSet::Any)
    }
}

impl fmt::Display for AppSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppSet::Any => write!(f, "<any>"),
            AppSet::Apps(apps) if apps.is_empty() => write!(f, "<none>"),
            AppSet::Apps(apps) => {
                let names: Vec<&str> = apps.iter().map(String::as_str).collect();
                write!(f, "{}", names.join(", "))
            }
            AppSet::AllExcept(except) => {
                let names: Vec<&str> = except.iter().map(String::as_str).collect();
                write!(f, "<any> except {}", names.join(", "))
            }
        }
    }
}

impl RuleSet {
    /// Classifies `src × dst` for `app` as permitted, denied or partial.
    ///
    /// An empty region is vacuously permitted.
    pub fn coverage(&self, src: &IpSet, dst: &IpSet, app: &App) -> Coverage {
        let region = IpPairs::from_pair(src.clone(), dst.clone());
        let permitted = self.permitted(app).intersection(&region);
        if permitted == region {
            Coverage::Permitted
        } else if permitted.is_empty() {
            Coverage::Denied
        } else {
            Coverage::Partial {
                denied: region.difference(&permitted),
                permitted,
            }
        }
    }

    /// `true` iff every pair in `src × dst` is permitted for `app`.
    pub fn app_is_permitted(&self, src: &IpSet, dst: &IpSet, app: &App) -> bool {
        IpPairs::from_pair(src.clone(), dst.clone()).is_subset(&self.permitted(app))
    }

    /// `true` iff no pair in `src × dst` is permitted for `app`.
    pub fn app_is_denied(&self, src: &IpSet, dst: &IpSet, app: &App) -> bool {
        !IpPairs::from_pair(src.clone(), dst.clone()).overlaps(&self.permitted(app))
    }

    /// Sources with at least one permitted pair into `dst` for `app`,
    /// excluding `ignore`.
    pub fn sources_for(&self, dst: &IpSet, app: &App, ignore: &IpSet) -> IpSet {
        self.permitted(app)
            .restrict(&IpSet::all(), dst)
            .project_src()
            .difference(ignore)
    }

    /// Applications with at least one permitted pair in `src × dst`.
    ///
    /// Any overlap with the any-app rules, even a single pair, yields
    /// [`AppSet::Any`]. Overlap with excepting rules yields
    /// [`AppSet::AllExcept`] listing the applications that still have no
    /// permitted pair, or [`AppSet::Any`] when none are left.
    pub fn all_apps(&self, src: &IpSet, dst: &IpSet) -> AppSet {
        let region = IpPairs::from_pair(src.clone(), dst.clone());
        if self.any_pairs().overlaps(&region) {
            return AppSet::Any;
        }
        let named: BTreeSet<String> = self
            .apps()
            .filter(|app| {
                self.app_pairs(app)
                    .is_some_and(|pairs| pairs.overlaps(&region))
            })
            .map(String::from)
            .collect();

        let mut excluded: Option<BTreeSet<String>> = None;
        for (except, pairs) in self.excepting_pairs() {
            if pairs.overlaps(&region) {
                excluded = Some(match excluded {
                    Some(prev) => prev.intersection(except).cloned().collect(),
                    None => except.clone(),
                });
            }
        }

        match excluded {
            None => AppSet::Apps(named),
            Some(excluded) => {
                let excluded: BTreeSet<String> = excluded.difference(&named).cloned().collect();
                if excluded.is_empty() {
                    AppSet::Any
                } else {
                    AppSet::AllExcept(excluded)
                }
            }
        }
    }

    /// Rules for `app` that touch `src × dst`
    pub fn matching_rules<'a>(&'a self, src: &IpSet, dst: &IpSet, app: &'a App) -> Vec<&'a Rule> {
        self.rules_for(app)
            .filter(|r| r.src.overlaps(src) && r.dst.overlaps(dst))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(s: &str) -> IpSet {
        s.parse().unwrap()
    }

    fn rule(src: &str, dst: &str, app: App, name: &str) -> Rule {
        Rule::new(set(src), set(dst), app, name)
    }

    #[test]
    fn test_partial_coverage_carries_both_halves() {
        let rules = RuleSet::new(vec![rule(
            "10.0.0.0/24",
            "20.0.0.1",
            App::named("ssh"),
            "ssh",
        )]);
        let cov = rules.coverage(&set("10.0.0.0/23"), &set("20.0.0.1"), &App::named("ssh"));
        let Coverage::Partial { permitted, denied } = cov else {
            panic!("expected partial coverage, got {cov:?}");
        };
        assert_eq!(permitted.project_src(), set("10.0.0.0/24"));
        assert_eq!(denied.project_src(), set("10.0.1.0/24"));
    }

    #[test]
    fn test_any_rules_apply_to_every_app() {
        let rules = RuleSet::new(vec![rule("0.0.0.0/0", "20.0.0.1", App::Any, "open")]);
        assert!(rules.app_is_permitted(&set("10.0.0.1"), &set("20.0.0.1"), &App::named("x")));
        assert!(rules.app_is_denied(&set("10.0.0.1"), &set("20.0.0.2"), &App::named("x")));
    }

    #[test]
    fn test_sources_for_honours_ignore() {
        let rules = RuleSet::new(vec![
            rule("10.0.0.0/24", "20.0.0.1", App::named("ssh"), "a"),
            rule("10.0.5.0/24", "20.0.0.0/24", App::named("ssh"), "b"),
            rule("10.9.0.0/16", "20.0.0.1", App::named("http"), "c"),
        ]);
        let srcs = rules.sources_for(&set("20.0.0.1"), &App::named("ssh"), &set("10.0.5.0/25"));
        assert_eq!(srcs, set("10.0.0.0/24, 10.0.5.128/25"));
    }

    #[test]
    fn test_all_apps_lists_named_apps() {
        let rules = RuleSet::new(vec![
            rule("10.0.0.0/24", "20.0.0.1", App::named("ssh"), "a"),
            rule("10.0.0.0/24", "20.0.0.2", App::named("http"), "b"),
        ]);
        assert_eq!(
            rules.all_apps(&set("10.0.0.5"), &set("20.0.0.0/24")),
            AppSet::from_names(["http", "ssh"])
        );
        assert_eq!(
            rules.all_apps(&set("10.0.1.5"), &set("20.0.0.0/24")).to_string(),
            "<none>"
        );
    }

    #[test]
    fn test_matching_rules_include_any_rules() {
        let rules = RuleSet::new(vec![
            rule("10.0.0.0/24", "20.0.0.1", App::named("ssh"), "a"),
            rule("10.0.0.0/24", "20.0.0.2", App::Any, "b"),
            rule("10.0.0.0/24", "20.0.0.2", App::named("http"), "c"),
        ]);
        let app = App::named("ssh");
        let names: Vec<&str> = rules
            .matching_rules(&set("10.0.0.1"), &set("20.0.0.0/24"), &app)
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_all_apps_with_excepting_rules() {
        let rules = RuleSet::new(vec![
            rule("10.0.0.0/24", "20.0.0.1", App::all_except(["ssh", "http"]), "open"),
            rule("10.0.0.0/24", "20.0.0.1", App::named("http"), "web"),
        ]);
        let all = rules.all_apps(&set("10.0.0.5"), &set("20.0.0.1"));
        assert_eq!(all, AppSet::AllExcept(BTreeSet::from(["ssh".to_string()])));
        assert_eq!(all.to_string(), "<any> except ssh");
        assert_eq!(
            rules.all_apps(&set("10.0.0.5"), &set("20.0.0.2")),
            AppSet::from_names(Vec::<String>::new())
        );
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::Permitted.to_string(), "Flow permitted");
        assert_eq!(Coverage::Denied.outcome().to_string(), "Flow denied");
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(Outcome::Permitted.exit_code(), 0);
        assert_eq!(Outcome::Denied.exit_code(), 0);
        assert_eq!(Outcome::Partial.exit_code(), 2);
    }
}
