//! Assertions for firewall unit tests
//!
//! A [`TestContext`] wraps one loaded rule set. Its `assert_*` methods return
//! `Err(AssertionFailure)` on violation, carrying the subsets that make the
//! failure easy to debug: which pairs were and were not permitted, which
//! rules matched, or which applications were found.
//!
//! # Example
//!
//! ```
//! use fwunit::core::assertions::TestContext;
//! use fwunit::core::range_set::IpSet;
//! use fwunit::core::rule::{App, Rule};
//! use fwunit::core::rule_set::RuleSet;
//! use std::sync::Arc;
//!
//! let internal: IpSet = "192.168.1.0/24, 192.168.13.0/24".parse().unwrap();
//! let masters: IpSet = "192.168.13.45, 192.168.13.50".parse().unwrap();
//! let rules = RuleSet::new(vec![Rule::new(
//!     internal.clone(),
//!     masters.clone(),
//!     App::named("puppet"),
//!     "puppet",
//! )]);
//!
//! let ctx = TestContext::new("releng", Arc::new(rules));
//! ctx.assert_permits(&internal, &masters, ["puppet"]).unwrap();
//! assert!(ctx.assert_denies(&internal, &masters, ["puppet"]).is_err());
//! ```

use crate::config::Config;
use crate::core::cache::RuleCache;
use crate::core::error::Result;
use crate::core::pairs::IpPairs;
use crate::core::query::{AppSet, Coverage};
use crate::core::range_set::IpSet;
use crate::core::rule::App;
use crate::core::rule_set::RuleSet;
use std::sync::Arc;
use thiserror::Error;

/// A violated expectation about a rule set
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssertionFailure {
    #[error(
        "{source_name}: {app} from {src} to {dst} is not fully permitted\n  permitted: {permitted}\n  not permitted: {denied}\n  matching rules: {rules}"
    )]
    NotPermitted {
        source_name: String,
        app: App,
        src: IpSet,
        dst: IpSet,
        permitted: IpPairs,
        denied: IpPairs,
        rules: String,
    },

    #[error(
        "{source_name}: {app} from {src} to {dst} is not fully denied\n  permitted: {permitted}\n  matching rules: {rules}"
    )]
    NotDenied {
        source_name: String,
        app: App,
        src: IpSet,
        dst: IpSet,
        permitted: IpPairs,
        rules: String,
    },

    #[error("{source_name}: apps from {src} to {dst}: expected {expected}, got {actual}")]
    AppsMismatch {
        source_name: String,
        src: IpSet,
        dst: IpSet,
        expected: AppSet,
        actual: AppSet,
    },
}

/// Assertions over one source's rule set
#[derive(Debug, Clone)]
pub struct TestContext {
    name: String,
    rules: Arc<RuleSet>,
}

impl TestContext {
    pub fn new(name: impl Into<String>, rules: Arc<RuleSet>) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }

    /// Builds a context for `source`, loading its output through `cache`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownSource` for an undefined source, or the
    /// load error for a missing or corrupt rule file.
    pub async fn load(cache: &RuleCache, config: &Config, source: &str) -> Result<Self> {
        let path = config.output_path(source)?;
        let rules = cache.load_file(source, &path).await?;
        Ok(Self::new(source, rules))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn describe_rules(&self, src: &IpSet, dst: &IpSet, app: &App) -> String {
        let rules = self.rules.matching_rules(src, dst, app);
        if rules.is_empty() {
            return "<none>".to_string();
        }
        rules
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Asserts that every pair in `src × dst` is permitted for every app.
    ///
    /// # Errors
    ///
    /// `AssertionFailure::NotPermitted` for the first app that is not, including
    /// when it is only partially permitted.
    pub fn assert_permits<I, A>(&self, src: &IpSet, dst: &IpSet, apps: I) -> std::result::Result<(), AssertionFailure>
    where
        I: IntoIterator<Item = A>,
        A: Into<App>,
    {
        for app in apps.into_iter().map(Into::into) {
            let (permitted, denied) = match self.rules.coverage(src, dst, &app) {
                Coverage::Permitted => continue,
                Coverage::Denied => (
                    IpPairs::new(),
                    IpPairs::from_pair(src.clone(), dst.clone()),
                ),
                Coverage::Partial { permitted, denied } => (permitted, denied),
            };
            return Err(AssertionFailure::NotPermitted {
                source_name: self.name.clone(),
                rules: self.describe_rules(src, dst, &app),
                app,
                src: src.clone(),
                dst: dst.clone(),
                permitted,
                denied,
            });
        }
        Ok(())
    }

    /// Asserts that no pair in `src × dst` is permitted for any of the apps.
    ///
    /// # Errors
    ///
    /// `AssertionFailure::NotDenied` for the first app with any permitted pair.
    pub fn assert_denies<I, A>(&self, src: &IpSet, dst: &IpSet, apps: I) -> std::result::Result<(), AssertionFailure>
    where
        I: IntoIterator<Item = A>,
        A: Into<App>,
    {
        for app in apps.into_iter().map(Into::into) {
            let permitted = match self.rules.coverage(src, dst, &app) {
                Coverage::Denied => continue,
                Coverage::Permitted => IpPairs::from_pair(src.clone(), dst.clone()),
                Coverage::Partial { permitted, .. } => permitted,
            };
            return Err(AssertionFailure::NotDenied {
                source_name: self.name.clone(),
                rules: self.describe_rules(src, dst, &app),
                app,
                src: src.clone(),
                dst: dst.clone(),
                permitted,
            });
        }
        Ok(())
    }

    /// Sources that can reach `dst` with `app`, excluding `ignore`.
    pub fn sources_for(&self, dst: &IpSet, app: impl Into<App>, ignore: &IpSet) -> IpSet {
        self.rules.sources_for(dst, &app.into(), ignore)
    }

    pub fn all_apps(&self, src: &IpSet, dst: &IpSet) -> AppSet {
        self.rules.all_apps(src, dst)
    }

    /// Asserts that exactly `expected` apps are permitted from `src` to `dst`.
    ///
    /// # Errors
    ///
    /// `AssertionFailure::AppsMismatch` with the actual set otherwise.
    pub fn assert_all_apps(&self, src: &IpSet, dst: &IpSet, expected: &AppSet) -> std::result::Result<(), AssertionFailure> {
        let actual = self.all_apps(src, dst);
        if actual == *expected {
            return Ok(());
        }
        Err(AssertionFailure::AppsMismatch {
            source_name: self.name.clone(),
            src: src.clone(),
            dst: dst.clone(),
            expected: expected.clone(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rule::Rule;

    fn set(s: &str) -> IpSet {
        s.parse().unwrap()
    }

    fn ctx(rules: Vec<Rule>) -> TestContext {
        TestContext::new("test", Arc::new(RuleSet::new(rules)))
    }

    #[test]
    fn test_not_permitted_failure_names_matching_rules() {
        let c = ctx(vec![Rule::new(
            set("10.0.0.0/24"),
            set("20.0.0.1"),
            App::named("ssh"),
            "ssh-from-admin",
        )]);
        let err = c
            .assert_permits(&set("10.0.0.0/23"), &set("20.0.0.1"), ["ssh"])
            .unwrap_err();
        let AssertionFailure::NotPermitted { permitted, denied, rules, .. } = &err else {
            panic!("unexpected failure {err:?}");
        };
        assert_eq!(permitted.project_src(), set("10.0.0.0/24"));
        assert_eq!(denied.project_src(), set("10.0.1.0/24"));
        assert_eq!(rules, "ssh-from-admin");
        assert!(err.to_string().contains("not fully permitted"));
    }

    #[test]
    fn test_fully_denied_reports_whole_region() {
        let c = ctx(vec![]);
        let err = c
            .assert_permits(&set("10.0.0.1"), &set("20.0.0.1"), ["ssh"])
            .unwrap_err();
        let AssertionFailure::NotPermitted { permitted, denied, rules, .. } = err else {
            panic!("expected NotPermitted");
        };
        assert!(permitted.is_empty());
        assert_eq!(denied, IpPairs::from_pair(set("10.0.0.1"), set("20.0.0.1")));
        assert_eq!(rules, "<none>");
    }

    #[test]
    fn test_assert_denies_checks_every_app() {
        let c = ctx(vec![Rule::new(
            set("10.0.0.0/24"),
            set("20.0.0.1"),
            App::named("http"),
            "web",
        )]);
        assert!(c.assert_denies(&set("10.0.0.1"), &set("20.0.0.1"), ["ssh"]).is_ok());
        let err = c
            .assert_denies(&set("10.0.0.1"), &set("20.0.0.1"), ["ssh", "http"])
            .unwrap_err();
        assert!(matches!(err, AssertionFailure::NotDenied { ref app, .. } if *app == App::named("http")));
    }

    #[test]
    fn test_assert_all_apps_mismatch_carries_actual() {
        let c = ctx(vec![Rule::new(
            set("10.0.0.0/24"),
            set("20.0.0.1"),
            App::named("http"),
            "web",
        )]);
        let expected = AppSet::from_names(["http", "https"]);
        let err = c
            .assert_all_apps(&set("10.0.0.0/24"), &set("20.0.0.1"), &expected)
            .unwrap_err();
        let AssertionFailure::AppsMismatch { actual, .. } = err else {
            panic!("expected AppsMismatch");
        };
        assert_eq!(actual, AppSet::from_names(["http"]));
    }
}
