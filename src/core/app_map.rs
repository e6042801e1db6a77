//! Device application identifiers to common names
//!
//! Devices name applications differently (`junos-http`, `tcp/80`, ...). An
//! [`ApplicationMap`] renames them to the names tests are written against.
//! Several identifiers may map to one name, but only while their rules never
//! cover the same traffic; otherwise the merged rule set would contain two
//! rules matching one `(src, dst, app)`.

use crate::core::error::ConfigError;
use crate::core::pairs::IpPairs;
use crate::core::rule::{App, Rule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct ApplicationMap {
    map: BTreeMap<String, String>,
}

impl ApplicationMap {
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyAppName` if any identifier maps to an empty
    /// name.
    pub fn new(map: BTreeMap<String, String>) -> Result<Self, ConfigError> {
        if let Some((id, _)) = map.iter().find(|(_, name)| name.trim().is_empty()) {
            return Err(ConfigError::EmptyAppName(id.clone()));
        }
        Ok(Self { map })
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Common name for a device identifier; unmapped identifiers keep their name.
    pub fn lookup<'a>(&'a self, id: &'a str) -> &'a str {
        self.map.get(id).map_or(id, String::as_str)
    }

    /// Renames the applications of `rules`, including the exclusion lists of
    /// excepting rules.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::AppMapCollision` when two different identifiers
    /// end up with the same name and overlapping coverage.
    pub fn apply(&self, rules: Vec<Rule>) -> Result<Vec<Rule>, ConfigError> {
        // common name -> (device identifier -> coverage)
        let mut seen: BTreeMap<String, BTreeMap<String, IpPairs>> = BTreeMap::new();
        let mut out = Vec::with_capacity(rules.len());

        for mut rule in rules {
            if let App::AllExcept(ids) = &rule.app {
                let names = ids.iter().map(|id| self.lookup(id).to_string()).collect();
                rule.app = App::AllExcept(names);
            }
            let Some(id) = rule.app.name().map(str::to_string) else {
                out.push(rule);
                continue;
            };
            let name = self.lookup(&id).to_string();
            let pairs = rule.pairs();
            let by_id = seen.entry(name.clone()).or_default();
            if let Some((other, _)) = by_id
                .iter()
                .find(|(other, cover)| **other != id && cover.overlaps(&pairs))
            {
                return Err(ConfigError::AppMapCollision {
                    app: name,
                    first: other.clone(),
                    second: id,
                });
            }
            let cover = by_id.entry(id).or_default();
            *cover = cover.union(&pairs);
            rule.app = App::Named(name);
            out.push(rule);
        }
        Ok(out)
    }
}

impl TryFrom<BTreeMap<String, String>> for ApplicationMap {
    type Error = ConfigError;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        Self::new(map)
    }
}

impl From<ApplicationMap> for BTreeMap<String, String> {
    fn from(map: ApplicationMap) -> Self {
        map.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> ApplicationMap {
        ApplicationMap::new(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
        .unwrap()
    }

    fn rule(src: &str, dst: &str, app: &str) -> Rule {
        Rule::new(src.parse().unwrap(), dst.parse().unwrap(), App::named(app), app)
    }

    #[test]
    fn test_renames_and_keeps_unmapped() {
        let m = map(&[("junos-http", "http")]);
        let out = m
            .apply(vec![rule("10.0.0.0/8", "20.0.0.1", "junos-http"), rule("10.0.0.0/8", "20.0.0.1", "ssh")])
            .unwrap();
        assert_eq!(out[0].app, App::named("http"));
        assert_eq!(out[1].app, App::named("ssh"));
    }

    #[test]
    fn test_renames_exclusion_lists() {
        let m = map(&[("junos-ssh", "ssh")]);
        let open = Rule::new(
            "10.0.0.0/8".parse().unwrap(),
            "20.0.0.1".parse().unwrap(),
            App::all_except(["junos-ssh", "junos-dns"]),
            "open",
        );
        let out = m.apply(vec![open, rule("10.0.0.0/8", "20.0.0.1", "junos-ssh")]).unwrap();
        assert_eq!(out[0].app, App::all_except(["junos-dns", "ssh"]));
        assert_eq!(out[1].app, App::named("ssh"));
    }

    #[test]
    fn test_disjoint_collapse_is_allowed() {
        let m = map(&[("junos-http", "http"), ("web", "http")]);
        let out = m
            .apply(vec![rule("10.0.0.0/8", "20.0.0.1", "junos-http"), rule("10.0.0.0/8", "20.0.0.2", "web")])
            .unwrap();
        assert!(out.iter().all(|r| r.app == App::named("http")));
    }

    #[test]
    fn test_overlapping_collapse_is_rejected() {
        let m = map(&[("junos-http", "http"), ("web", "http")]);
        let err = m
            .apply(vec![rule("10.0.0.0/8", "20.0.0.0/24", "junos-http"), rule("10.1.0.0/16", "20.0.0.2", "web")])
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::AppMapCollision {
                app: "http".into(),
                first: "junos-http".into(),
                second: "web".into()
            }
        );
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let err = ApplicationMap::new(BTreeMap::from([("x".to_string(), " ".to_string())])).unwrap_err();
        assert_eq!(err, ConfigError::EmptyAppName("x".into()));
    }

    #[test]
    fn test_deserialize_validates() {
        assert!(serde_yaml::from_str::<ApplicationMap>("junos-http: ''").is_err());
        let m: ApplicationMap = serde_yaml::from_str("junos-http: http").unwrap();
        assert_eq!(m.lookup("junos-http"), "http");
    }
}
