//! Source configuration (`fwunit.yaml`)
//!
//! Top-level keys are source names. Every source has a `type`, an `output`
//! rule-set file and optionally `require` (sources to prepare first) and an
//! `application-map`. Relative paths resolve against the directory holding
//! the configuration file.
//!
//! ```yaml
//! edge:
//!   type: policy
//!   output: edge.json
//!   policy: edge-policy.json
//!   application-map: { junos-http: http }
//! global:
//!   type: combine
//!   output: global.json
//!   require: [edge]
//!   address_spaces:
//!     edge: [10.0.0.0/8]
//! ```

use crate::core::app_map::ApplicationMap;
use crate::core::combine::AddressSpace;
use crate::core::error::{ConfigError, Result};
use crate::utils::get_config_dir;
use crate::validators::{check_reserved_addresses, parse_addresses, validate_source_name};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum::{Display, EnumString};
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_FILE: &str = "fwunit.yaml";

/// Value of a source's `type` key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SourceType {
    Policy,
    Combine,
}

/// One or many address specifications
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AddressList {
    One(String),
    Many(Vec<String>),
}

impl AddressList {
    fn entries(&self) -> &[String] {
        match self {
            Self::One(entry) => std::slice::from_ref(entry),
            Self::Many(entries) => entries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// Device-neutral policy file, normalized during prep
    Policy { policy: PathBuf },
    /// Combination of other sources, each owning an address space
    Combine {
        address_spaces: BTreeMap<String, AddressList>,
    },
}

impl SourceKind {
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Policy { .. } => SourceType::Policy,
            Self::Combine { .. } => SourceType::Combine,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    pub output: PathBuf,
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default, rename = "application-map")]
    pub application_map: ApplicationMap,
    #[serde(flatten)]
    pub kind: SourceKind,
}

/// A validated `fwunit.yaml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    base_dir: PathBuf,
    sources: BTreeMap<String, SourceConfig>,
}

impl Config {
    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// - `Error::Yaml` for malformed YAML or missing fields
    /// - `ConfigError::InvalidSource` for bad names, unknown types or addresses
    /// - `ConfigError::MissingSource` for references to undefined sources
    /// - `ConfigError::DependencyCycle` if sources require each other
    pub fn from_yaml(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let raw: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(text)?;
        let mut sources = BTreeMap::new();
        for (name, value) in raw {
            validate_source_name(&name)?;
            check_type(&name, &value)?;
            let source: SourceConfig = serde_yaml::from_value(value)?;
            sources.insert(name, source);
        }

        let config = Self {
            base_dir: base_dir.into(),
            sources,
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// I/O errors, plus everything [`Config::from_yaml`] reports.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let base_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        debug!("loaded configuration from {:?}", path);
        Self::from_yaml(&text, base_dir)
    }

    /// Picks the configuration file: `explicit` if given, otherwise
    /// `fwunit.yaml` in the working directory, otherwise the one in the user
    /// config directory.
    pub fn locate(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return local;
        }
        get_config_dir()
            .map(|dir| dir.join(DEFAULT_CONFIG_FILE))
            .filter(|path| path.exists())
            .unwrap_or(local)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// # Errors
    ///
    /// `ConfigError::UnknownSource` if no source has this name.
    pub fn source(&self, name: &str) -> std::result::Result<&SourceConfig, ConfigError> {
        self.sources
            .get(name)
            .ok_or_else(|| ConfigError::UnknownSource(name.to_string()))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    /// Where the rule set of `name` is stored
    ///
    /// # Errors
    ///
    /// `ConfigError::UnknownSource` if no source has this name.
    pub fn output_path(&self, name: &str) -> std::result::Result<PathBuf, ConfigError> {
        Ok(self.resolve(&self.source(name)?.output))
    }

    /// The policy input of a `policy` source, `None` for other types
    ///
    /// # Errors
    ///
    /// `ConfigError::UnknownSource` if no source has this name.
    pub fn policy_path(&self, name: &str) -> std::result::Result<Option<PathBuf>, ConfigError> {
        Ok(match &self.source(name)?.kind {
            SourceKind::Policy { policy } => Some(self.resolve(policy)),
            SourceKind::Combine { .. } => None,
        })
    }

    /// Sources `name` needs before it can be prepared: its `require` list
    /// plus, for combines, the owners of its address spaces.
    ///
    /// # Errors
    ///
    /// `ConfigError::UnknownSource` if no source has this name.
    pub fn dependencies(&self, name: &str) -> std::result::Result<BTreeSet<&str>, ConfigError> {
        let source = self.source(name)?;
        let mut deps: BTreeSet<&str> = source.require.iter().map(String::as_str).collect();
        if let SourceKind::Combine { address_spaces } = &source.kind {
            deps.extend(address_spaces.keys().map(String::as_str));
        }
        Ok(deps)
    }

    /// The address spaces declared by a `combine` source
    ///
    /// # Errors
    ///
    /// `ConfigError::UnknownSource` for an undefined source,
    /// `ConfigError::InvalidSource` if it is not a combine or an address is
    /// malformed.
    pub fn address_spaces(&self, name: &str) -> std::result::Result<Vec<AddressSpace>, ConfigError> {
        let SourceKind::Combine { address_spaces } = &self.source(name)?.kind else {
            return Err(ConfigError::InvalidSource {
                source_name: name.to_string(),
                message: "only combine sources declare address spaces".to_string(),
            });
        };
        address_spaces
            .iter()
            .map(|(owner, list)| {
                let field = format!("address_spaces.{owner}");
                let addrs = parse_addresses(name, &field, list.entries())?;
                Ok(AddressSpace::new(owner.clone(), addrs))
            })
            .collect()
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        for name in self.sources.keys() {
            for dep in self.dependencies(name)? {
                if !self.sources.contains_key(dep) {
                    return Err(ConfigError::MissingSource {
                        source_name: name.clone(),
                        missing: dep.to_string(),
                    });
                }
            }
            if matches!(self.sources[name].kind, SourceKind::Combine { .. }) {
                for space in self.address_spaces(name)? {
                    if let Some(warning) = check_reserved_addresses(&space.addrs) {
                        warn!("{name}: {}: {warning}", space.name);
                    }
                }
            }
        }
        self.prep_order::<&str>(&[])?;
        Ok(())
    }

    /// Sources to prepare for `targets` (all sources if empty), dependencies
    /// first.
    ///
    /// # Errors
    ///
    /// `ConfigError::UnknownSource` for an undefined target,
    /// `ConfigError::DependencyCycle` if the dependency graph has a cycle.
    pub fn prep_order<S: AsRef<str>>(&self, targets: &[S]) -> std::result::Result<Vec<String>, ConfigError> {
        let roots: Vec<&str> = if targets.is_empty() {
            self.sources.keys().map(String::as_str).collect()
        } else {
            targets.iter().map(AsRef::as_ref).collect()
        };

        let mut order = Vec::new();
        let mut done = BTreeSet::new();
        let mut visiting = BTreeSet::new();
        for root in roots {
            self.visit(root, &mut visiting, &mut done, &mut order)?;
        }
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        visiting: &mut BTreeSet<&'a str>,
        done: &mut BTreeSet<&'a str>,
        order: &mut Vec<String>,
    ) -> std::result::Result<(), ConfigError> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name) {
            return Err(ConfigError::DependencyCycle(name.to_string()));
        }
        for dep in self.dependencies(name)? {
            self.visit(dep, visiting, done, order)?;
        }
        visiting.remove(name);
        done.insert(name);
        order.push(name.to_string());
        Ok(())
    }
}

fn check_type(name: &str, value: &serde_yaml::Value) -> std::result::Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidSource {
        source_name: name.to_string(),
        message,
    };
    let ty = value
        .get("type")
        .and_then(serde_yaml::Value::as_str)
        .ok_or_else(|| invalid("missing 'type'".to_string()))?;
    SourceType::from_str(ty).map_err(|_| invalid(format!("unknown type '{ty}'")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::core::range_set::IpSet;

    const SAMPLE: &str = r"
edge:
  type: policy
  output: edge.json
  policy: edge-policy.json
  application-map: { junos-http: http }
cloud:
  type: policy
  output: out/cloud.json
  policy: /abs/cloud-policy.json
global:
  type: combine
  output: global.json
  require: [edge]
  address_spaces:
    edge: [10.0.0.0/8, 192.168.0.0/16]
    cloud: 172.16.0.0/12
";

    fn config_err(text: &str) -> ConfigError {
        match Config::from_yaml(text, "/etc/fwunit").unwrap_err() {
            Error::Config(e) => e,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_parses_sources() {
        let config = Config::from_yaml(SAMPLE, "/etc/fwunit").unwrap();
        assert_eq!(config.source_names().collect::<Vec<_>>(), ["cloud", "edge", "global"]);

        let edge = config.source("edge").unwrap();
        assert_eq!(edge.kind.source_type(), SourceType::Policy);
        assert_eq!(edge.application_map.lookup("junos-http"), "http");
        assert!(config.source("cloud").unwrap().application_map.is_empty());
    }

    #[test]
    fn test_paths_resolve_against_base_dir() {
        let config = Config::from_yaml(SAMPLE, "/etc/fwunit").unwrap();
        assert_eq!(config.output_path("cloud").unwrap(), PathBuf::from("/etc/fwunit/out/cloud.json"));
        assert_eq!(
            config.policy_path("edge").unwrap(),
            Some(PathBuf::from("/etc/fwunit/edge-policy.json"))
        );
        assert_eq!(config.policy_path("cloud").unwrap(), Some(PathBuf::from("/abs/cloud-policy.json")));
        assert_eq!(config.policy_path("global").unwrap(), None);
    }

    #[test]
    fn test_address_spaces_accept_one_or_many() {
        let config = Config::from_yaml(SAMPLE, ".").unwrap();
        let spaces = config.address_spaces("global").unwrap();
        assert_eq!(spaces.len(), 2);
        assert_eq!(spaces[0].name, "cloud");
        assert_eq!(spaces[0].addrs, "172.16.0.0/12".parse::<IpSet>().unwrap());
        assert_eq!(spaces[1].addrs, "10.0.0.0/8, 192.168.0.0/16".parse::<IpSet>().unwrap());
    }

    #[test]
    fn test_prep_order_puts_dependencies_first() {
        let config = Config::from_yaml(SAMPLE, ".").unwrap();
        let order = config.prep_order(&["global"]).unwrap();
        assert_eq!(order.last().map(String::as_str), Some("global"));
        assert_eq!(order.len(), 3);

        assert_eq!(config.prep_order(&["edge"]).unwrap(), ["edge"]);
        assert_eq!(config.prep_order::<&str>(&[]).unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_target_is_reported() {
        let config = Config::from_yaml(SAMPLE, ".").unwrap();
        assert_eq!(
            config.prep_order(&["nope"]).unwrap_err(),
            ConfigError::UnknownSource("nope".into())
        );
        assert_eq!(config.output_path("nope").unwrap_err(), ConfigError::UnknownSource("nope".into()));
    }

    #[test]
    fn test_missing_required_source() {
        let err = config_err("a:\n  type: policy\n  output: a.json\n  policy: a-p.json\n  require: [b]\n");
        assert_eq!(
            err,
            ConfigError::MissingSource {
                source_name: "a".into(),
                missing: "b".into()
            }
        );
    }

    #[test]
    fn test_address_space_owner_must_exist() {
        let err = config_err("g:\n  type: combine\n  output: g.json\n  address_spaces:\n    ghost: 10.0.0.0/8\n");
        assert!(matches!(err, ConfigError::MissingSource { ref missing, .. } if missing == "ghost"));
    }

    #[test]
    fn test_dependency_cycle() {
        let text = "\
a:
  type: policy
  output: a.json
  policy: a-p.json
  require: [b]
b:
  type: policy
  output: b.json
  policy: b-p.json
  require: [a]
";
        assert!(matches!(config_err(text), ConfigError::DependencyCycle(_)));
    }

    #[test]
    fn test_unknown_type() {
        let err = config_err("a:\n  type: aws\n  output: a.json\n");
        let ConfigError::InvalidSource { source_name, message } = err else {
            panic!("expected InvalidSource");
        };
        assert_eq!(source_name, "a");
        assert!(message.contains("aws"));
    }

    #[test]
    fn test_malformed_address_space() {
        let text = "\
a:
  type: policy
  output: a.json
  policy: a-p.json
g:
  type: combine
  output: g.json
  address_spaces:
    a: 10.0.0.0/33
";
        assert!(matches!(config_err(text), ConfigError::InvalidSource { .. }));
    }

    #[test]
    fn test_invalid_source_name() {
        assert!(matches!(
            config_err("'../x':\n  type: policy\n  output: x.json\n  policy: p.json\n"),
            ConfigError::InvalidSource { .. }
        ));
    }

    #[test]
    fn test_missing_output_is_yaml_error() {
        let err = Config::from_yaml("a:\n  type: policy\n  policy: p.json\n", ".").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[tokio::test]
    async fn test_load_uses_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        tokio::fs::write(&path, SAMPLE).await.unwrap();
        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.base_dir(), dir.path());
        assert_eq!(config.output_path("edge").unwrap(), dir.path().join("edge.json"));
    }

    #[test]
    fn test_locate_prefers_explicit_path() {
        assert_eq!(Config::locate(Some(Path::new("/x/y.yaml"))), PathBuf::from("/x/y.yaml"));
    }
}
