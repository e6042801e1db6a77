//! Building rule sets from configured sources
//!
//! Sources are prepared in waves: every source whose dependencies are done is
//! built on its own task, and the next wave starts once the whole current
//! wave has finished. Normalization and the set algebra are CPU bound and run
//! on the blocking pool.

use crate::config::{Config, SourceKind};
use crate::core::combine::{combine, Authority};
use crate::core::error::{Error, Result};
use crate::core::normalize::PolicyDocument;
use crate::core::rule::simplify_rules;
use crate::core::rule_set::RuleSet;
use crate::core::storage;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Prepares `targets` (every source if empty) and their dependencies, writing
/// each rule set to its configured output. Returns the prepared source names
/// in the order they finished.
///
/// # Errors
///
/// The first error of any source; sources of later waves are not started.
pub async fn prep<S: AsRef<str>>(config: Arc<Config>, targets: &[S]) -> Result<Vec<String>> {
    let waves = waves(&config, &config.prep_order(targets)?)?;
    let mut built = Vec::new();

    for (depth, wave) in waves.into_iter().enumerate() {
        debug!("prep wave {depth}: {}", wave.join(", "));
        let mut tasks = JoinSet::new();
        for name in wave {
            let config = Arc::clone(&config);
            tasks.spawn(async move {
                let rules = build_source(&config, &name).await?;
                let path = config.output_path(&name)?;
                let count = rules.rules().len();
                tokio::task::spawn_blocking(move || storage::save_rules(&path, &rules))
                    .await
                    .map_err(|e| Error::Internal(format!("save task failed: {e}")))??;
                info!("{name}: wrote {count} rules");
                Ok::<_, Error>(name)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let name = joined.map_err(|e| Error::Internal(format!("prep task failed: {e}")))??;
            built.push(name);
        }
    }
    Ok(built)
}

/// Groups `order` so that every source lands one wave after its deepest
/// dependency.
fn waves(config: &Config, order: &[String]) -> Result<Vec<Vec<String>>> {
    let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
    let mut waves: Vec<Vec<String>> = Vec::new();
    for name in order {
        let level = config
            .dependencies(name)?
            .into_iter()
            .filter_map(|dep| depth.get(dep).map(|d| d + 1))
            .max()
            .unwrap_or(0);
        depth.insert(name, level);
        if waves.len() <= level {
            waves.resize_with(level + 1, Vec::new);
        }
        waves[level].push(name.clone());
    }
    Ok(waves)
}

async fn build_source(config: &Config, name: &str) -> Result<RuleSet> {
    let source = config.source(name)?;
    info!("{name}: preparing {} source", source.kind.source_type());

    let rules = match &source.kind {
        SourceKind::Policy { policy } => {
            let path = config.base_dir().join(policy);
            let text = tokio::fs::read_to_string(&path).await?;
            let document: PolicyDocument = serde_json::from_str(&text)?;
            debug!(
                "{name}: {} policies, {} routes from {:?}",
                document.policies.len(),
                document.routes.len(),
                path
            );
            tokio::task::spawn_blocking(move || document.normalize())
                .await
                .map_err(|e| Error::Internal(format!("normalize task failed: {e}")))??
        }
        SourceKind::Combine { .. } => {
            let spaces = config.address_spaces(name)?;
            let mut loaded = Vec::with_capacity(spaces.len());
            for space in &spaces {
                loaded.push(storage::load_rules(&config.output_path(&space.name)?).await?);
            }
            tokio::task::spawn_blocking(move || {
                let sources: Vec<Authority<'_>> = spaces
                    .iter()
                    .zip(&loaded)
                    .map(|(space, rules)| Authority { space, rules })
                    .collect();
                combine(&sources)
            })
            .await
            .map_err(|e| Error::Internal(format!("combine task failed: {e}")))??
        }
    };

    if source.application_map.is_empty() {
        return Ok(rules);
    }
    let renamed = source.application_map.apply(rules.into_rules())?;
    Ok(RuleSet::new(simplify_rules(renamed)))
}
