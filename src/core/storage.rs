//! Persisted rule sets
//!
//! A rule set is written as one JSON document:
//!
//! ```json
//! { "version": 1, "created_at": "...", "checksum": "<sha256>", "rules": [ ... ] }
//! ```
//!
//! The checksum covers the canonical JSON form of `rules`. Loading checks the
//! format version and the checksum before rebuilding the rule index, so a
//! truncated or hand-edited file is reported instead of silently answering
//! queries with partial rules.

use crate::core::error::{Error, LoadError, Result};
use crate::core::rule_set::RuleSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

/// Current on-disk format version
pub const RULES_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RulesFile {
    version: u32,
    created_at: chrono::DateTime<chrono::Utc>,
    checksum: String,
    rules: Value,
}

/// Computes the SHA-256 checksum of a JSON value.
///
/// The checksum is computed on the canonical JSON string representation.
pub fn compute_checksum(value: &Value) -> String {
    let json_str = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json_str.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serializes a rule set to its persisted JSON form.
///
/// # Errors
///
/// Returns `Err` if the rules cannot be serialized.
pub fn to_json(rules: &RuleSet) -> Result<String> {
    let rules = serde_json::to_value(rules)?;
    let file = RulesFile {
        version: RULES_FORMAT_VERSION,
        created_at: chrono::Utc::now(),
        checksum: compute_checksum(&rules),
        rules,
    };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Parses the persisted JSON form. `origin` names the data in errors.
///
/// # Errors
///
/// - `LoadError::Corrupted` if the document or its rules are malformed
/// - `LoadError::VersionMismatch` for other format versions
/// - `LoadError::ChecksumMismatch` if the rules were modified
pub fn from_json(json: &str, origin: &str) -> Result<RuleSet> {
    let corrupted = |e: serde_json::Error| LoadError::Corrupted {
        path: origin.to_string(),
        message: e.to_string(),
    };

    let file: RulesFile = serde_json::from_str(json).map_err(corrupted)?;
    if file.version != RULES_FORMAT_VERSION {
        return Err(LoadError::VersionMismatch {
            found: file.version,
            expected: RULES_FORMAT_VERSION,
        }
        .into());
    }

    let actual = compute_checksum(&file.rules);
    if actual != file.checksum {
        return Err(LoadError::ChecksumMismatch {
            expected: file.checksum,
            actual,
        }
        .into());
    }

    let rules: RuleSet = serde_json::from_value(file.rules).map_err(corrupted)?;
    let overlaps = rules.overlapping_rules();
    if !overlaps.is_empty() {
        warn!(
            "{}: {} pairs of rules overlap; queries stay correct but provenance is ambiguous",
            origin,
            overlaps.len()
        );
    }
    Ok(rules)
}

/// Writes a rule set atomically (temp file in the same directory, then rename).
///
/// # Security
///
/// On Unix systems the file is created with mode 0o600 before any rule data
/// is written.
///
/// # Errors
///
/// Returns `Err` if serialization or any filesystem operation fails.
pub fn save_rules(path: &Path, rules: &RuleSet) -> Result<()> {
    use std::io::Write;
    use tempfile::NamedTempFile;

    let json = to_json(rules)?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    info!("Saved {} rules to {:?}", rules.rules().len(), path);
    Ok(())
}

/// Loads a persisted rule set.
///
/// # Async
/// Uses `tokio::fs` for non-blocking file I/O.
///
/// # Errors
///
/// Returns `LoadError::NotFound` if the file does not exist, otherwise see
/// [`from_json`].
pub async fn load_rules(path: &Path) -> Result<RuleSet> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LoadError::NotFound(path.display().to_string()).into());
        }
        Err(e) => return Err(e.into()),
    };
    let rules = from_json(&json, &path.display().to_string())?;
    info!("Loaded {} rules from {:?}", rules.rules().len(), path);
    Ok(rules)
}
