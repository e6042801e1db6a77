use thiserror::Error;

/// Core error types for fwunit
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// fwunit.yaml could not be parsed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration is invalid; fatal before any query runs
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A persisted rule set could not be loaded
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors
///
/// Everything here is detected while building or validating inputs, never
/// while answering a query.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("invalid range: start {start} is greater than end {end}")]
    InvalidRange { start: String, end: String },

    #[error("policy '{policy}' references unknown zone '{zone}'")]
    UnknownZone { policy: String, zone: String },

    #[error("zone '{0}' has no route and therefore no addresses")]
    ZoneWithoutRoute(String),

    #[error(
        "application map sends both '{first}' and '{second}' to '{app}' with overlapping coverage"
    )]
    AppMapCollision {
        app: String,
        first: String,
        second: String,
    },

    #[error("application map entry for '{0}' has an empty name")]
    EmptyAppName(String),

    #[error("source '{source_name}' requires undefined source '{missing}'")]
    MissingSource {
        source_name: String,
        missing: String,
    },

    #[error("no source named '{0}' in the configuration")]
    UnknownSource(String),

    #[error("dependency cycle involving source '{0}'")]
    DependencyCycle(String),

    #[error("address spaces of '{first}' and '{second}' overlap")]
    OverlappingAddressSpaces { first: String, second: String },

    #[error("source '{source_name}': {message}")]
    InvalidSource {
        source_name: String,
        message: String,
    },
}

/// Rule set load errors
///
/// Fatal for the affected source only.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("rule set not found: {0}")]
    NotFound(String),

    #[error("rule set {path} is corrupted: {message}")]
    Corrupted { path: String, message: String },

    #[error("rule set format version mismatch: found v{found}, expected v{expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("rule set checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts_into_error() {
        let err: Error = ConfigError::ZoneWithoutRoute("dmz".into()).into();
        assert!(matches!(err, Error::Config(ConfigError::ZoneWithoutRoute(_))));
        assert!(err.to_string().contains("dmz"));
    }

    #[test]
    fn test_load_error_message_names_versions() {
        let err = LoadError::VersionMismatch {
            found: 7,
            expected: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("v7"));
        assert!(msg.contains("v1"));
    }

    #[test]
    fn test_collision_message_names_both_identifiers() {
        let err = ConfigError::AppMapCollision {
            app: "http".into(),
            first: "junos-http".into(),
            second: "web".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("junos-http"));
        assert!(msg.contains("web"));
        assert!(msg.contains("http"));
    }
}
