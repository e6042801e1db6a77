//! fwunit - unit tests for firewall rules
//!
//! Turns firewall policies into a queryable model of which traffic is allowed
//! between which address ranges for which application, and lets tests assert
//! properties of that model.
//!
//! # Architecture
//!
//! - [`core`] - Rule algebra, normalization, combination, queries and storage
//! - [`config`] - `fwunit.yaml` source configuration
//! - [`prep`] - Building and persisting rule sets for configured sources
//! - [`validators`] - Source name and address validation
//! - [`utils`] - Utility functions (XDG directories)
//!
//! # Guarantees
//!
//! - At most one normalized rule matches any (source, destination, application)
//! - Partial coverage is reported as such, never rounded to permitted or denied
//! - Rule set files are versioned and SHA-256 checksummed
//! - Atomic file writes with secure permissions

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod core;
pub mod prep;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use crate::core::assertions::{AssertionFailure, TestContext};
pub use crate::core::error::{Error, Result};
pub use crate::core::pairs::IpPairs;
pub use crate::core::query::{AppSet, Coverage};
pub use crate::core::range_set::IpSet;
pub use crate::core::rule::{App, Rule};
pub use crate::core::rule_set::RuleSet;
