//! Firewall rule algebra
//!
//! - [`range_set`]: canonical IP address sets
//! - [`pairs`]: source × destination relations built from address sets
//! - [`rule`] and [`rule_set`]: normalized rules and their per-application index
//! - [`normalize`]: first-match policies to order-independent rules
//! - [`combine`]: per-source rule sets to one global rule set
//! - [`query`]: permitted / denied / partial answers
//! - [`assertions`]: unit-test assertions over a rule set
//! - [`cache`]: shared, load-once rule sets
//! - [`storage`]: versioned, checksummed rule set files
//! - [`app_map`]: device application identifiers to common names
//! - [`error`]: error types

pub mod app_map;
pub mod assertions;
pub mod cache;
pub mod combine;
pub mod error;
pub mod normalize;
pub mod pairs;
pub mod query;
pub mod range_set;
pub mod rule;
pub mod rule_set;
pub mod storage;

#[cfg(test)]
pub mod test_helpers;
