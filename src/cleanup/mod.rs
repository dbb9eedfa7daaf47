//! Retention-based cleanup of files and datastore collections.

mod rules;
mod service;

pub use rules::{days, default_rules, file_pattern, CleanupRule, CleanupTarget};
pub use service::{CleanupReport, CleanupResult, CleanupService};
