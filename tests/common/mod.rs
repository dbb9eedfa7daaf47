//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestAutomation;
//!
//! #[tokio::test]
//! async fn test_status() {
//!     let harness = TestAutomation::spawn().await;
//!     let status = harness.automation.status().await;
//!     assert!(!status.scheduler.jobs.is_empty());
//! }
//! ```

mod fakes;
mod fixtures;
mod harness;

#[allow(unused_imports)]
pub use fakes::{RecordingChannel, ScriptedRunner, StaticProbe};
#[allow(unused_imports)]
pub use fixtures::{seed_users, write_aged_file};
pub use harness::TestAutomation;
