//! Mirrors source-controlled learning content and keeps its index current.

mod service;
mod source;

pub use service::{ContentAutomation, ContentSyncReport, IndexEntry, SyncState};
pub use source::{ContentSource, GithubContentSource, RemoteFile, RemoteRevision};
