use super::source::{ContentSource, RemoteFile};
use crate::datastore::{ContentItem, ContentRepository};
use crate::error::{AutomationError, AutomationResult};
use crate::run_store::{append_typed, bump_counter, set_field, RecordKind, RunRecordStore};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

const STATE_FILE: &str = ".sync-state.json";
const INDEX_FILE: &str = "index.json";

/// What the mirror last synced to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub commit: Option<String>,
    pub committed_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    /// Mirrored path -> blob sha.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub category: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSyncReport {
    pub commit: String,
    pub up_to_date: bool,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
    pub errors: Vec<String>,
    pub index_entries: Option<usize>,
    pub snapshot: Option<PathBuf>,
    pub synced_at: Option<DateTime<Utc>>,
}

/// Keeps a local mirror of source-controlled content in sync.
pub struct ContentAutomation {
    source: Arc<dyn ContentSource>,
    mirror_dir: PathBuf,
    snapshot_dir: Option<PathBuf>,
    repository: Option<Arc<dyn ContentRepository>>,
    store: Arc<dyn RunRecordStore>,
}

impl ContentAutomation {
    pub fn new(
        source: Arc<dyn ContentSource>,
        mirror_dir: impl Into<PathBuf>,
        store: Arc<dyn RunRecordStore>,
    ) -> Self {
        Self {
            source,
            mirror_dir: mirror_dir.into(),
            snapshot_dir: None,
            repository: None,
            store,
        }
    }

    /// Copy the mirror into `dir/snapshot-<ts>` before overwriting anything.
    pub fn with_snapshots(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn ContentRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn mirror_dir(&self) -> &Path {
        &self.mirror_dir
    }

    pub fn state(&self) -> SyncState {
        load_state(&self.mirror_dir.join(STATE_FILE))
    }

    /// Pull changed files from the source. With `force` the commit
    /// comparison is skipped and every blob sha is rechecked.
    pub async fn sync(&self, force: bool) -> AutomationResult<ContentSyncReport> {
        tokio::fs::create_dir_all(&self.mirror_dir).await?;
        let mut state = self.state();
        let revision = self.source.latest_revision().await?;

        let mut report = ContentSyncReport {
            commit: revision.commit.clone(),
            ..Default::default()
        };
        if !force && state.commit.as_deref() == Some(revision.commit.as_str()) {
            info!("Content already at {}", revision.commit);
            report.up_to_date = true;
            return Ok(report);
        }

        let remote = self.source.list_files().await?;
        let changed: Vec<&RemoteFile> = remote
            .iter()
            .filter(|f| state.files.get(&f.path) != Some(&f.sha))
            .collect();
        let removed: Vec<String> = state
            .files
            .keys()
            .filter(|p| !remote.iter().any(|f| &f.path == *p))
            .cloned()
            .collect();
        report.unchanged = remote.len() - changed.len();

        if !changed.is_empty() || !removed.is_empty() {
            if let Some(dir) = &self.snapshot_dir {
                match snapshot_mirror(&self.mirror_dir, dir) {
                    Ok(path) => report.snapshot = Some(path),
                    Err(e) => report.errors.push(format!("snapshot failed: {:#}", e)),
                }
            }
        }

        for file in changed {
            match self.write_file(file).await {
                Ok(()) => {
                    state.files.insert(file.path.clone(), file.sha.clone());
                    report.updated.push(file.path.clone());
                }
                Err(e) => {
                    warn!("Failed to sync {}: {}", file.path, e);
                    report.errors.push(format!("{}: {}", file.path, e));
                }
            }
        }
        for path in removed {
            if let Ok(local) = mirror_path(&self.mirror_dir, &path) {
                if let Err(e) = tokio::fs::remove_file(&local).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        report.errors.push(format!("{}: {}", path, e));
                        continue;
                    }
                }
            }
            state.files.remove(&path);
            report.removed.push(path);
        }

        if !report.updated.is_empty() || !report.removed.is_empty() {
            let entries = build_index(&self.mirror_dir, &state.files)?;
            let index = serde_json::to_vec_pretty(&entries)?;
            tokio::fs::write(self.mirror_dir.join(INDEX_FILE), index).await?;
            report.index_entries = Some(entries.len());
            self.upsert_entries(&entries, &state.files, &mut report);
        }

        // A partial sync keeps the old commit so the next run retries the failures.
        if report.errors.is_empty() {
            state.commit = Some(revision.commit);
            state.committed_at = revision.committed_at;
        }
        let now = Utc::now();
        state.synced_at = Some(now);
        report.synced_at = Some(now);
        save_state(&self.mirror_dir.join(STATE_FILE), &state)?;

        info!(
            "Content sync: {} updated, {} removed, {} unchanged, {} errors",
            report.updated.len(),
            report.removed.len(),
            report.unchanged,
            report.errors.len()
        );
        self.persist(&report);
        Ok(report)
    }

    async fn write_file(&self, file: &RemoteFile) -> AutomationResult<()> {
        let target = mirror_path(&self.mirror_dir, &file.path)?;
        let bytes = self.source.fetch_file(&file.path).await?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(())
    }

    fn upsert_entries(
        &self,
        entries: &[IndexEntry],
        shas: &BTreeMap<String, String>,
        report: &mut ContentSyncReport,
    ) {
        let Some(repository) = &self.repository else {
            return;
        };
        let now = Utc::now();
        for entry in entries {
            let item = ContentItem {
                id: entry.id.clone(),
                title: entry.title.clone(),
                category: entry.category.clone(),
                path: entry.path.clone(),
                sha: shas.get(&entry.path).cloned().unwrap_or_default(),
                updated_at: now,
            };
            if let Err(e) = repository.upsert_content(&item) {
                report
                    .errors
                    .push(format!("datastore upsert of {}: {:#}", entry.id, e));
            }
        }
    }

    fn persist(&self, report: &ContentSyncReport) {
        if let Err(e) = append_typed(self.store.as_ref(), RecordKind::Content, report) {
            warn!("Failed to persist content sync report: {}", e);
        }
        let result = self.store.update_stats(RecordKind::Content, &mut |stats| {
            bump_counter(stats, "syncs", 1);
            bump_counter(stats, "files_updated", report.updated.len() as i64);
            bump_counter(stats, "files_removed", report.removed.len() as i64);
            bump_counter(stats, "errors", report.errors.len() as i64);
            set_field(stats, "last_commit", Value::from(report.commit.clone()));
        });
        if let Err(e) = result {
            warn!("Failed to update content stats: {}", e);
        }
    }
}

/// Resolve a remote path inside the mirror, rejecting anything that escapes it.
fn mirror_path(mirror_dir: &Path, relative: &str) -> AutomationResult<PathBuf> {
    let path = Path::new(relative);
    let safe = path
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe || relative.is_empty() || relative == STATE_FILE || relative == INDEX_FILE {
        return Err(AutomationError::Validation(format!(
            "refusing to mirror path '{}'",
            relative
        )));
    }
    Ok(mirror_dir.join(path))
}

fn load_state(path: &Path) -> SyncState {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn save_state(path: &Path, state: &SyncState) -> anyhow::Result<()> {
    let raw = serde_json::to_vec_pretty(state)?;
    std::fs::write(path, raw).with_context(|| format!("Failed to write {}", path.display()))
}

fn snapshot_mirror(mirror_dir: &Path, snapshot_root: &Path) -> anyhow::Result<PathBuf> {
    let target = snapshot_root.join(format!(
        "snapshot-{}",
        Utc::now().format("%Y%m%d-%H%M%S-%3f")
    ));
    for entry in WalkDir::new(mirror_dir).min_depth(1) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(mirror_dir)?;
        let dest = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    std::fs::create_dir_all(&target)?;
    Ok(target)
}

/// Index every mirrored markdown or JSON document.
fn build_index(
    mirror_dir: &Path,
    files: &BTreeMap<String, String>,
) -> AutomationResult<Vec<IndexEntry>> {
    let mut entries = Vec::new();
    for path in files.keys() {
        let Some((stem, ext)) = path.rsplit_once('.') else {
            continue;
        };
        if ext != "md" && ext != "json" {
            continue;
        }
        let raw = std::fs::read_to_string(mirror_dir.join(path)).unwrap_or_default();
        let title = if ext == "md" {
            markdown_title(&raw)
        } else {
            json_title(&raw)
        }
        .unwrap_or_else(|| humanize(stem.rsplit('/').next().unwrap_or(stem)));
        let category = match path.split_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => "general".to_string(),
        };
        entries.push(IndexEntry {
            id: stem.replace('/', "-"),
            title,
            category,
            path: path.clone(),
        });
    }
    Ok(entries)
}

fn markdown_title(raw: &str) -> Option<String> {
    let mut lines = raw.lines();
    if raw.starts_with("---") {
        lines.next();
        for line in lines.by_ref() {
            if line.trim() == "---" {
                break;
            }
            if let Some(title) = line.strip_prefix("title:") {
                let title = title.trim().trim_matches('"').trim_matches('\'');
                if !title.is_empty() {
                    return Some(title.to_string());
                }
            }
        }
    }
    lines
        .find_map(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
}

fn json_title(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    value.get("title")?.as_str().map(str::to_string)
}

fn humanize(stem: &str) -> String {
    stem.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
