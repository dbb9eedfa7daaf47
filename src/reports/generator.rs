use super::render::{derive_charts, render_markdown, Chart, ReportFormat};
use super::sections::{ReportPeriod, ReportSection};
use crate::error::{AutomationError, AutomationResult};
use crate::run_store::{append_typed, bump_counter, recent_typed, set_field, RecordKind, RunRecordStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Daily,
    Weekly,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Daily => "daily",
            ReportKind::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(ReportKind::Daily),
            "weekly" => Some(ReportKind::Weekly),
            _ => None,
        }
    }

    pub fn span(&self) -> Duration {
        match self {
            ReportKind::Daily => Duration::days(1),
            ReportKind::Weekly => Duration::days(7),
        }
    }
}

/// Result of one section: exactly one of `data` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionOutcome {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub kind: ReportKind,
    pub generated_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub sections: Vec<SectionOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<Chart>,
}

impl Report {
    pub fn failed_sections(&self) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Persisted summary of a generated report file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub kind: ReportKind,
    pub format: ReportFormat,
    pub path: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub sections: usize,
    pub failed_sections: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReportOptions {
    pub kind: ReportKind,
    pub format: ReportFormat,
    pub charts: bool,
}

impl ReportOptions {
    pub fn new(kind: ReportKind) -> Self {
        Self {
            kind,
            format: ReportFormat::Markdown,
            charts: true,
        }
    }
}

pub struct ReportGenerator {
    sections: Vec<Arc<dyn ReportSection>>,
    reports_dir: PathBuf,
    store: Arc<dyn RunRecordStore>,
}

impl ReportGenerator {
    pub fn new(store: Arc<dyn RunRecordStore>, reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            sections: Vec::new(),
            reports_dir: reports_dir.into(),
            store,
        }
    }

    pub fn with_section(mut self, section: Arc<dyn ReportSection>) -> Self {
        self.sections.push(section);
        self
    }

    pub fn section_names(&self) -> Vec<&'static str> {
        self.sections.iter().map(|s| s.name()).collect()
    }

    /// Collect every section. A failing section becomes an error placeholder.
    pub async fn build(&self, kind: ReportKind, charts: bool, now: DateTime<Utc>) -> Report {
        let period = ReportPeriod {
            start: now - kind.span(),
            end: now,
        };
        let mut outcomes = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            let outcome = match section.collect(&period).await {
                Ok(data) => SectionOutcome {
                    name: section.name().to_string(),
                    data: Some(data),
                    error: None,
                },
                Err(e) => {
                    warn!("Report section {} failed: {}", section.name(), e);
                    SectionOutcome {
                        name: section.name().to_string(),
                        data: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        let charts = if charts {
            derive_charts(&outcomes)
        } else {
            Vec::new()
        };
        Report {
            kind,
            generated_at: now,
            period_start: period.start,
            period_end: period.end,
            sections: outcomes,
            charts,
        }
    }

    /// Build, write to `reports/report-<kind>-<timestamp>.<ext>` and record it.
    pub async fn generate(&self, options: ReportOptions) -> AutomationResult<ReportRecord> {
        let now = Utc::now();
        let report = self.build(options.kind, options.charts, now).await;
        let content = match options.format {
            ReportFormat::Json => serde_json::to_string_pretty(&report)?,
            ReportFormat::Markdown => render_markdown(&report),
        };

        let path = self.reports_dir.join(format!(
            "report-{}-{}.{}",
            options.kind.as_str(),
            now.format("%Y%m%d-%H%M%S"),
            options.format.extension()
        ));
        write_report(&path, content).await?;

        let record = ReportRecord {
            kind: options.kind,
            format: options.format,
            path,
            generated_at: now,
            sections: report.sections.len(),
            failed_sections: report
                .failed_sections()
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        info!(
            "Generated {} report at {} ({} of {} sections failed)",
            options.kind.as_str(),
            record.path.display(),
            record.failed_sections.len(),
            record.sections
        );
        self.persist(&record);
        Ok(record)
    }

    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<ReportRecord>> {
        recent_typed(self.store.as_ref(), RecordKind::Report, limit)
    }

    fn persist(&self, record: &ReportRecord) {
        if let Err(e) = append_typed(self.store.as_ref(), RecordKind::Report, record) {
            warn!("Failed to persist report record: {}", e);
        }
        let result = self.store.update_stats(RecordKind::Report, &mut |stats| {
            bump_counter(stats, "total", 1);
            bump_counter(stats, record.kind.as_str(), 1);
            if !record.failed_sections.is_empty() {
                bump_counter(stats, "with_failed_sections", 1);
            }
            set_field(
                stats,
                "last_report",
                Value::from(record.path.display().to_string()),
            );
        });
        if let Err(e) = result {
            warn!("Failed to update report stats: {}", e);
        }
    }
}

async fn write_report(path: &Path, content: String) -> AutomationResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AutomationError::external("create reports dir", e))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| AutomationError::external(&format!("write {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::RecommendationsSection;
    use crate::run_store::JsonDayStore;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct FixedSection(&'static str, Value);

    #[async_trait]
    impl ReportSection for FixedSection {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn collect(&self, _period: &ReportPeriod) -> AutomationResult<Value> {
            Ok(self.1.clone())
        }
    }

    fn generator(temp_dir: &TempDir) -> ReportGenerator {
        let store = Arc::new(JsonDayStore::new(temp_dir.path().join("records")).unwrap());
        ReportGenerator::new(store, temp_dir.path().join("reports"))
            .with_section(Arc::new(FixedSection(
                "jobs",
                json!({"runs": 3, "successful": 2, "failed": 1}),
            )))
            .with_section(Arc::new(RecommendationsSection))
    }

    #[tokio::test]
    async fn test_failing_section_becomes_placeholder() {
        let temp_dir = TempDir::new().unwrap();
        let report = generator(&temp_dir)
            .build(ReportKind::Weekly, true, Utc::now())
            .await;

        assert_eq!(report.sections.len(), 2);
        assert!(report.sections[0].data.is_some());
        assert!(report.sections[1].error.as_deref().unwrap().starts_with("Not implemented"));
        assert_eq!(report.failed_sections(), vec!["recommendations"]);
        assert_eq!(report.charts.len(), 1);
        assert_eq!(report.period_end - report.period_start, Duration::days(7));
    }

    #[tokio::test]
    async fn test_generate_writes_file_and_record() {
        let temp_dir = TempDir::new().unwrap();
        let generator = generator(&temp_dir);

        let markdown = generator
            .generate(ReportOptions::new(ReportKind::Daily))
            .await
            .unwrap();
        let text = std::fs::read_to_string(&markdown.path).unwrap();
        assert!(text.starts_with("# Daily report"));
        assert!(text.contains("> Section unavailable"));
        assert!(text.contains("### Job outcomes"));

        let mut options = ReportOptions::new(ReportKind::Daily);
        options.format = ReportFormat::Json;
        options.charts = false;
        let json_record = generator.generate(options).await.unwrap();
        let parsed: Value =
            serde_json::from_str(&std::fs::read_to_string(&json_record.path).unwrap()).unwrap();
        assert_eq!(parsed["sections"][0]["data"]["runs"], 3);
        assert!(parsed.get("charts").is_none());

        let recent = generator.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].failed_sections, vec!["recommendations".to_string()]);
    }
}
