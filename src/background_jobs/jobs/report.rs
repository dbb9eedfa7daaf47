use super::to_payload;
use crate::background_jobs::{
    context::JobContext,
    job::{bool_param, str_param, BackgroundJob, JobError},
};
use crate::reports::{ReportFormat, ReportGenerator, ReportKind, ReportOptions};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Generates a daily or weekly report. Options: `format` (json, markdown), `charts`.
pub struct ReportJob {
    generator: Arc<ReportGenerator>,
    kind: ReportKind,
    format: ReportFormat,
}

impl ReportJob {
    pub fn new(generator: Arc<ReportGenerator>, kind: ReportKind, format: ReportFormat) -> Self {
        Self {
            generator,
            kind,
            format,
        }
    }
}

#[async_trait]
impl BackgroundJob for ReportJob {
    fn description(&self) -> &'static str {
        match self.kind {
            ReportKind::Daily => "Writes the daily operations report",
            ReportKind::Weekly => "Writes the weekly operations report",
        }
    }

    async fn execute(
        &self,
        _ctx: &JobContext,
        params: Option<JsonValue>,
    ) -> Result<JsonValue, JobError> {
        let mut options = ReportOptions::new(self.kind);
        options.format = match str_param(&params, "format")? {
            Some(f) => ReportFormat::parse(&f)
                .ok_or_else(|| JobError::Validation(format!("unknown report format '{}'", f)))?,
            None => self.format,
        };
        options.charts = bool_param(&params, "charts")?.unwrap_or(true);
        let record = self.generator.generate(options).await?;
        to_payload(&record)
    }
}
