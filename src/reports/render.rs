use super::generator::{Report, SectionOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;

const BAR_WIDTH: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Json,
    Markdown,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(ReportFormat::Json),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "md",
        }
    }
}

/// Labelled series rendered as a horizontal bar chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub title: String,
    pub points: Vec<(String, f64)>,
}

/// Charts derived from whichever sections collected successfully.
pub fn derive_charts(sections: &[SectionOutcome]) -> Vec<Chart> {
    let mut charts = Vec::new();
    for section in sections {
        let Some(data) = &section.data else {
            continue;
        };
        let chart = match section.name.as_str() {
            "jobs" => Some(Chart {
                title: "Job outcomes".to_string(),
                points: number_points(data, &["successful", "failed"]),
            }),
            "system" => data["status_counts"].as_object().map(|counts| Chart {
                title: "Health checks by status".to_string(),
                points: counts
                    .iter()
                    .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
                    .collect(),
            }),
            "users" => Some(Chart {
                title: "Users".to_string(),
                points: number_points(data, &["total", "active_last_7_days", "new_last_7_days"]),
            }),
            _ => None,
        };
        if let Some(chart) = chart.filter(|c| !c.points.is_empty()) {
            charts.push(chart);
        }
    }
    charts
}

fn number_points(data: &Value, keys: &[&str]) -> Vec<(String, f64)> {
    keys.iter()
        .filter_map(|k| data[*k].as_f64().map(|n| (k.to_string(), n)))
        .collect()
}

pub fn render_markdown(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {} report", capitalize(report.kind.as_str()));
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Period: {} to {}  ",
        report.period_start.format("%Y-%m-%d %H:%M UTC"),
        report.period_end.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(out, "Generated: {}", report.generated_at.to_rfc3339());

    for section in &report.sections {
        let _ = writeln!(out);
        let _ = writeln!(out, "## {}", capitalize(&section.name));
        let _ = writeln!(out);
        match (&section.data, &section.error) {
            (_, Some(error)) => {
                let _ = writeln!(out, "> Section unavailable: {}", error);
            }
            (Some(Value::Object(map)), None) if !map.is_empty() => {
                for (key, value) in map {
                    let _ = writeln!(out, "- **{}**: {}", key, inline(value));
                }
            }
            (Some(value), None) => {
                let _ = writeln!(out, "{}", inline(value));
            }
            (None, None) => {
                let _ = writeln!(out, "_No data_");
            }
        }
    }

    if !report.charts.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Charts");
        for chart in &report.charts {
            let _ = writeln!(out);
            let _ = writeln!(out, "### {}", chart.title);
            let _ = writeln!(out);
            let _ = writeln!(out, "```");
            out.push_str(&render_bars(chart));
            let _ = writeln!(out, "```");
        }
    }
    out
}

fn render_bars(chart: &Chart) -> String {
    let label_width = chart.points.iter().map(|(l, _)| l.len()).max().unwrap_or(0);
    let max = chart
        .points
        .iter()
        .map(|(_, v)| *v)
        .fold(0.0_f64, f64::max);
    let mut out = String::new();
    for (label, value) in &chart.points {
        let width = if max > 0.0 {
            ((value / max) * BAR_WIDTH as f64).round() as usize
        } else {
            0
        };
        let _ = writeln!(
            out,
            "{:<label_width$} | {} {}",
            label,
            "#".repeat(width),
            value
        );
    }
    out
}

fn inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "n/a".to_string(),
        other => other.to_string(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
