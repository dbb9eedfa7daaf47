//! Periodic operational reports built from independently collected sections.

mod generator;
mod render;
mod sections;

pub use generator::{
    Report, ReportGenerator, ReportKind, ReportOptions, ReportRecord, SectionOutcome,
};
pub use render::{derive_charts, render_markdown, Chart, ReportFormat};
pub use sections::{
    ErrorsSection, JobsSection, RecommendationsSection, ReportPeriod, ReportSection,
    StatsSection, SystemSection, UsersSection,
};
