use clap::ValueEnum;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::grouper::ScanOutcome;
use crate::resolver::{ResolveReport, SkippedGroup};

#[derive(Copy, Clone, Debug, Serialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFormat {
    Text,
    Json,
}

#[derive(Serialize)]
pub struct JsonSummary {
    pub directory: String,
    pub dry_run: bool,
    pub scanned_files: usize,
    pub clash_groups: usize,
    pub renamed: usize,
    pub deleted: usize,
    pub skipped_ambiguous: usize,
    pub skipped_size_mismatch: usize,
    pub skipped_base_not_file: usize,
    pub skipped: Vec<SkippedGroup>,
    pub elapsed_seconds: f64,
    pub summary_format: SummaryFormat,
}

impl JsonSummary {
    pub fn new(
        directory: &Path,
        dry_run: bool,
        scan: &ScanOutcome,
        report: &ResolveReport,
        elapsed: Duration,
    ) -> Self {
        Self {
            directory: directory.display().to_string(),
            dry_run,
            scanned_files: scan.scanned_files,
            clash_groups: report.groups,
            renamed: report.renamed,
            deleted: report.deleted,
            skipped_ambiguous: report.skipped_ambiguous,
            skipped_size_mismatch: report.skipped_size_mismatch,
            skipped_base_not_file: report.skipped_base_not_file,
            skipped: report.skipped_groups.clone(),
            elapsed_seconds: elapsed.as_secs_f64(),
            summary_format: SummaryFormat::Json,
        }
    }
}

/// Formats a Duration into a human-readable string.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let mins = secs / 60;
    let secs = secs % 60;
    if mins > 0 {
        format!("{} min {} sec", mins, secs)
    } else {
        format!("{} sec", secs)
    }
}

pub fn summary_line(scan: &ScanOutcome, report: &ResolveReport, elapsed: Duration) -> String {
    format!(
        "{} files scanned, {} clash groups, {} renamed, {} deleted, {} skipped for review in {}.",
        scan.scanned_files,
        report.groups,
        report.renamed,
        report.deleted,
        report.skipped(),
        format_duration(elapsed)
    )
}

pub fn write_summary_to_path(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut data = contents.to_string();
    if !data.ends_with('\n') {
        data.push('\n');
    }
    fs::write(path, data)
}
