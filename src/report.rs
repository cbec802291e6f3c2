//! Run diagnostics: record rejections, identifier collisions, and the
//! end-of-run operator summary. Record-level failures never abort the run;
//! they accumulate here and land in one CSV for review.

use anyhow::{Context, Result};
use csv::Writer;
use std::{fs, io::IsTerminal, path::Path};

use crate::common::format_count;
use crate::errors::PipelineError;

#[derive(Debug, Clone)]
pub struct RejectionEntry {
    pub source_name: String,
    pub record_key: String,
    pub reason_code: String,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct CollisionEntry {
    pub primary_identifier: String,
    pub kept_name: String,
    pub conflicting_name: String,
    pub conflicting_source: String,
}

/// Per-run diagnostic log. Parallel stages keep their own instance and the
/// shards are merged at a join point, so no lock is shared across workers.
#[derive(Debug, Default)]
pub struct RunReport {
    pub rejections: Vec<RejectionEntry>,
    pub collisions: Vec<CollisionEntry>,
}

impl RunReport {
    /// Record a recovered error. Identifier conflicts land in the collision
    /// log, everything else in the rejection log.
    pub fn log(&mut self, error: PipelineError) {
        match error {
            PipelineError::ConflictingIdentifier {
                identifier,
                kept_name,
                conflicting_name,
                conflicting_source,
            } => {
                self.collisions.push(CollisionEntry {
                    primary_identifier: identifier,
                    kept_name,
                    conflicting_name,
                    conflicting_source,
                });
            }
            other => {
                let reason_code = other.reason_code();
                let (source_name, record_key) = match &other {
                    PipelineError::MalformedRecord {
                        source_name,
                        record_key,
                        ..
                    }
                    | PipelineError::AmbiguousLink {
                        source_name,
                        record_key,
                        ..
                    } => (source_name.clone(), record_key.clone()),
                    PipelineError::Configuration { config_path, .. } => {
                        ("config".to_string(), config_path.clone())
                    }
                    PipelineError::ConflictingIdentifier { .. } => unreachable!(),
                };
                self.rejections.push(RejectionEntry {
                    source_name,
                    record_key,
                    reason_code: reason_code.to_string(),
                    detail: other.to_string(),
                });
            }
        }
    }

    pub fn merge(&mut self, other: RunReport) {
        self.rejections.extend(other.rejections);
        self.collisions.extend(other.collisions);
    }

    pub fn write_csv(&self, output_csv: &Path) -> Result<()> {
        if let Some(parent) = output_csv.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed creating {}", parent.display()))?;
        }

        let file_name = output_csv
            .file_name()
            .and_then(|x| x.to_str())
            .unwrap_or("rejection_report.csv");
        let tmp_path = output_csv.with_file_name(format!("{file_name}.tmp"));

        let mut writer = Writer::from_path(&tmp_path)
            .with_context(|| format!("Failed creating rejection report {}", tmp_path.display()))?;
        writer
            .write_record(["kind", "source_name", "record_key", "reason_code", "detail"])
            .context("Failed writing rejection report header")?;

        for entry in &self.rejections {
            writer
                .write_record([
                    "rejection",
                    entry.source_name.as_str(),
                    entry.record_key.as_str(),
                    entry.reason_code.as_str(),
                    entry.detail.as_str(),
                ])
                .context("Failed writing rejection row")?;
        }
        for entry in &self.collisions {
            writer
                .write_record([
                    "collision",
                    entry.conflicting_source.as_str(),
                    entry.primary_identifier.as_str(),
                    "conflicting_identifier",
                    &format!(
                        "kept '{}', conflicting '{}'",
                        entry.kept_name, entry.conflicting_name
                    ),
                ])
                .context("Failed writing collision row")?;
        }

        writer.flush().context("Failed flushing rejection report")?;
        fs::rename(&tmp_path, output_csv).with_context(|| {
            format!(
                "Failed moving rejection report {} to {}",
                tmp_path.display(),
                output_csv.display()
            )
        })?;
        Ok(())
    }
}

/// Counters surfaced in the end-of-run summary table.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub identity_records_read: usize,
    pub individuals_discarded: usize,
    pub organizations_created: usize,
    pub organizations_from_hash: usize,
    pub metric_records_read: usize,
    pub linked_exact_id: usize,
    pub linked_crosswalk: usize,
    pub linked_fuzzy: usize,
    pub records_rejected: usize,
    pub collisions_detected: usize,
    pub networks_materialized: usize,
}

pub fn print_run_summary(summary: &RunSummary) {
    let use_color = std::io::stdout().is_terminal();
    let reset = if use_color { "\x1b[0m" } else { "" };
    let bold = if use_color { "\x1b[1m" } else { "" };
    let cyan = if use_color { "\x1b[36m" } else { "" };
    let green = if use_color { "\x1b[32m" } else { "" };
    let yellow = if use_color { "\x1b[33m" } else { "" };

    let border = "+--------------------------------------------+--------------------------+";
    let section = "| FIT-SCORE PIPELINE RUN SUMMARY             |                          |";

    let plain = |label: &str, value: usize| {
        println!("| {:<42} | {:<24} |", label, format_count(value));
    };
    let colored = |label: &str, value: usize, color: &str| {
        println!(
            "| {:<42} | {}{:<24}{} |",
            label,
            color,
            format_count(value),
            reset
        );
    };

    println!();
    println!("{bold}{cyan}{border}{reset}");
    println!("{bold}{cyan}{section}{reset}");
    println!("{bold}{cyan}{border}{reset}");
    plain("Identity records read", summary.identity_records_read);
    plain("Individual records discarded", summary.individuals_discarded);
    colored("Organizations created", summary.organizations_created, green);
    plain("  of which hash-keyed (no registry id)", summary.organizations_from_hash);
    plain("Metric records read", summary.metric_records_read);
    colored("Linked via exact id", summary.linked_exact_id, green);
    colored("Linked via crosswalk", summary.linked_crosswalk, green);
    colored("Linked via fuzzy name match", summary.linked_fuzzy, green);
    colored("Records rejected", summary.records_rejected, yellow);
    colored("Identifier collisions", summary.collisions_detected, yellow);
    plain("Networks materialized", summary.networks_materialized);
    println!("{bold}{cyan}{border}{reset}");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_round_trips_through_csv() {
        let mut report = RunReport::default();
        report.log(PipelineError::MalformedRecord {
            source_name: "claims".to_string(),
            record_key: "row#9".to_string(),
            reason: "empty name".to_string(),
        });
        report.log(PipelineError::ConflictingIdentifier {
            identifier: "1234567893".to_string(),
            kept_name: "Example Health".to_string(),
            conflicting_name: "Example Wellness".to_string(),
            conflicting_source: "state_roster".to_string(),
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rejections.csv");
        report.write_csv(&path).expect("write");

        let mut reader = csv::Reader::from_path(&path).expect("open");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.expect("row")).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "rejection");
        assert_eq!(&rows[0][3], "malformed_record");
        assert_eq!(&rows[1][0], "collision");
        assert_eq!(&rows[1][2], "1234567893");
    }

    #[test]
    fn merge_combines_shard_logs() {
        let ambiguous = |key: &str| PipelineError::AmbiguousLink {
            source_name: "claims".to_string(),
            record_key: key.to_string(),
            detail: "tied candidates".to_string(),
        };
        let mut a = RunReport::default();
        a.log(ambiguous("k1"));
        let mut b = RunReport::default();
        b.log(ambiguous("k2"));
        a.merge(b);
        assert_eq!(a.rejections.len(), 2);
    }
}
