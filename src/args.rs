use clap::Parser;

use crate::constants::DEFAULT_RULESET_VERSION;

#[derive(Debug, Parser)]
#[command(name = "build_fit_scores")]
#[command(
    about = "Resolve healthcare organizations across sources, aggregate their metrics, and emit explainable fit scores"
)]
pub struct Args {
    /// Identity registry input (.csv or .parquet). Repeatable; the first file
    /// is the most authoritative and seeds the spine, later files fill gaps.
    ///
    /// The file stem is used as the source name in diagnostics.
    #[arg(long, required = true)]
    pub registry: Vec<std::path::PathBuf>,

    /// Metric source input (.csv or .parquet). Repeatable.
    ///
    /// Expected columns: source_name, metric_name, value, and at least one of
    /// primary_identifier / foreign_key / org_name+state_code for linking.
    #[arg(long, required = true)]
    pub metrics: Vec<std::path::PathBuf>,

    /// Crosswalk CSV mapping foreign keys to registry identifiers.
    ///
    /// Expected columns: foreign_key, primary_identifier. One foreign key may
    /// map to several identifiers.
    #[arg(long)]
    pub crosswalk: Option<std::path::PathBuf>,

    /// Hierarchy-of-truth config JSON: source tiers, multipliers, and the
    /// per-metric source priority order. Defaults to config/priority.json.
    #[arg(long)]
    pub priority_config: Option<std::path::PathBuf>,

    /// Scoring ruleset JSON: categories, bands, modifiers, tier boundaries.
    /// Defaults to config/scoring_rules.json.
    #[arg(long)]
    pub scoring_rules: Option<std::path::PathBuf>,

    /// Output directory for the scored organization and network tables.
    /// Defaults to data/output.
    #[arg(long)]
    pub output_dir: Option<std::path::PathBuf>,

    /// Rejection/collision report CSV path. Defaults to
    /// <output-dir>/rejection_report.csv.
    #[arg(long)]
    pub rejection_report_csv: Option<std::path::PathBuf>,

    /// Ruleset version stamped into every score record.
    #[arg(long, default_value = DEFAULT_RULESET_VERSION)]
    pub ruleset_version: String,

    /// Max fuzzy-match state shards processed concurrently.
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,
}
