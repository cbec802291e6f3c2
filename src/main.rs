mod aggregate;
mod args;
mod attach;
mod common;
mod config;
mod constants;
mod errors;
mod fuzzy;
mod linker;
mod network;
mod normalize;
mod output;
mod records;
mod report;
mod score;
mod spine;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::MultiProgress;
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use aggregate::{MetricValue, ResolvedMetric, resolve_all};
use args::Args;
use attach::attach_metric_records;
use common::{format_count, install_ctrlc_handler, new_run_id, project_root};
use config::{PriorityConfig, ScoringRules};
use constants::{DEFAULT_PRIORITY_CONFIG, DEFAULT_SCORING_RULES};
use linker::CrosswalkTable;
use network::{group_networks, membership_index};
use records::{load_crosswalk_rows, load_identity_records, load_metric_records};
use report::{RunReport, RunSummary, print_run_summary};
use score::{PercentileTable, ScoreRecord, score_organization};
use spine::{SpineBuildResult, absorb_parked, build_spine};

fn source_name_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|x| x.to_str())
        .unwrap_or("unknown_source")
        .to_string()
}

/// Interrupted-run exit: the rejection report is still written (it is this
/// run's paper trail), but no data tables are published.
fn abort_without_publish(report: &RunReport, rejection_report_csv: &Path) -> Result<()> {
    report.write_csv(rejection_report_csv)?;
    eprintln!(
        "Run interrupted. Wrote {} and left previous outputs untouched.",
        rejection_report_csv.display()
    );
    bail!("interrupted before outputs were published");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let run_id = new_run_id();
    let started = std::time::Instant::now();

    let project_dir = project_root();
    let priority_config_path = args
        .priority_config
        .clone()
        .unwrap_or_else(|| project_dir.join(DEFAULT_PRIORITY_CONFIG));
    let scoring_rules_path = args
        .scoring_rules
        .clone()
        .unwrap_or_else(|| project_dir.join(DEFAULT_SCORING_RULES));
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| project_dir.join("data").join("output"));

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(Arc::clone(&shutdown_requested));

    // Config problems are fatal before any input record is touched.
    let priority = Arc::new(PriorityConfig::load(&priority_config_path)?);
    let rules = Arc::new(ScoringRules::load(&scoring_rules_path, &priority)?);
    println!(
        "[{run_id}] Loaded priority config '{}' ({} sources, {} metrics) and {} scoring categories (ruleset {})",
        priority.version,
        priority.sources.len(),
        priority.metrics.len(),
        rules.categories.len(),
        args.ruleset_version
    );

    let rejection_report_csv = args
        .rejection_report_csv
        .clone()
        .unwrap_or_else(|| output_dir.join("rejection_report.csv"));

    let mut summary = RunSummary::default();
    let mut report = RunReport::default();

    // Identity registries, in argument order: the first file seeds canonical
    // attributes, later files only fill gaps or fold in as linked records.
    let mut identity_records = Vec::new();
    for path in &args.registry {
        let source_name = source_name_of(path);
        let mut loaded = load_identity_records(path, &source_name)?;
        println!(
            "Read {} identity records from {} (source '{source_name}')",
            format_count(loaded.len()),
            path.display()
        );
        identity_records.append(&mut loaded);
    }
    summary.identity_records_read = identity_records.len();

    let SpineBuildResult {
        mut spine,
        parked,
        individuals_discarded,
    } = build_spine(&identity_records, &mut report);
    summary.individuals_discarded = individuals_discarded;
    let fuzzy_absorbed = absorb_parked(&mut spine, &parked, &mut report);
    summary.organizations_created = spine.len();
    summary.organizations_from_hash = spine
        .organizations
        .iter()
        .filter(|org| org.primary_identifier.is_none())
        .count();
    println!(
        "Spine holds {} organizations ({} hash-keyed without a registry id; {} parked records folded in via fuzzy match)",
        format_count(spine.len()),
        format_count(summary.organizations_from_hash),
        format_count(fuzzy_absorbed)
    );
    drop(identity_records);

    let crosswalk = match &args.crosswalk {
        Some(path) => {
            let table = CrosswalkTable::from_rows(load_crosswalk_rows(path)?);
            println!(
                "Loaded crosswalk with {} foreign keys from {}",
                format_count(table.len()),
                path.display()
            );
            table
        }
        None => CrosswalkTable::default(),
    };

    let mut metric_records = Vec::new();
    for path in &args.metrics {
        let mut loaded = load_metric_records(path)?;
        println!(
            "Read {} metric records from {}",
            format_count(loaded.len()),
            path.display()
        );
        metric_records.append(&mut loaded);
    }
    summary.metric_records_read = metric_records.len();

    if shutdown_requested.load(Ordering::SeqCst) {
        return abort_without_publish(&report, &rejection_report_csv);
    }

    let progress_hub = MultiProgress::new();
    let attach_outcome = attach_metric_records(
        metric_records,
        &spine,
        &crosswalk,
        &priority,
        &shutdown_requested,
        &progress_hub,
        args.concurrency,
    )
    .await?;
    summary.linked_exact_id = attach_outcome.linked_exact;
    summary.linked_crosswalk = attach_outcome.linked_crosswalk;
    summary.linked_fuzzy = attach_outcome.linked_fuzzy;
    report.merge(attach_outcome.report);

    if attach_outcome.interrupted || shutdown_requested.load(Ordering::SeqCst) {
        summary.records_rejected = report.rejections.len();
        summary.collisions_detected = report.collisions.len();
        print_run_summary(&summary);
        return abort_without_publish(&report, &rejection_report_csv);
    }

    let mut candidates_by_org: HashMap<String, Vec<MetricValue>> = HashMap::new();
    for candidate in attach_outcome.candidates {
        candidates_by_org
            .entry(candidate.org_id.clone())
            .or_default()
            .push(candidate);
    }

    // Resolve the hierarchy of truth per organization, then score everything
    // against corpus-wide percentiles.
    let mut resolved_by_org: HashMap<String, BTreeMap<String, ResolvedMetric>> = HashMap::new();
    for org in &spine.organizations {
        let candidates = candidates_by_org
            .get(&org.org_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        resolved_by_org.insert(
            org.org_id.clone(),
            resolve_all(&org.org_id, candidates, &priority),
        );
    }
    let percentiles = Arc::new(PercentileTable::build(
        spine
            .organizations
            .iter()
            .map(|org| &resolved_by_org[&org.org_id]),
    ));
    let resolved_by_org = Arc::new(resolved_by_org);

    // Scoring is pure per organization, so chunks of the spine score on
    // blocking workers and merge by org_id.
    let chunk_size = spine.len().div_ceil(args.concurrency.max(1)).max(1);
    let mut scoring_tasks = Vec::new();
    for chunk in spine.organizations.chunks(chunk_size) {
        let org_ids: Vec<String> = chunk.iter().map(|org| org.org_id.clone()).collect();
        let resolved = Arc::clone(&resolved_by_org);
        let rules = Arc::clone(&rules);
        let percentiles = Arc::clone(&percentiles);
        let ruleset_version = args.ruleset_version.clone();
        scoring_tasks.push(tokio::task::spawn_blocking(move || {
            org_ids
                .iter()
                .map(|org_id| {
                    score_organization(
                        org_id,
                        &resolved[org_id],
                        &rules,
                        &percentiles,
                        &ruleset_version,
                    )
                })
                .collect::<Vec<ScoreRecord>>()
        }));
    }

    let mut scores_by_org: HashMap<String, ScoreRecord> = HashMap::new();
    let mut total_scores: HashMap<String, f64> = HashMap::new();
    for task in scoring_tasks {
        for record in task.await.context("scoring worker panicked")? {
            total_scores.insert(record.org_id.clone(), record.total_score);
            scores_by_org.insert(record.org_id.clone(), record);
        }
    }
    println!(
        "Scored {} organizations against ruleset {}",
        format_count(scores_by_org.len()),
        args.ruleset_version
    );

    let networks = group_networks(&spine.organizations, &total_scores);
    summary.networks_materialized = networks.len();
    let memberships = membership_index(&networks);

    summary.records_rejected = report.rejections.len();
    summary.collisions_detected = report.collisions.len();

    if shutdown_requested.load(Ordering::SeqCst) {
        print_run_summary(&summary);
        return abort_without_publish(&report, &rejection_report_csv);
    }

    let (organizations_csv, organizations_parquet) = output::write_organization_tables(
        &output_dir,
        &spine.organizations,
        &resolved_by_org,
        &scores_by_org,
        &memberships,
        &priority,
        &rules,
    )?;
    let networks_csv = output::write_network_table(&output_dir, &networks)?;
    report
        .write_csv(&rejection_report_csv)
        .context("Failed writing rejection report")?;

    print_run_summary(&summary);
    for path in [
        &organizations_csv,
        &organizations_parquet,
        &networks_csv,
        &rejection_report_csv,
    ] {
        println!("Wrote {}", path.display());
    }
    println!(
        "[{run_id}] Done in {:.1}s",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
