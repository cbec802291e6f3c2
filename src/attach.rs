//! Attaching metric-source records to the spine.
//!
//! Link order per record: exact registry identifier, then crosswalk, then the
//! per-state fuzzy fallback. Exact and crosswalk linking is a cheap
//! sequential pass; fuzzy work is sharded by state and runs on blocking
//! worker threads, each shard appending to its own diagnostic log. Shards
//! merge in sorted state order so reruns produce identical output.

use anyhow::{Context, Result};
use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::aggregate::MetricValue;
use crate::config::PriorityConfig;
use crate::errors::PipelineError;
use crate::fuzzy::FuzzyIndex;
use crate::linker::{CrosswalkTable, LinkMethod};
use crate::normalize::{normalize_name, normalize_state};
use crate::records::MetricSourceRecord;
use crate::report::RunReport;
use crate::spine::Spine;

#[derive(Debug, Default)]
pub struct AttachOutcome {
    pub candidates: Vec<MetricValue>,
    pub linked_exact: usize,
    pub linked_crosswalk: usize,
    pub linked_fuzzy: usize,
    pub report: RunReport,
    pub interrupted: bool,
}

fn candidate_from(
    record: &MetricSourceRecord,
    org_id: &str,
    rank: usize,
    method: LinkMethod,
    confidence: f64,
    priority: &PriorityConfig,
) -> MetricValue {
    // Source multipliers (e.g. claims revenue x3.0) are owned by the priority
    // config and applied at candidacy, so the aggregator stays a pure
    // selection function.
    let multiplier = priority.multiplier_of(&record.source_name);
    MetricValue {
        org_id: org_id.to_string(),
        metric_name: record.metric_name.clone(),
        source_name: record.source_name.clone(),
        source_priority_rank: rank,
        value: record.value.map(|v| v * multiplier),
        unit: record.unit.clone(),
        as_of_period: record.as_of_period.clone(),
        link_method: method,
        link_confidence: confidence,
    }
}

struct FuzzyShardResult {
    state_code: String,
    candidates: Vec<MetricValue>,
    report: RunReport,
    linked: usize,
}

fn run_fuzzy_shard(
    state_code: String,
    records: Vec<MetricSourceRecord>,
    index: Arc<FuzzyIndex>,
    org_ids: Arc<Vec<String>>,
    priority: Arc<PriorityConfig>,
    shutdown_requested: Arc<AtomicBool>,
    progress: ProgressBar,
) -> FuzzyShardResult {
    let mut candidates = Vec::new();
    let mut report = RunReport::default();
    let mut linked = 0usize;

    for record in records {
        if shutdown_requested.load(Ordering::SeqCst) {
            break;
        }
        let name = record.org_name.as_deref().unwrap_or_default();
        let normalized = normalize_name(name);
        match index.match_name(&normalized, &state_code) {
            Some(matched) => {
                let rank = priority
                    .rank_of(&record.metric_name, &record.source_name)
                    .unwrap_or(usize::MAX);
                candidates.push(candidate_from(
                    &record,
                    &org_ids[matched.org_index],
                    rank,
                    LinkMethod::Fuzzy,
                    matched.confidence,
                    &priority,
                ));
                linked += 1;
            }
            None => {
                report.log(PipelineError::AmbiguousLink {
                    source_name: record.source_name.clone(),
                    record_key: record.record_key(),
                    detail: format!("no unique fuzzy match for '{normalized}' in {state_code}"),
                });
            }
        }
        progress.inc(1);
    }

    FuzzyShardResult {
        state_code,
        candidates,
        report,
        linked,
    }
}

pub async fn attach_metric_records(
    records: Vec<MetricSourceRecord>,
    spine: &Spine,
    crosswalk: &CrosswalkTable,
    priority: &Arc<PriorityConfig>,
    shutdown_requested: &Arc<AtomicBool>,
    progress_hub: &MultiProgress,
    concurrency: usize,
) -> Result<AttachOutcome> {
    let mut outcome = AttachOutcome::default();
    let mut fuzzy_by_state: BTreeMap<String, Vec<MetricSourceRecord>> = BTreeMap::new();

    for record in records {
        if !priority.knows_metric(&record.metric_name) {
            outcome.report.log(PipelineError::MalformedRecord {
                source_name: record.source_name.clone(),
                record_key: record.record_key(),
                reason: format!("metric '{}' not in priority table", record.metric_name),
            });
            continue;
        }
        if !priority.knows_source(&record.source_name) {
            outcome.report.log(PipelineError::MalformedRecord {
                source_name: record.source_name.clone(),
                record_key: record.record_key(),
                reason: format!("source '{}' not in priority table", record.source_name),
            });
            continue;
        }
        let Some(rank) = priority.rank_of(&record.metric_name, &record.source_name) else {
            outcome.report.log(PipelineError::MalformedRecord {
                source_name: record.source_name.clone(),
                record_key: record.record_key(),
                reason: format!(
                    "source '{}' has no rank for metric '{}'",
                    record.source_name, record.metric_name
                ),
            });
            continue;
        };

        // exact registry identifier first
        if let Some(primary_identifier) = &record.primary_identifier {
            if let Some(index) = spine.index_of_primary(primary_identifier) {
                outcome.candidates.push(candidate_from(
                    &record,
                    &spine.org(index).org_id,
                    rank,
                    LinkMethod::ExactId,
                    1.0,
                    priority,
                ));
                outcome.linked_exact += 1;
                continue;
            }
        }

        // crosswalk next; one-to-many fans out to every mapped organization
        if let Some(foreign_key) = &record.foreign_key {
            let mapped: Vec<usize> = crosswalk
                .lookup(foreign_key)
                .iter()
                .filter_map(|id| spine.index_of_primary(id))
                .collect();
            if !mapped.is_empty() {
                for index in mapped {
                    outcome.candidates.push(candidate_from(
                        &record,
                        &spine.org(index).org_id,
                        rank,
                        LinkMethod::Crosswalk,
                        1.0,
                        priority,
                    ));
                }
                outcome.linked_crosswalk += 1;
                continue;
            }
        }

        // fuzzy fallback needs a name and a state to prune candidates
        let state_code = record
            .state_code
            .as_deref()
            .map(normalize_state)
            .unwrap_or_default();
        let has_name = record
            .org_name
            .as_deref()
            .map(|n| !normalize_name(n).is_empty())
            .unwrap_or(false);
        if state_code.is_empty() || !has_name {
            outcome.report.log(PipelineError::MalformedRecord {
                source_name: record.source_name.clone(),
                record_key: record.record_key(),
                reason: "no exact key, no crosswalk entry, and no name+state for fuzzy matching"
                    .to_string(),
            });
            continue;
        }
        fuzzy_by_state.entry(state_code).or_default().push(record);
    }

    if fuzzy_by_state.is_empty() || shutdown_requested.load(Ordering::SeqCst) {
        outcome.interrupted = shutdown_requested.load(Ordering::SeqCst);
        return Ok(outcome);
    }

    let index = Arc::new(FuzzyIndex::build(
        spine
            .organizations
            .iter()
            .map(|org| (org.state_code.as_str(), org.normalized_name.as_str())),
    ));
    let org_ids: Arc<Vec<String>> = Arc::new(
        spine
            .organizations
            .iter()
            .map(|org| org.org_id.clone())
            .collect(),
    );

    let total: u64 = fuzzy_by_state.values().map(|v| v.len() as u64).sum();
    let progress = progress_hub.add(ProgressBar::new(total));
    progress.set_prefix("FUZZY");
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} {prefix:.bold} [{elapsed_precise}] [{bar:32.cyan/blue}] \
{pos}/{len} ({percent}%) {msg}",
    ) {
        progress.set_style(style.progress_chars("=> "));
    }
    progress.enable_steady_tick(Duration::from_millis(250));

    let shard_jobs: Vec<(String, Vec<MetricSourceRecord>)> = fuzzy_by_state.into_iter().collect();
    let mut in_flight = futures::stream::iter(shard_jobs)
        .map(|(state_code, shard_records)| {
            let index = Arc::clone(&index);
            let org_ids = Arc::clone(&org_ids);
            let priority = Arc::clone(priority);
            let shutdown = Arc::clone(shutdown_requested);
            let shard_progress = progress.clone();
            async move {
                tokio::task::spawn_blocking(move || {
                    run_fuzzy_shard(
                        state_code,
                        shard_records,
                        index,
                        org_ids,
                        priority,
                        shutdown,
                        shard_progress,
                    )
                })
                .await
            }
        })
        .buffer_unordered(concurrency.max(1));

    // merge shard outputs in state order for reproducible candidate/report order
    let mut shard_results: HashMap<String, FuzzyShardResult> = HashMap::new();
    while let Some(joined) = in_flight.next().await {
        let shard = joined.context("fuzzy shard worker panicked")?;
        shard_results.insert(shard.state_code.clone(), shard);
    }
    drop(in_flight);
    let mut ordered_states: Vec<String> = shard_results.keys().cloned().collect();
    ordered_states.sort();
    for state_code in ordered_states {
        let shard = shard_results
            .remove(&state_code)
            .expect("shard key from own map");
        outcome.linked_fuzzy += shard.linked;
        outcome.candidates.extend(shard.candidates);
        outcome.report.merge(shard.report);
    }

    progress.finish_with_message(format!(
        "linked {} of {} fuzzy-queued records",
        outcome.linked_fuzzy, total
    ));
    outcome.interrupted |= shutdown_requested.load(Ordering::SeqCst);
    Ok(outcome)
}
