//! Deterministic rule-based scoring.
//!
//! Each category scorer reads only the resolved metrics its rule declares,
//! awards a discrete banded base plus a continuous percentile modifier, and
//! clamps itself to its configured ceiling. The engine sums categories into
//! the total, assigns the tier from configured boundaries, and emits a typed
//! bibliography entry for every point awarded and every missing input.
//! Given identical resolved metrics and ruleset version the output is
//! byte-for-byte identical: no randomness, no clocks, no unstable hashing.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::aggregate::ResolvedMetric;
use crate::config::{CategoryRule, ScoringRules};

/// One bibliography entry: either points awarded from an available input, or
/// an explicit record that a category input was missing.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BibEntry {
    Available {
        category: String,
        sources_used: Vec<String>,
        input_value: f64,
        points_awarded: f64,
        explanation: String,
    },
    Missing {
        category: String,
        metric: String,
        note: String,
    },
}

impl BibEntry {
    pub fn category(&self) -> &str {
        match self {
            BibEntry::Available { category, .. } => category,
            BibEntry::Missing { category, .. } => category,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, BibEntry::Missing { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryScore {
    pub name: String,
    pub points: f64,
    pub ceiling: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreRecord {
    pub org_id: String,
    pub total_score: f64,
    pub category_scores: Vec<CategoryScore>,
    pub tier: u8,
    pub ruleset_version: String,
    pub bibliography: Vec<BibEntry>,
}

/// Rank-based percentile tables computed once per run over the full corpus.
///
/// The continuous modifier in each category rule multiplies against the
/// percentile of an organization's metric within this table, which is what
/// keeps the score distribution spread out instead of collapsing onto the
/// handful of discrete band values.
#[derive(Debug, Default)]
pub struct PercentileTable {
    sorted_values: HashMap<String, Vec<f64>>,
}

impl PercentileTable {
    pub fn build<'a>(
        resolved_per_org: impl Iterator<Item = &'a BTreeMap<String, ResolvedMetric>>,
    ) -> Self {
        let mut values: HashMap<String, Vec<f64>> = HashMap::new();
        for resolved in resolved_per_org {
            for (metric_name, metric) in resolved {
                if let Some(value) = metric.value {
                    if value.is_finite() {
                        values.entry(metric_name.clone()).or_default().push(value);
                    }
                }
            }
        }
        for sorted in values.values_mut() {
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        }
        Self {
            sorted_values: values,
        }
    }

    /// Mid-rank percentile of `value` among the corpus values for `metric`,
    /// in [0, 1]. `None` when the corpus has no values for the metric.
    pub fn percentile(&self, metric_name: &str, value: f64) -> Option<f64> {
        let sorted = self.sorted_values.get(metric_name)?;
        if sorted.is_empty() {
            return None;
        }
        let below = sorted.partition_point(|v| *v < value);
        let at_or_below = sorted.partition_point(|v| *v <= value);
        Some((below + at_or_below) as f64 / (2.0 * sorted.len() as f64))
    }
}

fn score_category(
    rule: &CategoryRule,
    resolved: &BTreeMap<String, ResolvedMetric>,
    percentiles: &PercentileTable,
) -> (f64, Vec<BibEntry>) {
    let mut entries = Vec::new();
    let mut points = 0.0f64;

    let base = resolved.get(&rule.base_metric).filter(|m| !m.is_missing());
    match base {
        Some(metric) => {
            let value = metric.value.unwrap_or_default();
            if let Some(band) = rule.bands.iter().find(|band| band.contains(value)) {
                points += band.points;
                entries.push(BibEntry::Available {
                    category: rule.name.clone(),
                    sources_used: metric.winning_source.iter().cloned().collect(),
                    input_value: value,
                    points_awarded: band.points,
                    explanation: format!(
                        "{} {} fell in band '{}' ({} tier input)",
                        rule.base_metric,
                        value,
                        band.label,
                        metric.confidence_tier.as_str()
                    ),
                });
            } else {
                entries.push(BibEntry::Missing {
                    category: rule.name.clone(),
                    metric: rule.base_metric.clone(),
                    note: format!("value {value} matched no configured band"),
                });
            }
        }
        None => {
            entries.push(BibEntry::Missing {
                category: rule.name.clone(),
                metric: rule.base_metric.clone(),
                note: "no resolved value from any source".to_string(),
            });
        }
    }

    if let Some(modifier) = &rule.modifier {
        let input = resolved.get(&modifier.metric).filter(|m| !m.is_missing());
        match input {
            Some(metric) => {
                let value = metric.value.unwrap_or_default();
                if let Some(percentile) = percentiles.percentile(&modifier.metric, value) {
                    let awarded = percentile * modifier.max_points;
                    points += awarded;
                    entries.push(BibEntry::Available {
                        category: rule.name.clone(),
                        sources_used: metric.winning_source.iter().cloned().collect(),
                        input_value: value,
                        points_awarded: awarded,
                        explanation: format!(
                            "{} at corpus percentile {:.3} x {} modifier points",
                            modifier.metric, percentile, modifier.max_points
                        ),
                    });
                }
            }
            None => {
                entries.push(BibEntry::Missing {
                    category: rule.name.clone(),
                    metric: modifier.metric.clone(),
                    note: "modifier input missing; no modifier points".to_string(),
                });
            }
        }
    }

    (points.clamp(0.0, rule.ceiling), entries)
}

/// Score one organization from its resolved metrics.
pub fn score_organization(
    org_id: &str,
    resolved: &BTreeMap<String, ResolvedMetric>,
    rules: &ScoringRules,
    percentiles: &PercentileTable,
    ruleset_version: &str,
) -> ScoreRecord {
    let mut category_scores = Vec::with_capacity(rules.categories.len());
    let mut bibliography = Vec::new();
    let mut raw_total = 0.0f64;

    for rule in &rules.categories {
        let (points, entries) = score_category(rule, resolved, percentiles);
        raw_total += points;
        category_scores.push(CategoryScore {
            name: rule.name.clone(),
            points,
            ceiling: rule.ceiling,
        });
        bibliography.extend(entries);
    }

    let total_score = raw_total.clamp(0.0, rules.max_total_score);
    let tier = rules.tier_for(total_score);

    ScoreRecord {
        org_id: org_id.to_string(),
        total_score,
        category_scores,
        tier,
        ruleset_version: ruleset_version.to_string(),
        bibliography,
    }
}
