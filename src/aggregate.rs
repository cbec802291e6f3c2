//! Hierarchy-of-truth aggregation: per (organization, metric), selects one
//! resolved value from all contributing sources.
//!
//! Resolution is a pure function of the candidate set and the priority table.
//! Candidate order never affects the winner: the comparison key is
//! (priority rank, link-method authority, as-of period, source name, value),
//! so a shuffled input always resolves identically.

use std::collections::BTreeMap;

use crate::config::{ConfidenceTier, PriorityConfig};
use crate::linker::LinkMethod;

/// One source's contribution to a metric, after linking.
#[derive(Debug, Clone)]
pub struct MetricValue {
    pub org_id: String,
    pub metric_name: String,
    pub source_name: String,
    /// Position in this metric's hierarchy of truth; lower is more
    /// authoritative.
    pub source_priority_rank: usize,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub as_of_period: Option<String>,
    pub link_method: LinkMethod,
    pub link_confidence: f64,
}

/// The single chosen value for a (organization, metric) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetric {
    pub org_id: String,
    pub metric_name: String,
    pub value: Option<f64>,
    pub winning_source: Option<String>,
    pub confidence_tier: ConfidenceTier,
}

impl ResolvedMetric {
    pub fn missing(org_id: &str, metric_name: &str) -> Self {
        Self {
            org_id: org_id.to_string(),
            metric_name: metric_name.to_string(),
            value: None,
            winning_source: None,
            confidence_tier: ConfidenceTier::Missing,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }
}

/// Total order over candidates; the minimum wins. Ranks come first, then the
/// exact_id > crosswalk > fuzzy tie-break, then stable attribute tie-breaks
/// so equal-rank candidates from the same source resolve identically
/// regardless of input order (newest as-of period preferred).
fn candidate_key(candidate: &MetricValue) -> (usize, u8, std::cmp::Reverse<String>, String, u64) {
    (
        candidate.source_priority_rank,
        candidate.link_method.authority(),
        std::cmp::Reverse(candidate.as_of_period.clone().unwrap_or_default()),
        candidate.source_name.clone(),
        candidate.value.unwrap_or_default().to_bits(),
    )
}

/// Resolve one metric for one organization.
///
/// Null-valued candidates are excluded from candidacy (a missing figure is
/// never a zero). With no usable candidates the result carries `value=None`
/// and the `missing` tier, which downstream scoring treats distinctly from a
/// legitimate zero.
pub fn resolve(
    metric_name: &str,
    org_id: &str,
    candidates: &[MetricValue],
    priority: &PriorityConfig,
) -> ResolvedMetric {
    let winner = candidates
        .iter()
        .filter(|c| c.metric_name == metric_name && c.value.is_some())
        .min_by_key(|c| candidate_key(c));

    let Some(winner) = winner else {
        return ResolvedMetric::missing(org_id, metric_name);
    };

    let declared = priority
        .tier_of(&winner.source_name)
        .unwrap_or(ConfidenceTier::Estimated);
    // Fuzzy-linked contributions are never "verified", whatever the source
    // declares.
    let confidence_tier = if winner.link_method == LinkMethod::Fuzzy {
        declared.max(ConfidenceTier::Derived)
    } else {
        declared
    };

    ResolvedMetric {
        org_id: org_id.to_string(),
        metric_name: metric_name.to_string(),
        value: winner.value,
        winning_source: Some(winner.source_name.clone()),
        confidence_tier,
    }
}

/// Resolve every metric the priority table declares for one organization.
/// Metrics with no candidates are present in the output as `missing`, so the
/// scoring engine always sees the full metric map.
pub fn resolve_all(
    org_id: &str,
    candidates: &[MetricValue],
    priority: &PriorityConfig,
) -> BTreeMap<String, ResolvedMetric> {
    priority
        .metrics
        .keys()
        .map(|metric_name| {
            (
                metric_name.clone(),
                resolve(metric_name, org_id, candidates, priority),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priority() -> PriorityConfig {
        serde_json::from_str(
            r#"{
                "version": "truth-test",
                "sources": {
                    "cost_report": {"tier": "verified"},
                    "claims_estimate": {"tier": "derived", "value_multiplier": 3.0},
                    "population_estimate": {"tier": "estimated"}
                },
                "metrics": {
                    "revenue": ["cost_report", "claims_estimate", "population_estimate"],
                    "patient_volume": ["claims_estimate"]
                }
            }"#,
        )
        .expect("test priority config")
    }

    fn candidate(
        metric: &str,
        source: &str,
        rank: usize,
        value: Option<f64>,
        method: LinkMethod,
    ) -> MetricValue {
        MetricValue {
            org_id: "org_1234567890".to_string(),
            metric_name: metric.to_string(),
            source_name: source.to_string(),
            source_priority_rank: rank,
            value,
            unit: Some("usd".to_string()),
            as_of_period: Some("2025".to_string()),
            link_method: method,
            link_confidence: 1.0,
        }
    }

    #[test]
    fn lowest_rank_wins() {
        let candidates = vec![
            candidate("revenue", "claims_estimate", 1, Some(8_000_000.0), LinkMethod::ExactId),
            candidate("revenue", "cost_report", 0, Some(5_000_000.0), LinkMethod::Crosswalk),
        ];
        let resolved = resolve("revenue", "org_1234567890", &candidates, &priority());
        assert_eq!(resolved.value, Some(5_000_000.0));
        assert_eq!(resolved.winning_source.as_deref(), Some("cost_report"));
        assert_eq!(resolved.confidence_tier, ConfidenceTier::Verified);
    }

    #[test]
    fn resolution_is_order_independent() {
        let mut candidates = vec![
            candidate("revenue", "cost_report", 0, Some(5_000_000.0), LinkMethod::Crosswalk),
            candidate("revenue", "claims_estimate", 1, Some(8_000_000.0), LinkMethod::ExactId),
            candidate("revenue", "population_estimate", 2, Some(2_000_000.0), LinkMethod::Fuzzy),
        ];
        let expected = resolve("revenue", "org_1234567890", &candidates, &priority());

        // every rotation of the candidate list resolves identically
        for _ in 0..candidates.len() {
            candidates.rotate_left(1);
            let resolved = resolve("revenue", "org_1234567890", &candidates, &priority());
            assert_eq!(resolved, expected);
        }
        candidates.reverse();
        assert_eq!(
            resolve("revenue", "org_1234567890", &candidates, &priority()),
            expected
        );
    }

    #[test]
    fn null_values_are_excluded_not_zero() {
        let candidates = vec![
            candidate("revenue", "cost_report", 0, None, LinkMethod::ExactId),
            candidate("revenue", "claims_estimate", 1, Some(8_000_000.0), LinkMethod::ExactId),
        ];
        let resolved = resolve("revenue", "org_1234567890", &candidates, &priority());
        assert_eq!(resolved.value, Some(8_000_000.0));
        assert_eq!(resolved.winning_source.as_deref(), Some("claims_estimate"));
    }

    #[test]
    fn equal_rank_ties_break_on_link_method() {
        let candidates = vec![
            candidate("revenue", "cost_report", 0, Some(4_000_000.0), LinkMethod::Fuzzy),
            candidate("revenue", "cost_report", 0, Some(5_000_000.0), LinkMethod::ExactId),
            candidate("revenue", "cost_report", 0, Some(6_000_000.0), LinkMethod::Crosswalk),
        ];
        let resolved = resolve("revenue", "org_1234567890", &candidates, &priority());
        assert_eq!(resolved.value, Some(5_000_000.0));
    }

    #[test]
    fn fuzzy_winner_is_never_verified() {
        let candidates = vec![candidate(
            "revenue",
            "cost_report",
            0,
            Some(5_000_000.0),
            LinkMethod::Fuzzy,
        )];
        let resolved = resolve("revenue", "org_1234567890", &candidates, &priority());
        assert_eq!(resolved.confidence_tier, ConfidenceTier::Derived);
    }

    #[test]
    fn no_candidates_yields_missing_tier() {
        let resolved = resolve("revenue", "org_1234567890", &[], &priority());
        assert!(resolved.is_missing());
        assert_eq!(resolved.confidence_tier, ConfidenceTier::Missing);
        assert_eq!(resolved.winning_source, None);
    }

    #[test]
    fn resolve_all_covers_every_declared_metric() {
        let candidates = vec![candidate(
            "revenue",
            "cost_report",
            0,
            Some(5_000_000.0),
            LinkMethod::ExactId,
        )];
        let resolved = resolve_all("org_1234567890", &candidates, &priority());
        assert_eq!(resolved.len(), 2);
        assert!(!resolved["revenue"].is_missing());
        assert!(resolved["patient_volume"].is_missing());
    }
}
