//! Declarative run configuration: the hierarchy-of-truth priority table and
//! the scoring rule table. Both are hand-edited JSON, versioned alongside the
//! scoring ruleset, and validated in full before any input record is read.
//! A dangling metric or source reference is a broken deployment, so it fails
//! the run at startup rather than surfacing mid-pipeline.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

use crate::errors::PipelineError;

/// Confidence tier declared per source and carried onto resolved metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Verified,
    Derived,
    Estimated,
    Missing,
}

impl ConfidenceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceTier::Verified => "verified",
            ConfidenceTier::Derived => "derived",
            ConfidenceTier::Estimated => "estimated",
            ConfidenceTier::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub tier: ConfidenceTier,
    /// Fixed multiplier applied to this source's raw values before they enter
    /// candidacy (e.g. claims revenue x3.0 approximating total revenue). The
    /// number is owned by this config, not by the aggregator.
    #[serde(default)]
    pub value_multiplier: Option<f64>,
}

/// Hierarchy-of-truth table: per metric, the source names in authority order
/// (first entry is the most authoritative).
#[derive(Debug, Clone, Deserialize)]
pub struct PriorityConfig {
    pub version: String,
    pub sources: BTreeMap<String, SourceSpec>,
    pub metrics: BTreeMap<String, Vec<String>>,
}

impl PriorityConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed reading priority config {}", path.display()))?;
        let config: PriorityConfig = serde_json::from_str(&text).map_err(|err| {
            PipelineError::Configuration {
                config_path: path.display().to_string(),
                reason: format!("invalid JSON: {err}"),
            }
        })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let fail = |reason: String| PipelineError::Configuration {
            config_path: path.display().to_string(),
            reason,
        };

        if self.metrics.is_empty() {
            return Err(fail("no metrics declared".to_string()).into());
        }
        for (metric, source_order) in &self.metrics {
            if source_order.is_empty() {
                return Err(fail(format!("metric '{metric}' has an empty source list")).into());
            }
            for source in source_order {
                if !self.sources.contains_key(source) {
                    return Err(fail(format!(
                        "metric '{metric}' references undeclared source '{source}'"
                    ))
                    .into());
                }
            }
            let mut seen = source_order.clone();
            seen.sort();
            seen.dedup();
            if seen.len() != source_order.len() {
                return Err(fail(format!(
                    "metric '{metric}' lists the same source more than once"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Authority rank for a source within a metric's hierarchy; 0 is most
    /// authoritative. `None` when the source does not contribute this metric.
    pub fn rank_of(&self, metric_name: &str, source_name: &str) -> Option<usize> {
        self.metrics
            .get(metric_name)?
            .iter()
            .position(|s| s == source_name)
    }

    pub fn tier_of(&self, source_name: &str) -> Option<ConfidenceTier> {
        self.sources.get(source_name).map(|spec| spec.tier)
    }

    pub fn multiplier_of(&self, source_name: &str) -> f64 {
        self.sources
            .get(source_name)
            .and_then(|spec| spec.value_multiplier)
            .unwrap_or(1.0)
    }

    pub fn knows_metric(&self, metric_name: &str) -> bool {
        self.metrics.contains_key(metric_name)
    }

    pub fn knows_source(&self, source_name: &str) -> bool {
        self.sources.contains_key(source_name)
    }
}

/// One scoring band: the first band (in config order) whose bounds contain
/// the input value supplies the base points.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreBand {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    pub points: f64,
    pub label: String,
}

impl ScoreBand {
    pub fn contains(&self, value: f64) -> bool {
        if let Some(min) = self.min {
            if value < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if value >= max {
                return false;
            }
        }
        true
    }
}

/// Continuous percentile modifier layered on top of the discrete bands so the
/// score distribution keeps enough spread to rank organizations (fixed-bucket
/// rules alone collapse large equivalence classes onto identical scores).
#[derive(Debug, Clone, Deserialize)]
pub struct ModifierRule {
    pub metric: String,
    pub max_points: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub ceiling: f64,
    pub base_metric: String,
    pub bands: Vec<ScoreBand>,
    #[serde(default)]
    pub modifier: Option<ModifierRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TierBoundary {
    pub tier: u8,
    pub min_score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringRules {
    pub max_total_score: f64,
    /// Descending score floors; the first boundary at or below the total
    /// score assigns the tier.
    pub tier_boundaries: Vec<TierBoundary>,
    pub categories: Vec<CategoryRule>,
}

impl ScoringRules {
    pub fn load(path: &Path, priority: &PriorityConfig) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed reading scoring rules {}", path.display()))?;
        let rules: ScoringRules = serde_json::from_str(&text).map_err(|err| {
            PipelineError::Configuration {
                config_path: path.display().to_string(),
                reason: format!("invalid JSON: {err}"),
            }
        })?;
        rules.validate(path, priority)?;
        Ok(rules)
    }

    fn validate(&self, path: &Path, priority: &PriorityConfig) -> Result<()> {
        let fail = |reason: String| PipelineError::Configuration {
            config_path: path.display().to_string(),
            reason,
        };

        if self.categories.is_empty() {
            return Err(fail("no scoring categories declared".to_string()).into());
        }
        if self.max_total_score <= 0.0 {
            return Err(fail("max_total_score must be positive".to_string()).into());
        }

        let mut names: Vec<&str> = self.categories.iter().map(|c| c.name.as_str()).collect();
        names.sort();
        names.dedup();
        if names.len() != self.categories.len() {
            return Err(fail("duplicate category names".to_string()).into());
        }

        for category in &self.categories {
            if category.ceiling <= 0.0 {
                return Err(fail(format!(
                    "category '{}' must have a positive ceiling",
                    category.name
                ))
                .into());
            }
            if category.bands.is_empty() {
                return Err(fail(format!("category '{}' has no bands", category.name)).into());
            }
            if !priority.knows_metric(&category.base_metric) {
                return Err(fail(format!(
                    "category '{}' references unknown metric '{}'",
                    category.name, category.base_metric
                ))
                .into());
            }
            if let Some(modifier) = &category.modifier {
                if !priority.knows_metric(&modifier.metric) {
                    return Err(fail(format!(
                        "category '{}' modifier references unknown metric '{}'",
                        category.name, modifier.metric
                    ))
                    .into());
                }
                if modifier.max_points < 0.0 {
                    return Err(fail(format!(
                        "category '{}' modifier max_points must be non-negative",
                        category.name
                    ))
                    .into());
                }
            }
        }

        if self.tier_boundaries.is_empty() {
            return Err(fail("no tier boundaries declared".to_string()).into());
        }
        for window in self.tier_boundaries.windows(2) {
            if window[1].min_score >= window[0].min_score {
                return Err(fail(
                    "tier boundaries must be in strictly descending min_score order".to_string(),
                )
                .into());
            }
        }
        if self
            .tier_boundaries
            .last()
            .map(|b| b.min_score > 0.0)
            .unwrap_or(true)
        {
            return Err(fail("last tier boundary must have min_score <= 0".to_string()).into());
        }
        Ok(())
    }

    pub fn tier_for(&self, total_score: f64) -> u8 {
        for boundary in &self.tier_boundaries {
            if total_score >= boundary.min_score {
                return boundary.tier;
            }
        }
        // unreachable given validation (last boundary floors at <= 0), but
        // scores are clamped non-negative anyway
        self.tier_boundaries.last().map(|b| b.tier).unwrap_or(0)
    }
}
