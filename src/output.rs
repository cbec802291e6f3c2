//! Final output tables.
//!
//! The organization table is written twice, as CSV and as Parquet, from one
//! shared row assembly so the two can never drift. Everything is written to a
//! `.tmp` sibling first and renamed into place once complete; an interrupted
//! run leaves the previous outputs untouched.

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, StringBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::{basic::Compression, file::properties::WriterProperties};
use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::aggregate::ResolvedMetric;
use crate::config::{PriorityConfig, ScoringRules};
use crate::linker::LinkMethod;
use crate::network::Network;
use crate::score::ScoreRecord;
use crate::spine::Organization;

const PARQUET_BATCH_SIZE: usize = 8_192;

/// Streaming Parquet writer for all-string tables.
///
/// Every column is nullable Utf8; rows are buffered into column builders and
/// flushed as record batches, so wide tables never materialize in full.
struct StringParquetWriter {
    output_path: PathBuf,
    tmp_path: PathBuf,
    schema: Arc<Schema>,
    writer: ArrowWriter<File>,
    builders: Vec<StringBuilder>,
    rows_in_batch: usize,
}

impl StringParquetWriter {
    fn try_new(output_path: &Path, columns: &[String]) -> Result<Self> {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed creating {}", parent.display()))?;
        }
        let tmp_path = tmp_sibling(output_path);

        let fields: Vec<Field> = columns
            .iter()
            .map(|name| Field::new(name.as_str(), DataType::Utf8, true))
            .collect();
        let schema = Arc::new(Schema::new(fields));

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed creating {}", tmp_path.display()))?;
        let writer = ArrowWriter::try_new(file, Arc::clone(&schema), Some(props))
            .context("Failed creating Parquet ArrowWriter")?;

        Ok(Self {
            output_path: output_path.to_path_buf(),
            tmp_path,
            schema,
            writer,
            builders: (0..columns.len()).map(|_| StringBuilder::new()).collect(),
            rows_in_batch: 0,
        })
    }

    fn push_row(&mut self, values: &[Option<String>]) -> Result<()> {
        anyhow::ensure!(
            values.len() == self.builders.len(),
            "push_row expected {} columns, got {}",
            self.builders.len(),
            values.len()
        );
        for (builder, value) in self.builders.iter_mut().zip(values) {
            match value {
                Some(v) => builder.append_value(v),
                None => builder.append_null(),
            }
        }
        self.rows_in_batch += 1;
        if self.rows_in_batch >= PARQUET_BATCH_SIZE {
            self.flush_batch()?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.flush_batch()?;
        self.writer.close().context("Failed closing Parquet writer")?;
        fs::rename(&self.tmp_path, &self.output_path).with_context(|| {
            format!(
                "Failed moving temp parquet {} to {}",
                self.tmp_path.display(),
                self.output_path.display()
            )
        })?;
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<()> {
        if self.rows_in_batch == 0 {
            return Ok(());
        }
        let arrays: Vec<ArrayRef> = self
            .builders
            .iter_mut()
            .map(|b| Arc::new(b.finish()) as ArrayRef)
            .collect();
        let batch = RecordBatch::try_new(Arc::clone(&self.schema), arrays)
            .context("Failed creating RecordBatch for Parquet write")?;
        self.writer
            .write(&batch)
            .context("Failed writing Parquet RecordBatch")?;
        self.rows_in_batch = 0;
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("output");
    path.with_file_name(format!("{file_name}.tmp"))
}

fn format_score(value: f64) -> String {
    format!("{value:.2}")
}

fn format_metric(value: f64) -> String {
    // integers print without a trailing ".0" so counts stay readable
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Column headers for the organization table, in output order: identity
/// fields, then per-metric value/source/confidence triples in priority-table
/// order, then category and total scores, tiering, network membership, and
/// the bibliography JSON.
pub fn organization_columns(priority: &PriorityConfig, rules: &ScoringRules) -> Vec<String> {
    let mut columns: Vec<String> = [
        "org_id",
        "primary_identifier",
        "legal_name",
        "normalized_name",
        "state_code",
        "address_line",
        "city",
        "zip",
        "phone",
        "taxonomy_code",
        "segment_label",
        "site_count",
        "identity_record_count",
        "identity_link_methods",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for metric_name in priority.metrics.keys() {
        columns.push(metric_name.clone());
        columns.push(format!("{metric_name}_source"));
        columns.push(format!("{metric_name}_confidence"));
    }
    for category in &rules.categories {
        columns.push(format!("score_{}", category.name));
    }
    columns.extend(
        [
            "total_score",
            "tier",
            "ruleset_version",
            "network_id",
            "is_network_anchor",
            "bibliography",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    columns
}

fn organization_row(
    org: &Organization,
    resolved: &BTreeMap<String, ResolvedMetric>,
    score: &ScoreRecord,
    membership: Option<&(String, bool)>,
    priority: &PriorityConfig,
) -> Result<Vec<Option<String>>> {
    let mut row: Vec<Option<String>> = Vec::new();
    let present = |s: &str| {
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    };

    row.push(Some(org.org_id.clone()));
    row.push(org.primary_identifier.clone());
    row.push(present(&org.legal_name));
    row.push(present(&org.normalized_name));
    row.push(present(&org.state_code));
    row.push(present(&org.address_line));
    row.push(present(&org.city));
    row.push(present(&org.zip));
    row.push(present(&org.phone));
    row.push(present(&org.taxonomy_code));
    row.push(Some(org.segment_label.clone()));
    row.push(org.site_count.map(|n| n.to_string()));
    row.push(Some(org.linked_records.len().to_string()));
    // distinct link methods in authority order, e.g. "exact_id|fuzzy"
    let mut methods: Vec<LinkMethod> = org.linked_records.iter().map(|e| e.link_method).collect();
    methods.sort_by_key(|m| m.authority());
    methods.dedup();
    row.push(Some(
        methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join("|"),
    ));

    for metric_name in priority.metrics.keys() {
        match resolved.get(metric_name) {
            Some(metric) => {
                row.push(metric.value.map(format_metric));
                row.push(metric.winning_source.clone());
                row.push(Some(metric.confidence_tier.as_str().to_string()));
            }
            None => {
                row.push(None);
                row.push(None);
                row.push(Some("missing".to_string()));
            }
        }
    }

    for category in &score.category_scores {
        row.push(Some(format_score(category.points)));
    }
    row.push(Some(format_score(score.total_score)));
    row.push(Some(score.tier.to_string()));
    row.push(Some(score.ruleset_version.clone()));
    row.push(membership.map(|(network_id, _)| network_id.clone()));
    row.push(Some(
        membership
            .map(|(_, is_anchor)| is_anchor.to_string())
            .unwrap_or_else(|| "false".to_string()),
    ));
    row.push(Some(
        serde_json::to_string(&score.bibliography)
            .with_context(|| format!("Failed serializing bibliography for {}", org.org_id))?,
    ));
    Ok(row)
}

/// Write the organization table as both CSV and Parquet.
///
/// Rows follow spine order, so identical inputs yield byte-identical files.
pub fn write_organization_tables(
    out_dir: &Path,
    organizations: &[Organization],
    resolved_by_org: &HashMap<String, BTreeMap<String, ResolvedMetric>>,
    scores_by_org: &HashMap<String, ScoreRecord>,
    memberships: &HashMap<String, (String, bool)>,
    priority: &PriorityConfig,
    rules: &ScoringRules,
) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed creating {}", out_dir.display()))?;
    let csv_path = out_dir.join("organizations_scored.csv");
    let parquet_path = out_dir.join("organizations_scored.parquet");

    let columns = organization_columns(priority, rules);
    let csv_tmp = tmp_sibling(&csv_path);
    let mut csv_writer = csv::Writer::from_path(&csv_tmp)
        .with_context(|| format!("Failed creating {}", csv_tmp.display()))?;
    csv_writer
        .write_record(&columns)
        .context("Failed writing organization CSV header")?;
    let mut parquet_writer = StringParquetWriter::try_new(&parquet_path, &columns)?;

    let empty_metrics = BTreeMap::new();
    for org in organizations {
        let resolved = resolved_by_org.get(&org.org_id).unwrap_or(&empty_metrics);
        let score = scores_by_org
            .get(&org.org_id)
            .with_context(|| format!("No score record for {}", org.org_id))?;
        let row = organization_row(org, resolved, score, memberships.get(&org.org_id), priority)?;
        csv_writer
            .write_record(row.iter().map(|v| v.as_deref().unwrap_or_default()))
            .with_context(|| format!("Failed writing CSV row for {}", org.org_id))?;
        parquet_writer.push_row(&row)?;
    }

    csv_writer.flush().context("Failed flushing organization CSV")?;
    drop(csv_writer);
    fs::rename(&csv_tmp, &csv_path).with_context(|| {
        format!(
            "Failed moving temp csv {} to {}",
            csv_tmp.display(),
            csv_path.display()
        )
    })?;
    parquet_writer.finish()?;

    Ok((csv_path, parquet_path))
}

/// Write the network table CSV. Members are joined with `|` so the table
/// stays one row per network.
pub fn write_network_table(out_dir: &Path, networks: &[Network]) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed creating {}", out_dir.display()))?;
    let csv_path = out_dir.join("networks.csv");
    let csv_tmp = tmp_sibling(&csv_path);

    let mut writer = csv::Writer::from_path(&csv_tmp)
        .with_context(|| format!("Failed creating {}", csv_tmp.display()))?;
    writer
        .write_record([
            "network_id",
            "normalized_network_name",
            "member_count",
            "member_org_ids",
            "states",
            "anchor_org_id",
            "network_score",
        ])
        .context("Failed writing network CSV header")?;

    for network in networks {
        let states: Vec<&str> = network.state_set.iter().map(String::as_str).collect();
        writer
            .write_record([
                network.network_id.as_str(),
                network.normalized_network_name.as_str(),
                &network.member_org_ids.len().to_string(),
                &network.member_org_ids.join("|"),
                &states.join("|"),
                network.anchor_org_id.as_str(),
                &format_score(network.network_score),
            ])
            .with_context(|| format!("Failed writing network row {}", network.network_id))?;
    }

    writer.flush().context("Failed flushing network CSV")?;
    drop(writer);
    fs::rename(&csv_tmp, &csv_path).with_context(|| {
        format!(
            "Failed moving temp csv {} to {}",
            csv_tmp.display(),
            csv_path.display()
        )
    })?;
    Ok(csv_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfidenceTier;
    use crate::score::CategoryScore;

    fn priority() -> PriorityConfig {
        serde_json::from_str(
            r#"{
                "version": "truth-test",
                "sources": {"cost_report": {"tier": "verified"}},
                "metrics": {"revenue": ["cost_report"]}
            }"#,
        )
        .expect("priority")
    }

    fn rules() -> ScoringRules {
        serde_json::from_str(
            r#"{
                "max_total_score": 100.0,
                "tier_boundaries": [{"tier": 1, "min_score": 0.0}],
                "categories": [
                    {
                        "name": "strategic_value",
                        "ceiling": 100.0,
                        "base_metric": "revenue",
                        "bands": [{"points": 10.0, "label": "any"}]
                    }
                ]
            }"#,
        )
        .expect("rules")
    }

    fn organization() -> Organization {
        Organization {
            org_id: "org_1234567890".to_string(),
            primary_identifier: Some("1234567890".to_string()),
            legal_name: "Riverbend Medical Group, LLC".to_string(),
            normalized_name: "riverbend medical group".to_string(),
            state_code: "TX".to_string(),
            address_line: "100 Main St".to_string(),
            city: "Austin".to_string(),
            zip_raw: "78701-1234".to_string(),
            zip: "78701".to_string(),
            phone: "5125551234".to_string(),
            taxonomy_code: "282N00000X".to_string(),
            segment_label: "hospital".to_string(),
            site_count: Some(2),
            linked_records: Vec::new(),
        }
    }

    fn score_record() -> ScoreRecord {
        ScoreRecord {
            org_id: "org_1234567890".to_string(),
            total_score: 10.0,
            category_scores: vec![CategoryScore {
                name: "strategic_value".to_string(),
                points: 10.0,
                ceiling: 100.0,
            }],
            tier: 1,
            ruleset_version: "v-test".to_string(),
            bibliography: Vec::new(),
        }
    }

    fn resolved() -> HashMap<String, BTreeMap<String, ResolvedMetric>> {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "revenue".to_string(),
            ResolvedMetric {
                org_id: "org_1234567890".to_string(),
                metric_name: "revenue".to_string(),
                value: Some(5_000_000.0),
                winning_source: Some("cost_report".to_string()),
                confidence_tier: ConfidenceTier::Verified,
            },
        );
        let mut map = HashMap::new();
        map.insert("org_1234567890".to_string(), metrics);
        map
    }

    #[test]
    fn column_order_is_identity_metrics_scores_network() {
        let columns = organization_columns(&priority(), &rules());
        assert_eq!(columns[0], "org_id");
        let revenue = columns.iter().position(|c| c == "revenue").expect("revenue");
        assert_eq!(columns[revenue + 1], "revenue_source");
        assert_eq!(columns[revenue + 2], "revenue_confidence");
        assert!(columns.contains(&"score_strategic_value".to_string()));
        assert_eq!(columns.last().map(String::as_str), Some("bibliography"));
    }

    #[test]
    fn organization_csv_round_trips_through_the_writer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut scores = HashMap::new();
        scores.insert("org_1234567890".to_string(), score_record());

        let (csv_path, parquet_path) = write_organization_tables(
            dir.path(),
            &[organization()],
            &resolved(),
            &scores,
            &HashMap::new(),
            &priority(),
            &rules(),
        )
        .expect("write tables");

        assert!(parquet_path.exists());
        let body = fs::read_to_string(&csv_path).expect("read csv");
        let mut lines = body.lines();
        let header = lines.next().expect("header");
        let row = lines.next().expect("row");
        assert!(header.starts_with("org_id,primary_identifier"));
        assert!(row.contains("org_1234567890"));
        assert!(row.contains("5000000"));
        assert!(row.contains("cost_report"));
        assert!(row.contains("verified"));
        assert!(row.contains("10.00"));
        // no leftover tmp files after publish
        assert!(!tmp_sibling(&csv_path).exists());
        assert!(!tmp_sibling(&parquet_path).exists());
    }

    #[test]
    fn network_table_writes_one_row_per_network() {
        let dir = tempfile::tempdir().expect("tempdir");
        let network = Network {
            network_id: "net_abc".to_string(),
            normalized_network_name: "example health network".to_string(),
            member_org_ids: vec!["org_1".to_string(), "org_2".to_string()],
            state_set: ["OK".to_string(), "TX".to_string()].into_iter().collect(),
            anchor_org_id: "org_2".to_string(),
            network_score: 55.5,
        };
        let path = write_network_table(dir.path(), &[network]).expect("write networks");
        let body = fs::read_to_string(&path).expect("read csv");
        let row = body.lines().nth(1).expect("row");
        assert!(row.contains("org_1|org_2"));
        assert!(row.contains("OK|TX"));
        assert!(row.contains("55.50"));
    }
}
