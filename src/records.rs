//! Typed raw input records and their loaders.
//!
//! Inputs arrive as `.csv` or `.parquet` snapshots; DuckDB does the format
//! parsing and hands back typed rows in source-file order. Nothing here
//! interprets the records beyond basic column typing.

use anyhow::{Context, Result};
use duckdb::Connection;
use serde::Deserialize;
use std::path::Path;

use crate::common::source_expr;

/// One row of the primary identity registry snapshot.
#[derive(Debug, Clone)]
pub struct IdentityRecord {
    /// 10-digit registry identifier (NPI); absent on some state rosters.
    pub primary_identifier: Option<String>,
    pub legal_name: String,
    /// "organization" or "individual". Individual rows never enter the spine.
    pub entity_type: String,
    pub state_code: String,
    pub address_line: String,
    pub city: String,
    pub zip: String,
    pub phone: String,
    pub taxonomy_code: String,
    pub site_count: Option<u32>,
    /// Position in the source stream; the resolver's first-seen-wins rule is
    /// defined over this ordering.
    pub row_order: u64,
    pub source_name: String,
}

/// One row of a metric-source dataset (claims rollups, cost-report line
/// items, shortage-area flags). Exactly one of the three link handles is
/// expected: a primary identifier, a crosswalkable foreign key, or a
/// name+state pair for the fuzzy fallback.
#[derive(Debug, Clone)]
pub struct MetricSourceRecord {
    pub primary_identifier: Option<String>,
    pub foreign_key: Option<String>,
    pub org_name: Option<String>,
    pub state_code: Option<String>,
    pub metric_name: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub as_of_period: Option<String>,
    pub source_name: String,
    pub row_order: u64,
}

impl MetricSourceRecord {
    /// Key echoed into the rejection report when this record cannot link.
    pub fn record_key(&self) -> String {
        self.primary_identifier
            .clone()
            .or_else(|| self.foreign_key.clone())
            .or_else(|| self.org_name.clone())
            .unwrap_or_else(|| format!("row#{}", self.row_order))
    }
}

/// Crosswalk table row: foreign identifier space -> registry identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct CrosswalkRow {
    pub foreign_key: String,
    pub primary_identifier: String,
}

fn optional(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn load_identity_records(input_path: &Path, source_name: &str) -> Result<Vec<IdentityRecord>> {
    let conn = Connection::open_in_memory().context("Failed opening DuckDB")?;
    let source = source_expr(input_path)?;
    let query = format!(
        "
        SELECT
            ROW_NUMBER() OVER () AS _row_id,
            CAST(npi AS VARCHAR) AS npi,
            CAST(legal_name AS VARCHAR) AS legal_name,
            CAST(entity_type AS VARCHAR) AS entity_type,
            CAST(state_code AS VARCHAR) AS state_code,
            CAST(address_line AS VARCHAR) AS address_line,
            CAST(city AS VARCHAR) AS city,
            CAST(zip AS VARCHAR) AS zip,
            CAST(phone AS VARCHAR) AS phone,
            CAST(taxonomy_code AS VARCHAR) AS taxonomy_code,
            TRY_CAST(site_count AS INTEGER) AS site_count
        FROM {source}
        ORDER BY _row_id
        "
    );

    let mut stmt = stmt_for(&conn, &query, input_path)?;
    let mut rows = stmt
        .query([])
        .with_context(|| format!("Failed querying identity records {}", input_path.display()))?;

    let mut records = Vec::new();
    while let Some(row) = rows.next().context("Failed iterating identity rows")? {
        let row_order: u64 = row.get(0).context("Failed reading _row_id")?;
        let npi: Option<String> = row.get(1).context("Failed reading npi")?;
        let legal_name: Option<String> = row.get(2).context("Failed reading legal_name")?;
        let entity_type: Option<String> = row.get(3).context("Failed reading entity_type")?;
        let state_code: Option<String> = row.get(4).context("Failed reading state_code")?;
        let address_line: Option<String> = row.get(5).context("Failed reading address_line")?;
        let city: Option<String> = row.get(6).context("Failed reading city")?;
        let zip: Option<String> = row.get(7).context("Failed reading zip")?;
        let phone: Option<String> = row.get(8).context("Failed reading phone")?;
        let taxonomy_code: Option<String> = row.get(9).context("Failed reading taxonomy_code")?;
        let site_count: Option<u32> = row.get(10).context("Failed reading site_count")?;

        records.push(IdentityRecord {
            primary_identifier: optional(npi),
            legal_name: optional(legal_name).unwrap_or_default(),
            entity_type: optional(entity_type)
                .unwrap_or_default()
                .to_ascii_lowercase(),
            state_code: optional(state_code).unwrap_or_default(),
            address_line: optional(address_line).unwrap_or_default(),
            city: optional(city).unwrap_or_default(),
            zip: optional(zip).unwrap_or_default(),
            phone: optional(phone).unwrap_or_default(),
            taxonomy_code: optional(taxonomy_code).unwrap_or_default(),
            site_count,
            row_order,
            source_name: source_name.to_string(),
        });
    }
    Ok(records)
}

pub fn load_metric_records(input_path: &Path) -> Result<Vec<MetricSourceRecord>> {
    let conn = Connection::open_in_memory().context("Failed opening DuckDB")?;
    let source = source_expr(input_path)?;
    let query = format!(
        "
        SELECT
            ROW_NUMBER() OVER () AS _row_id,
            CAST(npi AS VARCHAR) AS npi,
            CAST(foreign_key AS VARCHAR) AS foreign_key,
            CAST(org_name AS VARCHAR) AS org_name,
            CAST(state_code AS VARCHAR) AS state_code,
            CAST(metric_name AS VARCHAR) AS metric_name,
            TRY_CAST(value AS DOUBLE) AS value,
            CAST(unit AS VARCHAR) AS unit,
            CAST(as_of_period AS VARCHAR) AS as_of_period,
            CAST(source_name AS VARCHAR) AS source_name
        FROM {source}
        ORDER BY _row_id
        "
    );

    let mut stmt = stmt_for(&conn, &query, input_path)?;
    let mut rows = stmt
        .query([])
        .with_context(|| format!("Failed querying metric records {}", input_path.display()))?;

    let mut records = Vec::new();
    while let Some(row) = rows.next().context("Failed iterating metric rows")? {
        let row_order: u64 = row.get(0).context("Failed reading _row_id")?;
        let npi: Option<String> = row.get(1).context("Failed reading npi")?;
        let foreign_key: Option<String> = row.get(2).context("Failed reading foreign_key")?;
        let org_name: Option<String> = row.get(3).context("Failed reading org_name")?;
        let state_code: Option<String> = row.get(4).context("Failed reading state_code")?;
        let metric_name: Option<String> = row.get(5).context("Failed reading metric_name")?;
        let value: Option<f64> = row.get(6).context("Failed reading value")?;
        let unit: Option<String> = row.get(7).context("Failed reading unit")?;
        let as_of_period: Option<String> = row.get(8).context("Failed reading as_of_period")?;
        let source_name: Option<String> = row.get(9).context("Failed reading source_name")?;

        records.push(MetricSourceRecord {
            primary_identifier: optional(npi),
            foreign_key: optional(foreign_key),
            org_name: optional(org_name),
            state_code: optional(state_code),
            metric_name: optional(metric_name).unwrap_or_default(),
            value,
            unit: optional(unit),
            as_of_period: optional(as_of_period),
            source_name: optional(source_name).unwrap_or_default(),
            row_order,
        });
    }
    Ok(records)
}

fn stmt_for<'a>(
    conn: &'a Connection,
    query: &str,
    input_path: &Path,
) -> Result<duckdb::Statement<'a>> {
    conn.prepare(query)
        .with_context(|| format!("Failed preparing query for {}", input_path.display()))
}

/// Crosswalk tables are small hand-maintained CSVs; the `csv` crate reads
/// them directly.
pub fn load_crosswalk_rows(input_path: &Path) -> Result<Vec<CrosswalkRow>> {
    let mut reader = csv::Reader::from_path(input_path)
        .with_context(|| format!("Failed opening crosswalk CSV {}", input_path.display()))?;

    let mut rows = Vec::new();
    for result in reader.deserialize::<CrosswalkRow>() {
        let row = result
            .with_context(|| format!("Failed reading crosswalk row in {}", input_path.display()))?;
        let foreign_key = row.foreign_key.trim().to_string();
        let primary_identifier = row.primary_identifier.trim().to_string();
        if foreign_key.is_empty() || primary_identifier.is_empty() {
            continue;
        }
        rows.push(CrosswalkRow {
            foreign_key,
            primary_identifier,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn crosswalk_loader_skips_blank_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("crosswalk.csv");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "foreign_key,primary_identifier").unwrap();
        writeln!(file, "CCN-0001,1234567893").unwrap();
        writeln!(file, ",1234567893").unwrap();
        writeln!(file, "CCN-0002,").unwrap();
        writeln!(file, " CCN-0003 , 1093817465 ").unwrap();
        drop(file);

        let rows = load_crosswalk_rows(&path).expect("load");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].foreign_key, "CCN-0001");
        assert_eq!(rows[1].foreign_key, "CCN-0003");
        assert_eq!(rows[1].primary_identifier, "1093817465");
    }

    #[test]
    fn metric_record_key_prefers_strongest_handle() {
        let mut record = MetricSourceRecord {
            primary_identifier: Some("1234567893".into()),
            foreign_key: Some("CCN-1".into()),
            org_name: Some("Example".into()),
            state_code: None,
            metric_name: "revenue".into(),
            value: Some(1.0),
            unit: None,
            as_of_period: None,
            source_name: "cost_report".into(),
            row_order: 7,
        };
        assert_eq!(record.record_key(), "1234567893");
        record.primary_identifier = None;
        assert_eq!(record.record_key(), "CCN-1");
        record.foreign_key = None;
        assert_eq!(record.record_key(), "Example");
        record.org_name = None;
        assert_eq!(record.record_key(), "row#7");
    }
}
