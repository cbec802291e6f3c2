//! Crosswalk linking: foreign identifier spaces (cost-report facility
//! numbers, enrollment ids) mapped onto spine organizations through explicit
//! lookup tables loaded wholesale before any linking begins.

use std::collections::HashMap;

use crate::records::CrosswalkRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkMethod {
    ExactId,
    Crosswalk,
    Fuzzy,
}

impl LinkMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkMethod::ExactId => "exact_id",
            LinkMethod::Crosswalk => "crosswalk",
            LinkMethod::Fuzzy => "fuzzy",
        }
    }

    /// Tie-break authority when two candidates share a priority rank:
    /// exact_id beats crosswalk beats fuzzy.
    pub fn authority(self) -> u8 {
        match self {
            LinkMethod::ExactId => 0,
            LinkMethod::Crosswalk => 1,
            LinkMethod::Fuzzy => 2,
        }
    }
}

/// A record-to-organization attachment, retained on the organization for
/// audit. Exact and crosswalk links carry confidence 1.0; fuzzy links carry
/// the accepted similarity.
#[derive(Debug, Clone)]
pub struct LinkEdge {
    pub org_id: String,
    pub source_name: String,
    pub source_record_key: String,
    pub link_method: LinkMethod,
    pub confidence: f64,
}

/// In-memory crosswalk: foreign_key -> registry identifiers. One foreign key
/// may map to several organizations (shared facility numbers), and several
/// foreign keys may map to the same organization.
#[derive(Debug, Default)]
pub struct CrosswalkTable {
    entries: HashMap<String, Vec<String>>,
}

impl CrosswalkTable {
    pub fn from_rows(rows: Vec<CrosswalkRow>) -> Self {
        let mut entries: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let mapped = entries.entry(row.foreign_key).or_default();
            if !mapped.contains(&row.primary_identifier) {
                mapped.push(row.primary_identifier);
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registry identifiers mapped from a foreign key. An empty slice is
    /// the expected miss case, not an error; such records fall through to the
    /// fuzzy matcher.
    pub fn lookup(&self, foreign_key: &str) -> &[String] {
        self.entries
            .get(foreign_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(foreign_key: &str, primary_identifier: &str) -> CrosswalkRow {
        CrosswalkRow {
            foreign_key: foreign_key.to_string(),
            primary_identifier: primary_identifier.to_string(),
        }
    }

    #[test]
    fn lookup_miss_returns_empty_not_error() {
        let table = CrosswalkTable::from_rows(vec![row("CCN-1", "1234567893")]);
        assert!(table.lookup("CCN-404").is_empty());
    }

    #[test]
    fn one_to_many_keeps_every_mapping() {
        let table = CrosswalkTable::from_rows(vec![
            row("CCN-1", "1234567893"),
            row("CCN-1", "1093817465"),
            row("CCN-1", "1234567893"),
        ]);
        // duplicates collapse, distinct targets are all kept
        assert_eq!(table.lookup("CCN-1"), ["1234567893", "1093817465"]);
    }

    #[test]
    fn many_to_one_is_permitted() {
        let table = CrosswalkTable::from_rows(vec![
            row("CCN-1", "1234567893"),
            row("CCN-2", "1234567893"),
        ]);
        assert_eq!(table.lookup("CCN-1"), ["1234567893"]);
        assert_eq!(table.lookup("CCN-2"), ["1234567893"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn link_method_authority_ordering() {
        assert!(LinkMethod::ExactId.authority() < LinkMethod::Crosswalk.authority());
        assert!(LinkMethod::Crosswalk.authority() < LinkMethod::Fuzzy.authority());
    }
}
