//! Identity resolution: builds the canonical Organization spine from the
//! primary identity registry.
//!
//! The first pass is order-sensitive by design: records are consumed in
//! source-file order and the first record seen for a registry identifier sets
//! the canonical attributes. Later duplicates fold in as linked records, and
//! materially different duplicates are logged as collisions without ever
//! rewriting canonical attributes. Records lacking an identifier are parked
//! and absorbed after the spine exists, via exact normalized-key folding or
//! the fuzzy matcher.

use std::collections::HashMap;

use crate::common::stable_hash;
use crate::errors::PipelineError;
use crate::fuzzy::FuzzyIndex;
use crate::linker::{LinkEdge, LinkMethod};
use crate::normalize::{normalize_name, normalize_phone, normalize_state, normalize_zip};
use crate::records::IdentityRecord;
use crate::report::RunReport;

/// Taxonomy-code prefix -> segment bucket. Checked before name keywords;
/// longest prefixes first so "282" wins over "28".
const TAXONOMY_SEGMENTS: [(&str, &str); 10] = [
    ("282", "hospital"),
    ("283", "hospital"),
    ("261", "clinic"),
    ("251", "home_health"),
    ("314", "post_acute"),
    ("310", "post_acute"),
    ("207", "physician_practice"),
    ("208", "physician_practice"),
    ("101", "behavioral_health"),
    ("103", "behavioral_health"),
];

const NAME_KEYWORD_SEGMENTS: [(&str, &str); 9] = [
    ("hospital", "hospital"),
    ("medical center", "hospital"),
    ("health system", "hospital"),
    ("clinic", "clinic"),
    ("health center", "clinic"),
    ("home health", "home_health"),
    ("hospice", "home_health"),
    ("nursing", "post_acute"),
    ("behavioral", "behavioral_health"),
];

pub fn classify_segment(taxonomy_code: &str, normalized_name: &str) -> String {
    let code = taxonomy_code.trim();
    if !code.is_empty() {
        for (prefix, segment) in TAXONOMY_SEGMENTS {
            if code.starts_with(prefix) {
                return segment.to_string();
            }
        }
    }
    for (keyword, segment) in NAME_KEYWORD_SEGMENTS {
        if normalized_name.contains(keyword) {
            return segment.to_string();
        }
    }
    "other".to_string()
}

/// The canonical deduplicated provider organization.
#[derive(Debug, Clone)]
pub struct Organization {
    pub org_id: String,
    pub primary_identifier: Option<String>,
    pub legal_name: String,
    pub normalized_name: String,
    pub state_code: String,
    pub address_line: String,
    pub city: String,
    /// Raw zip retained for display; `zip` is the 5-digit matching form.
    pub zip_raw: String,
    pub zip: String,
    pub phone: String,
    pub taxonomy_code: String,
    pub segment_label: String,
    pub site_count: Option<u32>,
    /// Every raw record folded into this entity, for audit.
    pub linked_records: Vec<LinkEdge>,
}

impl Organization {
    fn from_identity(record: &IdentityRecord, org_id: String) -> Self {
        let normalized_name = normalize_name(&record.legal_name);
        let segment_label = classify_segment(&record.taxonomy_code, &normalized_name);
        Self {
            org_id,
            primary_identifier: record.primary_identifier.clone(),
            legal_name: record.legal_name.clone(),
            normalized_name,
            state_code: normalize_state(&record.state_code),
            address_line: record.address_line.clone(),
            city: record.city.clone(),
            zip_raw: record.zip.clone(),
            zip: normalize_zip(&record.zip),
            phone: normalize_phone(&record.phone),
            taxonomy_code: record.taxonomy_code.clone(),
            segment_label,
            site_count: record.site_count,
            linked_records: Vec::new(),
        }
    }

    fn attach(&mut self, record: &IdentityRecord, method: LinkMethod, confidence: f64) {
        self.linked_records.push(LinkEdge {
            org_id: self.org_id.clone(),
            source_name: record.source_name.clone(),
            source_record_key: record
                .primary_identifier
                .clone()
                .unwrap_or_else(|| format!("row#{}", record.row_order)),
            link_method: method,
            confidence,
        });
    }
}

/// The organization spine with its exact-key lookup indexes.
#[derive(Debug, Default)]
pub struct Spine {
    pub organizations: Vec<Organization>,
    by_primary_id: HashMap<String, usize>,
    by_hash_key: HashMap<(String, String), usize>,
}

impl Spine {
    pub fn index_of_primary(&self, primary_identifier: &str) -> Option<usize> {
        self.by_primary_id.get(primary_identifier).copied()
    }

    pub fn org(&self, index: usize) -> &Organization {
        &self.organizations[index]
    }

    pub fn org_mut(&mut self, index: usize) -> &mut Organization {
        &mut self.organizations[index]
    }

    pub fn len(&self) -> usize {
        self.organizations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.organizations.is_empty()
    }

    fn push(&mut self, organization: Organization) -> usize {
        let index = self.organizations.len();
        if let Some(id) = &organization.primary_identifier {
            self.by_primary_id.insert(id.clone(), index);
        } else {
            self.by_hash_key.insert(
                (
                    organization.normalized_name.clone(),
                    organization.state_code.clone(),
                ),
                index,
            );
        }
        self.organizations.push(organization);
        index
    }
}

#[derive(Debug)]
pub struct SpineBuildResult {
    pub spine: Spine,
    /// Identity records without a registry identifier, held for
    /// [`absorb_parked`] once the spine exists. Never silently dropped.
    pub parked: Vec<IdentityRecord>,
    pub individuals_discarded: usize,
}

/// First pass: one Organization per registry identifier, first-seen wins.
pub fn build_spine(records: &[IdentityRecord], report: &mut RunReport) -> SpineBuildResult {
    let mut spine = Spine::default();
    let mut parked = Vec::new();
    let mut individuals_discarded = 0usize;

    for record in records {
        if record.entity_type == "individual" || record.entity_type == "1" {
            individuals_discarded += 1;
            continue;
        }

        let normalized_name = normalize_name(&record.legal_name);
        match &record.primary_identifier {
            Some(primary_identifier) => {
                if let Some(index) = spine.index_of_primary(primary_identifier) {
                    let canonical = spine.org(index);
                    let materially_different = canonical.normalized_name != normalized_name
                        || canonical.state_code != normalize_state(&record.state_code);
                    if materially_different {
                        report.log(PipelineError::ConflictingIdentifier {
                            identifier: primary_identifier.clone(),
                            kept_name: canonical.legal_name.clone(),
                            conflicting_name: record.legal_name.clone(),
                            conflicting_source: record.source_name.clone(),
                        });
                    }
                    spine.org_mut(index).attach(record, LinkMethod::ExactId, 1.0);
                } else {
                    let org_id = format!("org_{primary_identifier}");
                    let mut organization = Organization::from_identity(record, org_id);
                    organization.attach(record, LinkMethod::ExactId, 1.0);
                    spine.push(organization);
                }
            }
            None => {
                if normalized_name.is_empty() {
                    report.log(PipelineError::MalformedRecord {
                        source_name: record.source_name.clone(),
                        record_key: format!("row#{}", record.row_order),
                        reason: "empty name and no registry identifier".to_string(),
                    });
                    continue;
                }
                parked.push(record.clone());
            }
        }
    }

    SpineBuildResult {
        spine,
        parked,
        individuals_discarded,
    }
}

/// Second pass: absorb parked (identifier-less) records.
///
/// Each parked record first tries a fuzzy match against the identifier-backed
/// spine; an accepted match folds it in as a fuzzy link. Otherwise it creates
/// (or folds into) a hash-keyed organization on
/// `stable_hash(normalized_name + "|" + state_code)`. Returns the number of
/// fuzzy-absorbed records.
pub fn absorb_parked(
    spine: &mut Spine,
    parked: &[IdentityRecord],
    report: &mut RunReport,
) -> usize {
    let index = FuzzyIndex::build(
        spine
            .organizations
            .iter()
            .map(|org| (org.state_code.as_str(), org.normalized_name.as_str())),
    );

    let mut fuzzy_absorbed = 0usize;
    for record in parked {
        let normalized_name = normalize_name(&record.legal_name);
        let state_code = normalize_state(&record.state_code);

        if let Some(matched) = index.match_name(&normalized_name, &state_code) {
            spine
                .org_mut(matched.org_index)
                .attach(record, LinkMethod::Fuzzy, matched.confidence);
            fuzzy_absorbed += 1;
            continue;
        }

        let key = (normalized_name.clone(), state_code.clone());
        if let Some(existing) = spine.by_hash_key.get(&key).copied() {
            spine.org_mut(existing).attach(record, LinkMethod::ExactId, 1.0);
            continue;
        }

        if state_code.is_empty() {
            report.log(PipelineError::MalformedRecord {
                source_name: record.source_name.clone(),
                record_key: format!("row#{}", record.row_order),
                reason: "no registry identifier and no usable state code".to_string(),
            });
            continue;
        }

        let org_id = format!("org_{}", stable_hash(&format!("{normalized_name}|{state_code}")));
        let mut organization = Organization::from_identity(record, org_id);
        organization.attach(record, LinkMethod::ExactId, 1.0);
        spine.push(organization);
    }
    fuzzy_absorbed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(
        npi: Option<&str>,
        name: &str,
        state: &str,
        row_order: u64,
    ) -> IdentityRecord {
        IdentityRecord {
            primary_identifier: npi.map(str::to_string),
            legal_name: name.to_string(),
            entity_type: "organization".to_string(),
            state_code: state.to_string(),
            address_line: "100 Main St".to_string(),
            city: "Austin".to_string(),
            zip: "73301-0001".to_string(),
            phone: "(555) 010-2000".to_string(),
            taxonomy_code: "282N00000X".to_string(),
            site_count: None,
            row_order,
            source_name: "registry".to_string(),
        }
    }

    #[test]
    fn duplicate_identifier_folds_into_one_org() {
        // Same identifier, address casing differs: exactly one Organization.
        let mut a = identity(Some("1234567890"), "Example Health", "TX", 1);
        a.address_line = "100 MAIN ST".to_string();
        let b = identity(Some("1234567890"), "Example Health", "TX", 2);

        let mut report = RunReport::default();
        let result = build_spine(&[a, b], &mut report);
        assert_eq!(result.spine.len(), 1);
        let org = result.spine.org(0);
        assert_eq!(org.org_id, "org_1234567890");
        assert_eq!(org.linked_records.len(), 2);
        assert!(report.collisions.is_empty());
    }

    #[test]
    fn first_seen_wins_and_conflict_is_logged() {
        let first = identity(Some("1234567890"), "Example Health", "TX", 1);
        let conflicting = identity(Some("1234567890"), "Totally Different Name", "TX", 2);

        let mut report = RunReport::default();
        let result = build_spine(&[first, conflicting], &mut report);
        assert_eq!(result.spine.len(), 1);
        assert_eq!(result.spine.org(0).legal_name, "Example Health");
        assert_eq!(report.collisions.len(), 1);
        assert_eq!(report.collisions[0].primary_identifier, "1234567890");
    }

    #[test]
    fn individuals_never_enter_the_spine() {
        let mut person = identity(Some("1093817465"), "JANE DOE MD", "TX", 1);
        person.entity_type = "individual".to_string();
        let org = identity(Some("1234567890"), "Example Health", "TX", 2);

        let mut report = RunReport::default();
        let result = build_spine(&[person, org], &mut report);
        assert_eq!(result.spine.len(), 1);
        assert_eq!(result.individuals_discarded, 1);
    }

    #[test]
    fn empty_name_without_identifier_is_rejected() {
        let bad = identity(None, "  ", "TX", 1);
        let mut report = RunReport::default();
        let result = build_spine(&[bad], &mut report);
        assert!(result.spine.is_empty());
        assert!(result.parked.is_empty());
        assert_eq!(report.rejections.len(), 1);
        assert_eq!(report.rejections[0].reason_code, "malformed_record");
    }

    #[test]
    fn parked_records_without_match_become_hash_orgs() {
        let keyed = identity(Some("1234567890"), "Riverbend Medical Group", "TX", 1);
        let parked = identity(None, "Coastal Dermatology Associates", "TX", 2);

        let mut report = RunReport::default();
        let mut result = build_spine(&[keyed, parked], &mut report);
        assert_eq!(result.parked.len(), 1);

        let parked = std::mem::take(&mut result.parked);
        let fuzzy_absorbed = absorb_parked(&mut result.spine, &parked, &mut report);
        assert_eq!(fuzzy_absorbed, 0);
        assert_eq!(result.spine.len(), 2);

        let hash_org = result.spine.org(1);
        assert!(hash_org.org_id.starts_with("org_"));
        assert!(hash_org.primary_identifier.is_none());
        assert_eq!(
            hash_org.org_id,
            format!(
                "org_{}",
                stable_hash("coastal dermatology associates|TX")
            )
        );
    }

    #[test]
    fn parked_records_fuzzy_fold_into_keyed_orgs() {
        let keyed = identity(Some("1234567890"), "Riverbend Medical Group", "TX", 1);
        let near_dup = identity(None, "Riverbend Medical Grp", "TX", 2);

        let mut report = RunReport::default();
        let mut result = build_spine(&[keyed, near_dup], &mut report);
        let parked = std::mem::take(&mut result.parked);
        let fuzzy_absorbed = absorb_parked(&mut result.spine, &parked, &mut report);
        assert_eq!(fuzzy_absorbed, 1);
        assert_eq!(result.spine.len(), 1);

        let org = result.spine.org(0);
        assert_eq!(org.linked_records.len(), 2);
        let fuzzy_edge = &org.linked_records[1];
        assert_eq!(fuzzy_edge.link_method, LinkMethod::Fuzzy);
        assert!(fuzzy_edge.confidence >= crate::constants::FUZZY_MATCH_THRESHOLD);
    }

    #[test]
    fn spine_never_duplicates_a_primary_identifier() {
        let records: Vec<IdentityRecord> = (0..20)
            .map(|i| {
                identity(
                    Some(if i % 2 == 0 { "1234567890" } else { "1093817465" }),
                    "Example Health",
                    "TX",
                    i as u64,
                )
            })
            .collect();
        let mut report = RunReport::default();
        let result = build_spine(&records, &mut report);
        assert_eq!(result.spine.len(), 2);

        let mut ids: Vec<&str> = result
            .spine
            .organizations
            .iter()
            .filter_map(|o| o.primary_identifier.as_deref())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn segment_classification_prefers_taxonomy_over_keywords() {
        assert_eq!(classify_segment("282N00000X", "oak family practice"), "hospital");
        assert_eq!(classify_segment("", "lakeside clinic"), "clinic");
        assert_eq!(classify_segment("", "acme widgets"), "other");
        assert_eq!(classify_segment("207Q00000X", "riverbend hospital"), "physician_practice");
    }
}
