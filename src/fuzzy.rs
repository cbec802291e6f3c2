//! Last-resort fuzzy name linking.
//!
//! Candidates are pruned to the record's state before any string comparison
//! runs, which keeps the work sharded per state and avoids a corpus-wide
//! pairwise pass. A match is accepted only when it clears
//! [`FUZZY_MATCH_THRESHOLD`](crate::constants::FUZZY_MATCH_THRESHOLD) and is
//! the unique best candidate; ties and near-misses return `None` rather than
//! guessing.

use std::collections::HashMap;
use strsim::jaro_winkler;

use crate::constants::FUZZY_MATCH_THRESHOLD;

/// An accepted fuzzy match against the spine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyMatch {
    /// Index into the organization slice the index was built over.
    pub org_index: usize,
    pub confidence: f64,
}

/// State-sharded candidate index over spine organizations.
#[derive(Debug, Default)]
pub struct FuzzyIndex {
    by_state: HashMap<String, Vec<(usize, String)>>,
}

impl FuzzyIndex {
    /// Build from `(state_code, normalized_name)` pairs in spine order.
    /// Entries with an empty state or name never become candidates.
    pub fn build<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>) -> Self {
        let mut by_state: HashMap<String, Vec<(usize, String)>> = HashMap::new();
        for (idx, (state_code, normalized_name)) in entries.enumerate() {
            if state_code.is_empty() || normalized_name.is_empty() {
                continue;
            }
            by_state
                .entry(state_code.to_string())
                .or_default()
                .push((idx, normalized_name.to_string()));
        }
        Self { by_state }
    }

    /// Match a normalized name within one state.
    ///
    /// Returns `None` for: empty inputs, no candidates in the state, best
    /// similarity below threshold, or a tie for best (ambiguous links are
    /// logged by the caller, never broken arbitrarily).
    pub fn match_name(&self, normalized_name: &str, state_code: &str) -> Option<FuzzyMatch> {
        if normalized_name.is_empty() || state_code.is_empty() {
            return None;
        }
        let candidates = self.by_state.get(state_code)?;

        let mut best: Option<(usize, f64)> = None;
        let mut tied = false;
        for (org_index, candidate_name) in candidates {
            let similarity = jaro_winkler(normalized_name, candidate_name);
            match best {
                Some((_, best_similarity)) if similarity > best_similarity => {
                    best = Some((*org_index, similarity));
                    tied = false;
                }
                Some((_, best_similarity)) if similarity == best_similarity => {
                    tied = true;
                }
                None => {
                    best = Some((*org_index, similarity));
                }
                _ => {}
            }
        }

        let (org_index, confidence) = best?;
        if confidence < FUZZY_MATCH_THRESHOLD || tied {
            return None;
        }
        Some(FuzzyMatch {
            org_index,
            confidence,
        })
    }
}
