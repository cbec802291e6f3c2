/// Minimum Jaro-Winkler similarity for a fuzzy name match to be accepted.
///
/// The various scoring-rule documents describe "fuzzy" name matching without
/// agreeing on a number, so the threshold is pinned here explicitly. 0.85 on
/// normalized names (legal suffixes stripped) keeps obvious rebrands together
/// without merging distinct "<City> Medical Center" style names.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.85;

/// Version stamp carried on every ScoreRecord so historical exports remain
/// comparable after rule changes. Overridable via --ruleset-version.
pub const DEFAULT_RULESET_VERSION: &str = "fit-rules-2026.08.1";

pub const DEFAULT_PRIORITY_CONFIG: &str = "config/priority.json";
pub const DEFAULT_SCORING_RULES: &str = "config/scoring_rules.json";
