//! Canonicalization of organization names, phones, and zips.
//!
//! Every matcher in the pipeline (exact spine keys, fuzzy fallback, network
//! grouping) compares normalized forms produced here, so the functions must be
//! idempotent: running a value through twice yields the same output.

/// Legal-entity suffixes stripped when they appear as trailing tokens.
///
/// Matched against lowercased tokens after punctuation removal, so "Inc." and
/// "INC" both reduce to "inc".
const LEGAL_SUFFIXES: [&str; 14] = [
    "inc",
    "incorporated",
    "llc",
    "llp",
    "corp",
    "corporation",
    "ltd",
    "limited",
    "pa",
    "pc",
    "pllc",
    "lp",
    "co",
    "company",
];

/// Canonicalize an organization name for matching.
///
/// Lowercases, removes punctuation (internal hyphens become spaces so
/// "Saint-Mary" and "Saint Mary" agree), collapses whitespace runs, and strips
/// trailing legal-entity suffix tokens. A suffix token in the middle of a name
/// ("Co Operative Health") is left alone.
pub fn normalize_name(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_alphanumeric() {
            cleaned.push(lower);
        } else if lower.is_whitespace() || lower == '-' || lower == '/' || lower == '&' {
            cleaned.push(' ');
        }
        // remaining punctuation (periods, commas, apostrophes) drops out
    }

    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
    while let Some(last) = tokens.last() {
        if tokens.len() > 1 && LEGAL_SUFFIXES.contains(last) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}

/// Digits-only phone form. Leading US country code is dropped from 11-digit
/// numbers so "+1 (555) 010-2000" and "555-010-2000" compare equal.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    }
}

/// 5-digit zip for matching. The +4 extension is discarded here; callers keep
/// the raw value for display.
pub fn normalize_zip(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 5 {
        digits[..5].to_string()
    } else {
        digits
    }
}

/// Two-letter uppercase state code, empty when the input is not plausibly one.
pub fn normalize_state(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        trimmed.to_ascii_uppercase()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_legal_suffixes() {
        assert_eq!(normalize_name("Example Health Partners, LLC"), "example health partners");
        assert_eq!(normalize_name("RIVERBEND MEDICAL GROUP INC."), "riverbend medical group");
        assert_eq!(normalize_name("Oak Family Practice, P.A."), "oak family practice");
    }

    #[test]
    fn keeps_suffix_tokens_in_the_middle() {
        assert_eq!(normalize_name("Co Operative Health"), "co operative health");
    }

    #[test]
    fn never_strips_a_name_to_empty() {
        assert_eq!(normalize_name("LLC"), "llc");
        assert_eq!(normalize_name("Inc."), "inc");
    }

    #[test]
    fn collapses_punctuation_and_whitespace() {
        assert_eq!(
            normalize_name("  St.  Mary's-Hospital / Clinics "),
            "st marys hospital clinics"
        );
    }

    #[test]
    fn normalize_name_is_idempotent() {
        let samples = [
            "Example Health Partners, LLC",
            "RIVERBEND MEDICAL GROUP INC.",
            "St. Mary's-Hospital",
            "LLC",
            "",
            "A & B Clinics Co.",
        ];
        for raw in samples {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn phone_keeps_ten_digits() {
        assert_eq!(normalize_phone("+1 (555) 010-2000"), "5550102000");
        assert_eq!(normalize_phone("555.010.2000"), "5550102000");
        // non-NANP numbers pass through digits-only, unshortened
        assert_eq!(normalize_phone("011 44 20 7946 0958"), "011442079460958");
    }

    #[test]
    fn zip_discards_plus_four() {
        assert_eq!(normalize_zip("73301-0001"), "73301");
        assert_eq!(normalize_zip("73301"), "73301");
        assert_eq!(normalize_zip("733"), "733");
    }

    #[test]
    fn state_codes_are_uppercased_or_dropped() {
        assert_eq!(normalize_state("tx"), "TX");
        assert_eq!(normalize_state(" OK "), "OK");
        assert_eq!(normalize_state("Texas"), "");
        assert_eq!(normalize_state("7X"), "");
    }
}
