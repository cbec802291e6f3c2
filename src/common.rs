use anyhow::{Result, bail};
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

pub fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn sql_escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

/// DuckDB table expression for a local input file, keyed off its extension.
pub fn source_expr(input_path: &Path) -> Result<String> {
    let escaped = sql_escape_path(input_path);
    let extension = input_path
        .extension()
        .and_then(|x| x.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match extension.as_str() {
        "parquet" => Ok(format!("read_parquet('{escaped}')")),
        "csv" => Ok(format!("read_csv_auto('{escaped}', header=true)")),
        _ => bail!(
            "Unsupported input extension for {}. Use .csv or .parquet",
            input_path.display()
        ),
    }
}

/// FNV-1a over the input bytes, hex-formatted.
///
/// org_id generation for organizations lacking a registry identifier must be
/// stable across runs and across releases, so this stays hand-pinned rather
/// than delegating to `DefaultHasher` (whose output may change between Rust
/// versions).
pub fn stable_hash(input: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

pub fn format_count(value: usize) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out.chars().rev().collect()
}

pub fn install_ctrlc_handler(shutdown_requested: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let was_set = shutdown_requested.swap(true, Ordering::SeqCst);
            if !was_set {
                eprintln!(
                    "\nReceived Ctrl-C. Finishing the current stage, writing the rejection report, and exiting without publishing outputs..."
                );
            }
        }
    });
}

pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

pub fn new_run_id() -> String {
    format!("fit-run-{}", now_unix_seconds())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_hash_is_deterministic() {
        assert_eq!(
            stable_hash("example health network|TX"),
            stable_hash("example health network|TX")
        );
        assert_ne!(
            stable_hash("example health network|TX"),
            stable_hash("example health network|OK")
        );
    }

    #[test]
    fn stable_hash_known_value() {
        // FNV-1a reference vector; guards against accidental algorithm drift.
        assert_eq!(stable_hash(""), "cbf29ce484222325");
    }

    #[test]
    fn format_count_groups_thousands() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_234_567), "1,234,567");
    }

    #[test]
    fn source_expr_rejects_unknown_extensions() {
        assert!(source_expr(Path::new("records.sas7bdat")).is_err());
        assert!(source_expr(Path::new("records.parquet")).is_ok());
        assert!(source_expr(Path::new("records.csv")).is_ok());
    }
}
