use thiserror::Error;

/// Pipeline error taxonomy.
///
/// Record-level conditions (`MalformedRecord`, `ConflictingIdentifier`,
/// `AmbiguousLink`) are recovered locally: the offending record lands in the
/// rejection/collision report and the run continues. `Configuration` is fatal
/// at startup, before any input records are processed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed record from {source_name} (key {record_key}): {reason}")]
    MalformedRecord {
        source_name: String,
        record_key: String,
        reason: String,
    },

    #[error(
        "identifier {identifier} kept as '{kept_name}', conflicting '{conflicting_name}' from {conflicting_source}"
    )]
    ConflictingIdentifier {
        identifier: String,
        kept_name: String,
        conflicting_name: String,
        conflicting_source: String,
    },

    #[error("no unique link for record {record_key} from {source_name}: {detail}")]
    AmbiguousLink {
        source_name: String,
        record_key: String,
        detail: String,
    },

    #[error("configuration error in {config_path}: {reason}")]
    Configuration { config_path: String, reason: String },
}

impl PipelineError {
    /// Short machine-readable reason code used in the rejection report.
    pub fn reason_code(&self) -> &'static str {
        match self {
            PipelineError::MalformedRecord { .. } => "malformed_record",
            PipelineError::ConflictingIdentifier { .. } => "conflicting_identifier",
            PipelineError::AmbiguousLink { .. } => "ambiguous_link",
            PipelineError::Configuration { .. } => "configuration",
        }
    }
}
