//! Error types for the billing filter processor
//!
//! Every failure a cycle can hit is a variant of [`ProcessError`]. The
//! processor never continues past one: any error collapses the whole cycle to
//! the `failure` relationship with the original flow unit.

use thiserror::Error;

/// Result alias used throughout the crate
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Fatal error raised while processing a flow unit
#[derive(Error, Debug)]
pub enum ProcessError {
    /// No schema could be resolved to decode input or negotiate output
    #[error("Schema not found: {0}")]
    SchemaResolution(String),

    /// A record's raw representation does not conform to the declared schema
    #[error("Malformed record at position {position}: {reason}")]
    MalformedRecord { position: u64, reason: String },

    /// The transform rule referenced a field that is absent or null
    #[error("Field '{field}' is missing or null in record {position}")]
    FieldAccess { field: String, position: u64 },

    /// The timestamp field did not match the expected source pattern
    #[error("Field '{field}' in record {position} has unparsable date '{value}': {source}")]
    DateFormat {
        field: String,
        value: String,
        position: u64,
        #[source]
        source: chrono::ParseError,
    },

    /// The sink cannot coerce a record value to the output schema
    #[error("Record incompatible with output schema at field '{field}': {reason}")]
    IncompatibleRecord { field: String, reason: String },

    /// Closing a reader, writer or stream failed
    #[error("Failed to release resource: {0}")]
    ResourceRelease(String),

    /// Session bookkeeping was violated (unrouted or doubly routed flow unit)
    #[error("Session error: {0}")]
    Session(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    pub fn config(msg: impl Into<String>) -> Self {
        ProcessError::Config(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        ProcessError::SchemaResolution(msg.into())
    }

    pub fn session(msg: impl Into<String>) -> Self {
        ProcessError::Session(msg.into())
    }

    pub fn release(msg: impl Into<String>) -> Self {
        ProcessError::ResourceRelease(msg.into())
    }

    pub fn malformed(position: u64, reason: impl Into<String>) -> Self {
        ProcessError::MalformedRecord {
            position,
            reason: reason.into(),
        }
    }

    pub fn incompatible(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ProcessError::IncompatibleRecord {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Short, stable label used in logs and cycle reports
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::SchemaResolution(_) => "schema_resolution",
            ProcessError::MalformedRecord { .. } => "malformed_record",
            ProcessError::FieldAccess { .. } => "field_access",
            ProcessError::DateFormat { .. } => "date_format",
            ProcessError::IncompatibleRecord { .. } => "incompatible_record",
            ProcessError::ResourceRelease(_) => "resource_release",
            ProcessError::Session(_) => "session",
            ProcessError::Config(_) => "config",
            ProcessError::Io(_) => "io",
        }
    }
}
