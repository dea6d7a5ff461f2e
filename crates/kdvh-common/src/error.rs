//! Error types for the KDVH migration.

use thiserror::Error;

/// Result type alias using MigrationError.
pub type MigrationResult<T> = Result<T, MigrationError>;

/// How far the effect of an error reaches.
///
/// Ordered from narrowest to widest, so `severity >= Severity::Table`
/// reads as "at least table-wide".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// A single row is dropped, the unit continues.
    Row,
    /// The (table, station, element) unit is skipped, siblings continue.
    Unit,
    /// The whole table is abandoned.
    Table,
    /// The run cannot continue.
    Fatal,
}

/// Primary error type for migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    // === Configuration Errors ===
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    // === Data Errors ===
    #[error("Missing metadata in parameter catalog for {table} - {element}")]
    MissingMetadata { table: String, element: String },

    #[error("Malformed line {line}: {message}")]
    MalformedLine { line: u64, message: String },

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Invalid period '{0}'")]
    InvalidPeriod(String),

    #[error("Could not add period {period} to {time}")]
    PeriodArithmetic { period: String, time: String },

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    // === Storage Errors ===
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Bulk load failed: {0}")]
    BulkLoad(String),

    // === Infrastructure Errors ===
    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Panic while processing {context}: {message}")]
    Panic { context: String, message: String },
}

impl MigrationError {
    /// Classify the error by how much work it invalidates.
    pub fn severity(&self) -> Severity {
        match self {
            MigrationError::MalformedLine { .. }
            | MigrationError::InvalidTimestamp(_)
            | MigrationError::PeriodArithmetic { .. }
            | MigrationError::Conversion(_) => Severity::Row,

            MigrationError::UnknownTable(_)
            | MigrationError::MissingMetadata { .. }
            | MigrationError::InvalidIdentifier(_)
            | MigrationError::Io(_)
            | MigrationError::Database(_)
            | MigrationError::UniqueViolation(_)
            | MigrationError::BulkLoad(_)
            | MigrationError::Notification(_) => Severity::Unit,

            // only produced under the continue policy
            MigrationError::Panic { .. } => Severity::Table,

            MigrationError::Config(_) | MigrationError::InvalidPeriod(_) => Severity::Fatal,
        }
    }

    /// Short machine-friendly label used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::Config(_) => "config",
            MigrationError::UnknownTable(_) => "catalog",
            MigrationError::MissingMetadata { .. } => "missing_metadata",
            MigrationError::MalformedLine { .. }
            | MigrationError::InvalidTimestamp(_) => "parse",
            MigrationError::InvalidPeriod(_) | MigrationError::PeriodArithmetic { .. } => "period",
            MigrationError::Conversion(_) => "conversion",
            MigrationError::InvalidIdentifier(_) => "identifier",
            MigrationError::Io(_) => "io",
            MigrationError::Database(_)
            | MigrationError::UniqueViolation(_)
            | MigrationError::BulkLoad(_) => "database",
            MigrationError::Notification(_) => "notification",
            MigrationError::Panic { .. } => "panic",
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, MigrationError::UniqueViolation(_))
    }
}

// Conversion from common error types
impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        MigrationError::Io(err.to_string())
    }
}
