//! Async seams between the migration logic and its databases.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use kdvh_common::{
    MigrationResult, ReferenceMetadata, TargetObservation, TimeseriesId, TimeseriesLabel,
    ValidityWindow,
};

use crate::source::{DumpRow, UnitQuery};

/// Read-only query surface of the legacy archive.
#[async_trait]
pub trait LegacySource: Send + Sync {
    /// Column names of `table`, structural columns excluded.
    async fn table_columns(&self, table: &str) -> MigrationResult<Vec<String>>;

    /// Stations with at least one non-null value of `element` in `table`.
    async fn stations_with_element(&self, table: &str, element: &str) -> MigrationResult<Vec<i64>>;

    /// First and last observation year of `station` in `table`, if any.
    async fn year_range(&self, table: &str, station: i64) -> MigrationResult<Option<(i32, i32)>>;

    /// Rows of one unit, data and flags joined on timestamp, ordered by time.
    async fn fetch_rows(&self, query: &UnitQuery) -> MigrationResult<Vec<DumpRow>>;

    /// Legacy validity windows from an element table.
    async fn validity_windows(
        &self,
        elem_table: &str,
        stations: Option<&[i64]>,
        elements: Option<&[String]>,
    ) -> MigrationResult<Vec<ValidityWindow>>;
}

/// Parameter catalog lookups.
#[async_trait]
pub trait ParameterSource: Send + Sync {
    /// Metadata rows for `table`, restricted to `elements` when given.
    async fn parameter_metadata(
        &self,
        table: &str,
        elements: Option<&[String]>,
    ) -> MigrationResult<Vec<ReferenceMetadata>>;
}

/// Timeseries identities in the target archive.
#[async_trait]
pub trait TimeseriesStore: Send + Sync {
    /// Look up the identity with exactly this label, NULLs matching NULLs.
    async fn find_timeseries(&self, label: &TimeseriesLabel) -> MigrationResult<Option<TimeseriesId>>;

    /// Create the timeseries and its label atomically.
    ///
    /// Fails with `MigrationError::UniqueViolation` if another writer
    /// created the same label first; nothing is left behind in that case.
    async fn create_timeseries(
        &self,
        label: &TimeseriesLabel,
        valid_from: Option<DateTime<Utc>>,
    ) -> MigrationResult<TimeseriesId>;
}

/// Bulk loading of converted observations.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    /// Load values into the scalar and non-scalar fact tables in one
    /// transaction. Returns the number of rows accepted.
    async fn load_data(&self, rows: &[TargetObservation]) -> MigrationResult<u64>;

    /// Load `controlinfo`/`useinfo` into the flags table. Returns the
    /// number of rows accepted.
    async fn load_flags(&self, rows: &[TargetObservation]) -> MigrationResult<u64>;
}
