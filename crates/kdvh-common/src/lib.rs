//! Common types and utilities shared across the KDVH migration crates.

pub mod error;
pub mod model;
pub mod time;

pub use error::{MigrationError, MigrationResult, Severity};
pub use model::{
    ExtractionUnit, ObsValue, ParamKey, RawObservation, ReferenceMetadata, ResolvedUnit,
    TargetObservation, TimeseriesId, TimeseriesLabel, ValidityWindow, WindowPosition,
};
pub use time::{format_dump_time, parse_dump_time, Period, DUMP_TIME_FORMAT};
