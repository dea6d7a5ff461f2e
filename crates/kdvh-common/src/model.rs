//! Data model shared by the dump, conversion and import stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time::Period;

/// Lookup key for parameter metadata and offsets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamKey {
    pub element_code: String,
    pub table_name: String,
}

impl ParamKey {
    pub fn new(element_code: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            element_code: element_code.into(),
            table_name: table_name.into(),
        }
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.table_name, self.element_code)
    }
}

/// The (table, station, element) granularity of dumping and importing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractionUnit {
    pub table: String,
    pub station_id: i64,
    pub element_code: String,
}

impl ExtractionUnit {
    pub fn new(table: impl Into<String>, station_id: i64, element_code: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            station_id,
            element_code: element_code.into(),
        }
    }
}

impl fmt::Display for ExtractionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} - {}", self.table, self.station_id, self.element_code)
    }
}

/// One line of a dump file, as read back during import.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub station_id: i64,
    pub table: String,
    pub element_code: String,
    pub obs_time: DateTime<Utc>,
    pub raw_value: String,
    pub raw_flags: String,
}

/// Parameter identity from the parameter catalog, keyed by (element, table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMetadata {
    pub element_code: String,
    pub table_name: String,
    pub type_id: i32,
    pub param_id: i32,
    pub level: Option<i32>,
    pub sensor: Option<i32>,
    pub valid_from: Option<DateTime<Utc>>,
}

impl ReferenceMetadata {
    pub fn key(&self) -> ParamKey {
        ParamKey::new(&self.element_code, &self.table_name)
    }
}

/// Legacy per-(table, station, element) time range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub table_name: String,
    pub station_id: i64,
    pub element_code: String,
    pub from_time: Option<DateTime<Utc>>,
    pub to_time: Option<DateTime<Utc>>,
}

/// Where an observation time falls relative to a validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    Before,
    Inside,
    After,
}

impl ValidityWindow {
    pub fn position(&self, time: &DateTime<Utc>) -> WindowPosition {
        if matches!(self.from_time, Some(from) if *time < from) {
            WindowPosition::Before
        } else if matches!(self.to_time, Some(to) if *time > to) {
            WindowPosition::After
        } else {
            WindowPosition::Inside
        }
    }
}

/// Target-side timeseries key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeseriesId(pub i32);

impl fmt::Display for TimeseriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Label tuple uniquely identifying a target timeseries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeseriesLabel {
    pub station_id: i64,
    pub param_id: i32,
    pub type_id: i32,
    pub level: Option<i32>,
    pub sensor: Option<i32>,
}

impl TimeseriesLabel {
    pub fn from_metadata(station_id: i64, meta: &ReferenceMetadata) -> Self {
        Self {
            station_id,
            param_id: meta.param_id,
            type_id: meta.type_id,
            level: meta.level,
            sensor: meta.sensor,
        }
    }
}

/// Everything the import needs per unit, resolved once and reused for
/// each row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUnit {
    pub timeseries: TimeseriesId,
    pub offset: Period,
    pub window: Option<ValidityWindow>,
}

/// Converted value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObsValue {
    Scalar(f64),
    NonScalar(String),
}

impl ObsValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ObsValue::Scalar(v) => Some(*v),
            ObsValue::NonScalar(_) => None,
        }
    }
}

/// Observation in the target schema, ready for bulk loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetObservation {
    pub timeseries: TimeseriesId,
    pub obs_time: DateTime<Utc>,
    pub value: ObsValue,
    pub control_flags: String,
    pub use_flags: String,
}
