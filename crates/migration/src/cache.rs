//! Reference data cached once before any import unit starts.
//!
//! Nothing writes to the cache after it has been built, so workers share it
//! through an `Arc` without locking.

use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use kdvh_common::{
    MigrationError, MigrationResult, ParamKey, Period, ReferenceMetadata, ValidityWindow,
};
use storage::{LegacySource, ParameterSource};

use crate::catalog::TableSpec;
use crate::options::Selection;

/// Default location of the product offsets file.
pub const DEFAULT_OFFSETS_FILE: &str = "product_offsets.csv";

#[derive(Debug, Deserialize)]
struct OffsetRow {
    table_name: String,
    elem_code: String,
    #[serde(default)]
    fromtime_offset: String,
    #[serde(default)]
    timespan: String,
}

fn parse_optional_period(s: &str) -> MigrationResult<Period> {
    if s.trim().is_empty() {
        Ok(Period::ZERO)
    } else {
        Period::parse(s)
    }
}

/// Parse the offsets CSV. The offset of a key is `fromtime_offset + timespan`.
pub fn read_offsets<R: Read>(reader: R) -> MigrationResult<HashMap<ParamKey, Period>> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut offsets = HashMap::new();

    for row in csv.deserialize::<OffsetRow>() {
        let row = row.map_err(|e| MigrationError::Config(format!("Bad offsets row: {}", e)))?;
        let from = parse_optional_period(&row.fromtime_offset)?;
        let span = parse_optional_period(&row.timespan)?;
        let offset = from.checked_add(&span).ok_or_else(|| {
            MigrationError::InvalidPeriod(format!("{} + {}", row.fromtime_offset, row.timespan))
        })?;

        offsets.insert(ParamKey::new(row.elem_code.to_uppercase(), row.table_name), offset);
    }

    Ok(offsets)
}

/// Read-only snapshot of metadata, offsets and validity windows.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCache {
    metadata: HashMap<ParamKey, ReferenceMetadata>,
    offsets: HashMap<ParamKey, Period>,
    windows: HashMap<(ParamKey, i64), ValidityWindow>,
}

impl ReferenceCache {
    pub fn new(
        metadata: impl IntoIterator<Item = ReferenceMetadata>,
        offsets: HashMap<ParamKey, Period>,
        windows: impl IntoIterator<Item = ValidityWindow>,
    ) -> Self {
        let metadata = metadata
            .into_iter()
            .map(|m| (ParamKey::new(m.element_code.to_uppercase(), m.table_name.clone()), m))
            .collect();
        let windows = windows
            .into_iter()
            .map(|w| {
                let key = ParamKey::new(w.element_code.to_uppercase(), w.table_name.clone());
                ((key, w.station_id), w)
            })
            .collect();

        Self {
            metadata,
            offsets,
            windows,
        }
    }

    /// Query the parameter catalog and the legacy element tables for the
    /// selected tables, and read the offsets file.
    pub async fn load(
        tables: &[&TableSpec],
        params: &dyn ParameterSource,
        source: &dyn LegacySource,
        offsets_path: &Path,
        selection: &Selection,
    ) -> MigrationResult<Self> {
        let elements = selection.elements_upper();

        let offsets = match std::fs::File::open(offsets_path) {
            Ok(file) => read_offsets(file)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %offsets_path.display(), "Offsets file not found, using zero offsets");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut metadata = Vec::new();
        for table in tables {
            metadata.extend(
                params
                    .parameter_metadata(&table.table_name, elements.as_deref())
                    .await?,
            );
        }

        info!("Caching validity windows from KDVH");
        let elem_tables: BTreeSet<&str> = tables.iter().filter_map(|t| t.elem_table.as_deref()).collect();
        let mut windows = Vec::new();
        for elem_table in elem_tables {
            windows.extend(
                source
                    .validity_windows(elem_table, selection.stations.as_deref(), elements.as_deref())
                    .await?,
            );
        }

        let cache = Self::new(metadata, offsets, windows);
        info!(
            metadata = cache.metadata.len(),
            offsets = cache.offsets.len(),
            windows = cache.windows.len(),
            "Reference cache ready"
        );
        Ok(cache)
    }

    pub fn metadata(&self, key: &ParamKey) -> Option<&ReferenceMetadata> {
        self.metadata.get(key)
    }

    /// Time offset for `key`, zero when none is configured.
    pub fn offset(&self, key: &ParamKey) -> Period {
        self.offsets.get(key).copied().unwrap_or(Period::ZERO)
    }

    pub fn window(&self, key: &ParamKey, station: i64) -> Option<&ValidityWindow> {
        self.windows.get(&(key.clone(), station))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_read_offsets() {
        let csv = "table_name,elem_code,paramid,fromtime_offset,timespan\n\
                   T_DIURNAL,tam,212,-PT6H,P1D\n\
                   T_MONTH,RR,1001,,P1M\n";
        let offsets = read_offsets(csv.as_bytes()).unwrap();
        assert_eq!(
            offsets[&ParamKey::new("TAM", "T_DIURNAL")],
            Period {
                days: 1,
                hours: -6,
                ..Period::ZERO
            }
        );
        assert_eq!(offsets[&ParamKey::new("RR", "T_MONTH")].months, 1);
    }

    #[test]
    fn test_bad_offset_is_an_error() {
        let csv = "table_name,elem_code,paramid,fromtime_offset,timespan\nT_MONTH,RR,1,soon,\n";
        assert!(matches!(
            read_offsets(csv.as_bytes()),
            Err(MigrationError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn test_lookups() {
        let meta = ReferenceMetadata {
            element_code: "TA".into(),
            table_name: "T_ADATA".into(),
            type_id: 501,
            param_id: 211,
            level: Some(2),
            sensor: Some(0),
            valid_from: None,
        };
        let window = ValidityWindow {
            table_name: "T_ADATA".into(),
            station_id: 18700,
            element_code: "ta".into(),
            from_time: Some(Utc.with_ymd_and_hms(1950, 1, 1, 0, 0, 0).unwrap()),
            to_time: None,
        };
        let cache = ReferenceCache::new(vec![meta.clone()], HashMap::new(), vec![window]);

        let key = ParamKey::new("TA", "T_ADATA");
        assert_eq!(cache.metadata(&key), Some(&meta));
        assert!(cache.offset(&key).is_zero());
        assert!(cache.window(&key, 18700).is_some());
        assert!(cache.window(&key, 50540).is_none());
    }
}
