//! In-memory stand-ins for the source and target archives.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};

use kdvh_common::{
    MigrationError, MigrationResult, ObsValue, ReferenceMetadata, TargetObservation, TimeseriesId,
    TimeseriesLabel, ValidityWindow,
};
use storage::{DumpRow, LegacySource, ObservationSink, ParameterSource, TimeseriesStore, UnitQuery};

#[derive(Debug, Default, Clone)]
struct MemoryTable {
    columns: Vec<String>,
    /// (station, time) -> element -> value. Only non-null cells are stored.
    cells: BTreeMap<(i64, DateTime<Utc>), HashMap<String, String>>,
}

impl MemoryTable {
    fn values(&self, station: i64, element: &str, year: Option<i32>) -> BTreeMap<DateTime<Utc>, String> {
        self.cells
            .iter()
            .filter(|((s, time), _)| *s == station && year.map_or(true, |y| time.year() == y))
            .filter_map(|((_, time), row)| row.get(element).map(|v| (*time, v.clone())))
            .collect()
    }
}

/// Legacy archive and parameter catalog held in memory.
///
/// Tables are keyed by upper-case name and columns are lower case, as in
/// the proxy. Row filters are not modelled.
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: HashMap<String, MemoryTable>,
    windows: HashMap<String, Vec<ValidityWindow>>,
    metadata: Vec<ReferenceMetadata>,
    fetches: AtomicUsize,
    column_reads: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare element columns of a table, even if they stay empty.
    pub fn with_columns(mut self, table: &str, columns: &[&str]) -> Self {
        let entry = self.tables.entry(table.to_uppercase()).or_default();
        for column in columns {
            let column = column.to_lowercase();
            if !entry.columns.contains(&column) {
                entry.columns.push(column);
            }
        }
        self
    }

    /// Store one non-null cell.
    pub fn with_value(
        mut self,
        table: &str,
        station: i64,
        element: &str,
        time: DateTime<Utc>,
        value: &str,
    ) -> Self {
        self = self.with_columns(table, &[element]);
        if let Some(entry) = self.tables.get_mut(&table.to_uppercase()) {
            entry
                .cells
                .entry((station, time))
                .or_default()
                .insert(element.to_lowercase(), value.to_string());
        }
        self
    }

    pub fn with_window(mut self, elem_table: &str, window: ValidityWindow) -> Self {
        self.windows
            .entry(elem_table.to_uppercase())
            .or_default()
            .push(window);
        self
    }

    pub fn with_metadata(mut self, metadata: ReferenceMetadata) -> Self {
        self.metadata.push(metadata);
        self
    }

    /// Number of `fetch_rows` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of `table_columns` calls so far.
    pub fn column_read_count(&self) -> usize {
        self.column_reads.load(Ordering::SeqCst)
    }

    fn table(&self, name: &str) -> MigrationResult<&MemoryTable> {
        self.tables
            .get(&name.to_uppercase())
            .ok_or_else(|| MigrationError::Database(format!("relation \"{}\" does not exist", name)))
    }
}

#[async_trait]
impl LegacySource for MemorySource {
    async fn table_columns(&self, table: &str) -> MigrationResult<Vec<String>> {
        self.column_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.table(table)?.columns.clone())
    }

    async fn stations_with_element(&self, table: &str, element: &str) -> MigrationResult<Vec<i64>> {
        let element = element.to_lowercase();
        let stations: BTreeSet<i64> = self
            .table(table)?
            .cells
            .iter()
            .filter(|(_, row)| row.contains_key(&element))
            .map(|((station, _), _)| *station)
            .collect();
        Ok(stations.into_iter().collect())
    }

    async fn year_range(&self, table: &str, station: i64) -> MigrationResult<Option<(i32, i32)>> {
        let years: BTreeSet<i32> = self
            .table(table)?
            .cells
            .keys()
            .filter(|(s, _)| *s == station)
            .map(|(_, time)| time.year())
            .collect();
        Ok(years.first().copied().zip(years.last().copied()))
    }

    async fn fetch_rows(&self, query: &UnitQuery) -> MigrationResult<Vec<DumpRow>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let element = query.element.to_lowercase();
        let data = self.table(&query.table)?.values(query.station, &element, query.year);

        let Some(flag_table) = &query.flag_table else {
            return Ok(data
                .into_iter()
                .map(|(time, value)| DumpRow {
                    time,
                    value: Some(value),
                    flag: Some(String::new()),
                })
                .collect());
        };

        let flags = self.table(flag_table)?.values(query.station, &element, query.year);
        let times: BTreeSet<DateTime<Utc>> = data.keys().chain(flags.keys()).copied().collect();

        Ok(times
            .into_iter()
            .map(|time| DumpRow {
                time,
                value: data.get(&time).cloned(),
                flag: flags.get(&time).cloned(),
            })
            .collect())
    }

    async fn validity_windows(
        &self,
        elem_table: &str,
        stations: Option<&[i64]>,
        elements: Option<&[String]>,
    ) -> MigrationResult<Vec<ValidityWindow>> {
        Ok(self
            .windows
            .get(&elem_table.to_uppercase())
            .map(|windows| {
                windows
                    .iter()
                    .filter(|w| stations.map_or(true, |s| s.contains(&w.station_id)))
                    .filter(|w| {
                        elements.map_or(true, |e| e.contains(&w.element_code.to_uppercase()))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ParameterSource for MemorySource {
    async fn parameter_metadata(
        &self,
        table: &str,
        elements: Option<&[String]>,
    ) -> MigrationResult<Vec<ReferenceMetadata>> {
        Ok(self
            .metadata
            .iter()
            .filter(|m| m.table_name == table)
            .filter(|m| elements.map_or(true, |e| e.contains(&m.element_code.to_uppercase())))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredTimeseries {
    pub id: TimeseriesId,
    pub label: TimeseriesLabel,
    pub valid_from: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct TargetState {
    timeseries: Vec<StoredTimeseries>,
    data: BTreeMap<(TimeseriesId, DateTime<Utc>), ObsValue>,
    flags: BTreeMap<(TimeseriesId, DateTime<Utc>), (String, String)>,
}

impl TargetState {
    // Option equality matches NULL with NULL only, like the
    // COALESCE-based unique index.
    fn find(&self, label: &TimeseriesLabel) -> Option<TimeseriesId> {
        self.timeseries
            .iter()
            .find(|ts| ts.label == *label)
            .map(|ts| ts.id)
    }

    fn insert(&mut self, label: &TimeseriesLabel, valid_from: Option<DateTime<Utc>>) -> TimeseriesId {
        let id = TimeseriesId(self.timeseries.len() as i32 + 1);
        self.timeseries.push(StoredTimeseries {
            id,
            label: label.clone(),
            valid_from,
        });
        id
    }
}

/// Target archive held in memory.
///
/// Loads follow `ON CONFLICT DO NOTHING`: a row whose (timeseries, time)
/// already exists is not counted.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    state: Mutex<TargetState>,
    creates: AtomicUsize,
    race_next_create: AtomicBool,
    fail_loads: AtomicBool,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_timeseries` lose a race: the label is created
    /// behind its back and the call fails with a unique violation.
    pub fn lose_next_create(&self) {
        self.race_next_create.store(true, Ordering::SeqCst);
    }

    /// Make every following bulk load fail.
    pub fn fail_loads(&self) {
        self.fail_loads.store(true, Ordering::SeqCst);
    }

    /// Successful `create_timeseries` calls.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn timeseries(&self) -> Vec<StoredTimeseries> {
        self.lock().timeseries.clone()
    }

    pub fn data(&self) -> Vec<(TimeseriesId, DateTime<Utc>, ObsValue)> {
        self.lock()
            .data
            .iter()
            .map(|((id, time), value)| (*id, *time, value.clone()))
            .collect()
    }

    /// (timeseries, time, controlinfo, useinfo) rows of the flags table.
    pub fn flags(&self) -> Vec<(TimeseriesId, DateTime<Utc>, String, String)> {
        self.lock()
            .flags
            .iter()
            .map(|((id, time), (control, usage))| (*id, *time, control.clone(), usage.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TargetState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_loads(&self) -> MigrationResult<()> {
        if self.fail_loads.load(Ordering::SeqCst) {
            Err(MigrationError::BulkLoad("injected load failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TimeseriesStore for MemoryTarget {
    async fn find_timeseries(&self, label: &TimeseriesLabel) -> MigrationResult<Option<TimeseriesId>> {
        Ok(self.lock().find(label))
    }

    async fn create_timeseries(
        &self,
        label: &TimeseriesLabel,
        valid_from: Option<DateTime<Utc>>,
    ) -> MigrationResult<TimeseriesId> {
        let mut state = self.lock();

        if self.race_next_create.swap(false, Ordering::SeqCst) {
            state.insert(label, valid_from);
        }

        if state.find(label).is_some() {
            return Err(MigrationError::UniqueViolation(format!(
                "label for station {} param {} already exists",
                label.station_id, label.param_id
            )));
        }

        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(state.insert(label, valid_from))
    }
}

#[async_trait]
impl ObservationSink for MemoryTarget {
    async fn load_data(&self, rows: &[TargetObservation]) -> MigrationResult<u64> {
        self.check_loads()?;
        let mut state = self.lock();
        let mut inserted = 0;
        for row in rows {
            let key = (row.timeseries, row.obs_time);
            if !state.data.contains_key(&key) {
                state.data.insert(key, row.value.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn load_flags(&self, rows: &[TargetObservation]) -> MigrationResult<u64> {
        self.check_loads()?;
        let mut state = self.lock();
        let mut inserted = 0;
        for row in rows {
            let key = (row.timeseries, row.obs_time);
            if !state.flags.contains_key(&key) {
                state
                    .flags
                    .insert(key, (row.control_flags.clone(), row.use_flags.clone()));
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
