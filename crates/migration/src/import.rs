//! Import coordinator.
//!
//! Stations are processed one after the other; every element file of a
//! station is imported as its own task and the station is finished only
//! when all of them have joined.

use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn, Span};

use conversion::{ConversionContext, ConversionFamily};
use kdvh_common::time::year_of;
use kdvh_common::{
    ExtractionUnit, MigrationError, MigrationResult, RawObservation, TargetObservation,
    TimeseriesId, WindowPosition,
};
use storage::ObservationSink;

use crate::catalog::TableSpec;
use crate::dumpfile::{element_from_file_name, table_dir, DumpFormat, DumpReader};
use crate::options::ImportOptions;
use crate::resolver::IdentityResolver;

/// Element codes that are never imported.
pub const EXCLUDED_ELEMENTS: [&str; 9] = [
    "TYPEID",
    "TAM_NORMAL_9120",
    "RRA_NORMAL_9120",
    "OT",
    "OTN",
    "OTX",
    "DD06",
    "DD12",
    "DD18",
];

pub fn is_importable_element(element: &str) -> bool {
    let upper = element.to_uppercase();
    !upper.contains("KOPI") && !EXCLUDED_ELEMENTS.contains(&upper.as_str())
}

/// Counts for one imported unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitReport {
    pub unit: ExtractionUnit,
    pub timeseries: TimeseriesId,
    /// Lines read before the cutoff or the end of the window stopped reading.
    pub lines_read: usize,
    /// Malformed lines and rows that failed conversion.
    pub rows_dropped: usize,
    pub rows_converted: usize,
    pub data_inserted: Option<u64>,
    pub flags_inserted: Option<u64>,
}

/// Outcome of importing one table.
#[derive(Debug, Clone, Default)]
pub struct TableReport {
    pub table: String,
    pub skipped: bool,
    pub units: Vec<UnitReport>,
    pub failed: Vec<(ExtractionUnit, String)>,
}

impl TableReport {
    pub fn rows_converted(&self) -> usize {
        self.units.iter().map(|u| u.rows_converted).sum()
    }
}

/// Rows of one unit after parsing and conversion.
#[derive(Debug, Default)]
struct ParsedUnit {
    rows: Vec<TargetObservation>,
    lines_read: usize,
    dropped: usize,
}

/// Immutable per-run state handed to every unit task.
struct Shared {
    resolver: Arc<IdentityResolver>,
    sink: Arc<dyn ObservationSink>,
    format: DumpFormat,
    skip_data: bool,
    skip_flags: bool,
}

/// Imports dumped tables into the target archive.
pub struct Importer {
    shared: Arc<Shared>,
    options: ImportOptions,
}

impl Importer {
    pub fn new(
        resolver: Arc<IdentityResolver>,
        sink: Arc<dyn ObservationSink>,
        options: ImportOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            resolver,
            sink,
            format: options.format,
            skip_data: options.skip_data,
            skip_flags: options.skip_flags,
        });
        Self { shared, options }
    }

    /// Import every dumped unit of `table`.
    ///
    /// A panic inside a unit task is re-raised here so that it reaches
    /// the table boundary.
    #[instrument(skip(self, table), fields(table = %table.table_name))]
    pub async fn import_table(&self, table: &TableSpec) -> MigrationResult<TableReport> {
        let mut report = TableReport {
            table: table.table_name.clone(),
            ..Default::default()
        };

        if !table.is_importable() {
            info!("Table has no import cutoff, skipping");
            report.skipped = true;
            return Ok(report);
        }

        let dir = table_dir(&self.options.base_dir, &table.table_name);
        if !dir.is_dir() {
            warn!(path = %dir.display(), "No dump found for table, skipping");
            report.skipped = true;
            return Ok(report);
        }

        info!("Starting import");
        let table = Arc::new(table.clone());

        for (station, station_path) in self.station_dirs(&dir).await? {
            let files = match self.element_files(&station_path).await {
                Ok(files) => files,
                Err(e) => {
                    error!(station, error = %e, "Could not list station directory");
                    continue;
                }
            };

            let mut tasks = JoinSet::new();
            for (element, path) in files {
                let unit = ExtractionUnit::new(&table.table_name, station, element);
                let shared = Arc::clone(&self.shared);
                let table = Arc::clone(&table);
                tasks.spawn(async move {
                    let result = import_unit(&shared, &table, &unit, &path).await;
                    (unit, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((unit, Ok(unit_report))) => report.units.push(unit_report),
                    Ok((unit, Err(e))) => {
                        error!(
                            station = unit.station_id,
                            element = %unit.element_code,
                            kind = e.kind(),
                            error = %e,
                            "Unit import failed"
                        );
                        report.failed.push((unit, e.to_string()));
                    }
                    Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
                    Err(e) => error!(station, error = %e, "Unit task cancelled"),
                }
            }
        }

        info!(
            units = report.units.len(),
            failed = report.failed.len(),
            rows = report.rows_converted(),
            "Finished import"
        );
        Ok(report)
    }

    /// Station directories, in ascending station order.
    async fn station_dirs(&self, dir: &Path) -> MigrationResult<Vec<(i64, PathBuf)>> {
        let mut stations = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(station) = name.parse::<i64>() else {
                warn!(directory = %name, "Not a station directory, skipping");
                continue;
            };
            if self.options.selection.allows_station(station) {
                stations.push((station, entry.path()));
            }
        }

        stations.sort_by_key(|(station, _)| *station);
        Ok(stations)
    }

    /// Element files of one station after the deny-list and selection.
    async fn element_files(&self, dir: &Path) -> MigrationResult<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".csv") {
                continue;
            }
            let element = element_from_file_name(&name);
            if is_importable_element(&element) && self.options.selection.allows_element(&element) {
                files.push((element, entry.path()));
            }
        }

        files.sort();
        Ok(files)
    }
}

#[instrument(skip_all, fields(station = unit.station_id, element = %unit.element_code))]
async fn import_unit(
    shared: &Shared,
    table: &TableSpec,
    unit: &ExtractionUnit,
    path: &Path,
) -> MigrationResult<UnitReport> {
    let resolved = shared
        .resolver
        .resolve(&unit.element_code, &unit.table, unit.station_id)
        .await?;

    let ctx = ConversionContext::new(resolved.timeseries, &unit.element_code)
        .with_offset(resolved.offset)
        .with_window(resolved.window);

    let parsed = {
        let path = path.to_path_buf();
        let unit = unit.clone();
        let family = table.family;
        let cutoff = table.cutoff_year;
        let format = shared.format;
        let span = Span::current();
        tokio::task::spawn_blocking(move || {
            span.in_scope(|| read_unit(&path, format, &unit, family, &ctx, cutoff))
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                panic::resume_unwind(e.into_panic());
            }
            MigrationError::Io(format!("Parser task failed: {}", e))
        })??
    };

    let mut report = UnitReport {
        unit: unit.clone(),
        timeseries: resolved.timeseries,
        lines_read: parsed.lines_read,
        rows_dropped: parsed.dropped,
        rows_converted: parsed.rows.len(),
        data_inserted: None,
        flags_inserted: None,
    };

    if parsed.rows.is_empty() {
        info!(lines = parsed.lines_read, "No rows to import, skipping unit");
        return Ok(report);
    }

    if !shared.skip_data {
        let inserted = shared.sink.load_data(&parsed.rows).await?;
        check_count("data", inserted, parsed.rows.len());
        report.data_inserted = Some(inserted);
    }

    if !shared.skip_flags {
        let inserted = shared.sink.load_flags(&parsed.rows).await?;
        check_count("flags", inserted, parsed.rows.len());
        report.flags_inserted = Some(inserted);
    }

    Ok(report)
}

fn check_count(target: &str, inserted: u64, submitted: usize) {
    if inserted != submitted as u64 {
        warn!(target_table = target, inserted, submitted, "Row count mismatch after bulk load");
    } else {
        info!(target_table = target, inserted, "Imported rows");
    }
}

/// Parse and convert one dump file. Rows are chronological, so reading
/// stops at the first row past the window or at the cutoff year.
fn read_unit(
    path: &Path,
    format: DumpFormat,
    unit: &ExtractionUnit,
    family: ConversionFamily,
    ctx: &ConversionContext,
    cutoff_year: Option<i32>,
) -> MigrationResult<ParsedUnit> {
    let mut parsed = ParsedUnit::default();

    for (line, record) in DumpReader::open(path, format)? {
        parsed.lines_read += 1;

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(line, error = %e, "Dropping malformed line");
                parsed.dropped += 1;
                continue;
            }
        };

        if matches!(cutoff_year, Some(cutoff) if year_of(&record.time) >= cutoff) {
            break;
        }

        match ctx.window_position(&record.time) {
            WindowPosition::Before => continue,
            WindowPosition::After => break,
            WindowPosition::Inside => {}
        }

        let raw = RawObservation {
            station_id: unit.station_id,
            table: unit.table.clone(),
            element_code: unit.element_code.clone(),
            obs_time: record.time,
            raw_value: record.value,
            raw_flags: record.flag,
        };

        match family.convert(&raw, ctx) {
            Ok(Some(obs)) => parsed.rows.push(obs),
            Ok(None) => {}
            Err(e) => {
                warn!(line, error = %e, "Dropping row that failed conversion");
                parsed.dropped += 1;
            }
        }
    }

    Ok(parsed)
}
