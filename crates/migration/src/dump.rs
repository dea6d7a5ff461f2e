//! Dump planner and extractor.
//!
//! For every table: discover elements from the schema, then for every
//! element the stations that actually carry it, and write one file per
//! (station, element) unit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use kdvh_common::{ExtractionUnit, MigrationError, MigrationResult};
use storage::{DumpRow, LegacySource, UnitQuery, EXCLUDED_COLUMNS};

use crate::catalog::{ExtractionStrategy, TableSpec};
use crate::dumpfile::{station_dir, table_dir, unit_file, DumpFormat, DumpWriter};
use crate::options::DumpOptions;

/// Outcome of dumping one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitDump {
    pub unit: ExtractionUnit,
    pub rows: usize,
    pub path: PathBuf,
}

/// Outcome of dumping one table.
#[derive(Debug, Clone, Default)]
pub struct DumpReport {
    pub table: String,
    /// Output directory already existed and overwrite was not requested.
    pub skipped: bool,
    pub units: Vec<UnitDump>,
    pub failed: Vec<(ExtractionUnit, String)>,
}

impl DumpReport {
    pub fn rows(&self) -> usize {
        self.units.iter().map(|u| u.rows).sum()
    }
}

/// Element columns of a table, after the structural deny-list.
pub fn is_element_column(column: &str) -> bool {
    let lower = column.to_lowercase();
    !EXCLUDED_COLUMNS.contains(&lower.as_str()) && !lower.contains("kopi")
}

/// Inclusive year range covering both sources.
pub fn union_years(data: Option<(i32, i32)>, flags: Option<(i32, i32)>) -> Option<(i32, i32)> {
    match (data, flags) {
        (Some((db, de)), Some((fb, fe))) => Some((db.min(fb), de.max(fe))),
        (Some(range), None) | (None, Some(range)) => Some(range),
        (None, None) => None,
    }
}

/// Flag table to join for `element`, if its columns carry that element.
fn flag_table_for(table: &TableSpec, flag_columns: Option<&[String]>, element: &str) -> Option<String> {
    let (Some(flag_table), Some(columns)) = (&table.flag_table, flag_columns) else {
        return None;
    };

    if columns.iter().any(|c| c.eq_ignore_ascii_case(element)) {
        Some(flag_table.clone())
    } else {
        info!(element = %element, flag_table = %flag_table, "Element missing from flag table, dumping data only");
        None
    }
}

/// Dumps tables from the legacy source to the filesystem.
pub struct Dumper {
    source: Arc<dyn LegacySource>,
    options: DumpOptions,
}

impl Dumper {
    pub fn new(source: Arc<dyn LegacySource>, options: DumpOptions) -> Self {
        Self { source, options }
    }

    /// Dump a whole table. The table is skipped entirely when its output
    /// directory exists and overwrite is off.
    #[instrument(skip(self, table), fields(table = %table.table_name))]
    pub async fn dump_table(&self, table: &TableSpec) -> MigrationResult<DumpReport> {
        let mut report = DumpReport {
            table: table.table_name.clone(),
            ..Default::default()
        };

        let outdir = table_dir(&self.options.base_dir, &table.table_name);
        if outdir.is_dir() && !self.options.overwrite {
            info!(path = %outdir.display(), "Skipping dump because the dumped folder already exists");
            report.skipped = true;
            return Ok(report);
        }

        info!("Starting dump");
        let elements = self.elements(table).await?;
        let flag_columns = self.flag_columns(table).await?;

        for element in elements {
            let flag_table = flag_table_for(table, flag_columns.as_deref(), &element);

            let stations = match self.stations(table, &element).await {
                Ok(stations) => stations,
                Err(e) => {
                    error!(element = %element, error = %e, "Could not fetch stations");
                    continue;
                }
            };

            for station in stations {
                let unit = ExtractionUnit::new(&table.table_name, station, &element);
                match self.dump_unit(table, flag_table.clone(), &unit).await {
                    Ok(dumped) => {
                        info!(station, element = %element, rows = dumped.rows, "Dumped successfully");
                        report.units.push(dumped);
                    }
                    Err(e) => {
                        error!(station, element = %element, error = %e, "Unit dump failed");
                        report.failed.push((unit, e.to_string()));
                    }
                }
            }
        }

        info!(units = report.units.len(), failed = report.failed.len(), rows = report.rows(), "Finished dump");
        Ok(report)
    }

    /// Elements to dump, after the deny-list and the allow-list.
    async fn elements(&self, table: &TableSpec) -> MigrationResult<Vec<String>> {
        let available = match &table.fixed_elements {
            Some(fixed) => fixed.clone(),
            None => self
                .source
                .table_columns(&table.table_name)
                .await?
                .into_iter()
                .filter(|c| is_element_column(c))
                .collect(),
        };

        let selection = &self.options.selection;
        if let Some(wanted) = &selection.elements {
            for element in wanted {
                if !available.iter().any(|a| a.eq_ignore_ascii_case(element)) {
                    warn!(element = %element, "Element not present in table, skipping");
                }
            }
        }

        Ok(available
            .into_iter()
            .filter(|e| selection.allows_element(e))
            .collect())
    }

    async fn stations(&self, table: &TableSpec, element: &str) -> MigrationResult<Vec<i64>> {
        let found = self
            .source
            .stations_with_element(&table.table_name, element)
            .await?;

        let selection = &self.options.selection;
        if let Some(wanted) = &selection.stations {
            for station in wanted {
                if !found.contains(station) {
                    warn!(station, element = %element, "Element not available for station, skipping");
                }
            }
        }

        Ok(found
            .into_iter()
            .filter(|s| selection.allows_station(*s))
            .collect())
    }

    /// Columns of the companion flag table, read once per table.
    async fn flag_columns(&self, table: &TableSpec) -> MigrationResult<Option<Vec<String>>> {
        match &table.flag_table {
            Some(flag_table) => Ok(Some(self.source.table_columns(flag_table).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, table, flag_table), fields(station = unit.station_id, element = %unit.element_code))]
    async fn dump_unit(
        &self,
        table: &TableSpec,
        flag_table: Option<String>,
        unit: &ExtractionUnit,
    ) -> MigrationResult<UnitDump> {
        let dir = station_dir(&self.options.base_dir, &unit.table, unit.station_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = unit_file(&self.options.base_dir, &unit.table, unit.station_id, &unit.element_code);

        let base = UnitQuery {
            table: table.table_name.clone(),
            flag_table,
            element: unit.element_code.clone(),
            station: unit.station_id,
            year: None,
            filter: table.row_filter,
        };

        let rows = match table.strategy {
            ExtractionStrategy::SinglePass => {
                let rows = self.source.fetch_rows(&base).await?;
                write_rows(path.clone(), self.options.format, rows, false).await?
            }
            ExtractionStrategy::SplitByYear => self.dump_by_year(&base, &path).await?,
        };

        Ok(UnitDump {
            unit: unit.clone(),
            rows,
            path,
        })
    }

    /// One query per year over the union of the data and flag year ranges,
    /// appended to the same file in year order.
    async fn dump_by_year(&self, base: &UnitQuery, path: &Path) -> MigrationResult<usize> {
        let data_years = self.source.year_range(&base.table, base.station).await?;
        let flag_years = match &base.flag_table {
            Some(flag_table) => self.source.year_range(flag_table, base.station).await?,
            None => None,
        };

        // Start from an empty file so a unit without rows still leaves one.
        let mut total = write_rows(path.to_path_buf(), self.options.format, Vec::new(), false).await?;

        let Some((begin, end)) = union_years(data_years, flag_years) else {
            return Ok(total);
        };

        for year in begin..=end {
            let query = UnitQuery {
                year: Some(year),
                ..base.clone()
            };
            let rows = self.source.fetch_rows(&query).await?;
            if !rows.is_empty() {
                total += write_rows(path.to_path_buf(), self.options.format, rows, true).await?;
            }
        }

        Ok(total)
    }
}

/// Write rows on the blocking pool. `append` keeps existing content.
async fn write_rows(
    path: PathBuf,
    format: DumpFormat,
    rows: Vec<DumpRow>,
    append: bool,
) -> MigrationResult<usize> {
    tokio::task::spawn_blocking(move || {
        let mut writer = if append {
            DumpWriter::append(&path, format)?
        } else {
            DumpWriter::create(&path, format)?
        };
        writer.write_rows(&rows)?;
        writer.finish()
    })
    .await
    .map_err(|e| MigrationError::Io(format!("Dump writer task failed: {}", e)))?
}
