//! Dump file layout and the `timestamp<sep>value<sep>flag` record codec.
//!
//! Files live at `<base>/<TABLE>_combined/<station>/<element>.csv`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use kdvh_common::{format_dump_time, parse_dump_time, MigrationError, MigrationResult};
use storage::DumpRow;

/// Header written (and skipped) when dump files carry one.
pub const HEADER: [&str; 3] = ["time", "data", "flag"];

/// Directory holding every dumped unit of `table`.
pub fn table_dir(base: &Path, table: &str) -> PathBuf {
    base.join(format!("{}_combined", table))
}

pub fn station_dir(base: &Path, table: &str, station: i64) -> PathBuf {
    table_dir(base, table).join(station.to_string())
}

pub fn unit_file(base: &Path, table: &str, station: i64, element: &str) -> PathBuf {
    station_dir(base, table, station).join(format!("{}.csv", element))
}

/// Element code of a dump file name (`ta.csv` -> `TA`).
pub fn element_from_file_name(name: &str) -> String {
    name.strip_suffix(".csv").unwrap_or(name).to_uppercase()
}

/// Separator and header settings shared by writer and reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpFormat {
    pub separator: u8,
    pub has_header: bool,
}

impl Default for DumpFormat {
    fn default() -> Self {
        Self {
            separator: b';',
            has_header: false,
        }
    }
}

/// One decoded line of a dump file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRecord {
    pub time: DateTime<Utc>,
    pub value: String,
    pub flag: String,
}

/// Writes unit rows to a dump file.
pub struct DumpWriter<W: Write> {
    inner: csv::Writer<W>,
    written: usize,
}

impl DumpWriter<File> {
    /// Create (truncate) `path` and write the header if configured.
    pub fn create(path: &Path, format: DumpFormat) -> MigrationResult<Self> {
        let file = File::create(path)?;
        let mut writer = Self::new(file, format);
        if format.has_header {
            writer.write_header()?;
        }
        Ok(writer)
    }

    /// Open `path` for appending further rows.
    pub fn append(path: &Path, format: DumpFormat) -> MigrationResult<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self::new(file, format))
    }
}

impl<W: Write> DumpWriter<W> {
    pub fn new(writer: W, format: DumpFormat) -> Self {
        let inner = csv::WriterBuilder::new()
            .delimiter(format.separator)
            .has_headers(false)
            .from_writer(writer);
        Self { inner, written: 0 }
    }

    fn write_header(&mut self) -> MigrationResult<()> {
        self.inner.write_record(HEADER).map_err(csv_error)
    }

    pub fn write_row(&mut self, row: &DumpRow) -> MigrationResult<()> {
        let time = format_dump_time(&row.time);
        self.inner
            .write_record([
                time.as_str(),
                row.value.as_deref().unwrap_or(""),
                row.flag.as_deref().unwrap_or(""),
            ])
            .map_err(csv_error)?;
        self.written += 1;
        Ok(())
    }

    pub fn write_rows(&mut self, rows: &[DumpRow]) -> MigrationResult<()> {
        rows.iter().try_for_each(|row| self.write_row(row))
    }

    /// Flush and return the number of rows written.
    pub fn finish(mut self) -> MigrationResult<usize> {
        self.inner.flush()?;
        Ok(self.written)
    }
}

/// Streams records out of a dump file.
///
/// Each item carries the 1-based line number so errors can be reported
/// per line without aborting the file.
pub struct DumpReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
}

impl DumpReader<File> {
    pub fn open(path: &Path, format: DumpFormat) -> MigrationResult<Self> {
        let file = File::open(path)?;
        Ok(Self::new(file, format))
    }
}

impl<R: Read> DumpReader<R> {
    pub fn new(reader: R, format: DumpFormat) -> Self {
        let records = csv::ReaderBuilder::new()
            .delimiter(format.separator)
            .has_headers(format.has_header)
            .flexible(true)
            .from_reader(reader)
            .into_records();
        Self { records }
    }
}

impl<R: Read> Iterator for DumpReader<R> {
    type Item = (u64, MigrationResult<DumpRecord>);

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.records.next()?;
        Some(match result {
            Ok(record) => {
                let line = record.position().map_or(0, |p| p.line());
                (line, decode(line, &record))
            }
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line());
                (
                    line,
                    Err(MigrationError::MalformedLine {
                        line,
                        message: e.to_string(),
                    }),
                )
            }
        })
    }
}

fn decode(line: u64, record: &csv::StringRecord) -> MigrationResult<DumpRecord> {
    if record.len() != HEADER.len() {
        return Err(MigrationError::MalformedLine {
            line,
            message: format!("expected {} fields, found {}", HEADER.len(), record.len()),
        });
    }

    Ok(DumpRecord {
        time: parse_dump_time(&record[0])?,
        value: record[1].to_string(),
        flag: record[2].to_string(),
    })
}

fn csv_error(e: csv::Error) -> MigrationError {
    MigrationError::Io(format!("CSV error: {}", e))
}
