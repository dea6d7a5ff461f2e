//! Table catalog: how each KDVH table family is dumped and converted.
//!
//! In KDVH a table family usually consists of
//! - a `T_*` table holding observation values,
//! - a companion flag table with the same `dato | stnr | <elements>` layout,
//! - a `T_ELEM_*` table with per-station validity windows.

use serde::Serialize;

use conversion::ConversionFamily;
use kdvh_common::{MigrationError, MigrationResult};
use storage::RowFilter;

/// How rows of a unit are pulled from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// One query per (station, element) over the whole history.
    SinglePass,
    /// One query per (station, element, year).
    SplitByYear,
}

/// Static description of one table family.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSpec {
    pub table_name: String,
    pub flag_table: Option<String>,
    pub elem_table: Option<String>,
    pub family: ConversionFamily,
    pub strategy: ExtractionStrategy,
    /// Rows from this year onwards are not imported. `None` means dump only.
    pub cutoff_year: Option<i32>,
    /// Elements to dump instead of discovering them from the schema.
    pub fixed_elements: Option<Vec<String>>,
    pub row_filter: RowFilter,
}

impl TableSpec {
    pub fn new(table_name: &str, flag_table: Option<&str>, elem_table: Option<&str>) -> Self {
        Self {
            table_name: table_name.to_string(),
            flag_table: flag_table.map(String::from),
            elem_table: elem_table.map(String::from),
            family: ConversionFamily::Generic,
            strategy: ExtractionStrategy::SinglePass,
            cutoff_year: None,
            fixed_elements: None,
            row_filter: RowFilter::None,
        }
    }

    pub fn import_until(mut self, year: i32) -> Self {
        self.cutoff_year = Some(year);
        self
    }

    pub fn family(mut self, family: ConversionFamily) -> Self {
        self.family = family;
        self
    }

    pub fn split_by_year(mut self) -> Self {
        self.strategy = ExtractionStrategy::SplitByYear;
        self
    }

    pub fn elements(mut self, elements: &[&str]) -> Self {
        self.fixed_elements = Some(elements.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn row_filter(mut self, filter: RowFilter) -> Self {
        self.row_filter = filter;
        self
    }

    pub fn is_importable(&self) -> bool {
        self.cutoff_year.is_some()
    }
}

/// Immutable registry of table families, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    tables: Vec<TableSpec>,
}

impl TableCatalog {
    pub fn new(tables: Vec<TableSpec>) -> Self {
        Self { tables }
    }

    /// The KDVH tables known to the migration.
    pub fn standard() -> Self {
        use ConversionFamily::*;

        Self::new(vec![
            // Migrated in full
            TableSpec::new("T_EDATA", Some("T_EFLAG"), Some("T_ELEM_EDATA"))
                .family(EData)
                .import_until(3000),
            TableSpec::new("T_METARDATA", None, Some("T_ELEM_METARDATA")).import_until(3000),
            // Partly present in kvalobs, imported up to 2005-12-31
            TableSpec::new("T_ADATA", Some("T_AFLAG"), Some("T_ELEM_OBS")).import_until(2006),
            TableSpec::new("T_MDATA", Some("T_MFLAG"), Some("T_ELEM_OBS")).import_until(2006),
            TableSpec::new("T_TJ_DATA", Some("T_TJ_FLAG"), Some("T_ELEM_OBS")).import_until(2006),
            TableSpec::new("T_PDATA", Some("T_PFLAG"), Some("T_ELEM_OBS"))
                .family(PData)
                .import_until(2006),
            TableSpec::new("T_NDATA", Some("T_NFLAG"), Some("T_ELEM_OBS"))
                .family(NData)
                .import_until(2006),
            TableSpec::new("T_VDATA", Some("T_VFLAG"), Some("T_ELEM_OBS"))
                .family(VData)
                .import_until(2006),
            TableSpec::new("T_UTLANDDATA", Some("T_UTLANDFLAG"), Some("T_ELEM_OBS"))
                .import_until(2006),
            // Dump only
            TableSpec::new("T_10MINUTE_DATA", Some("T_10MINUTE_FLAG"), Some("T_ELEM_OBS"))
                .split_by_year(),
            TableSpec::new("T_ADATA_LEVEL", Some("T_AFLAG_LEVEL"), Some("T_ELEM_OBS")),
            TableSpec::new("T_AVINOR", Some("T_AVINOR_FLAG"), Some("T_ELEM_OBS")),
            TableSpec::new("T_PROJDATA", Some("T_PROJFLAG"), Some("T_ELEM_PROJ")),
            TableSpec::new("T_MINUTE_DATA", Some("T_MINUTE_FLAG"), Some("T_ELEM_OBS"))
                .split_by_year(),
            TableSpec::new("T_SECOND_DATA", Some("T_SECOND_FLAG"), Some("T_ELEM_OBS"))
                .split_by_year(),
            TableSpec::new("T_CDCV_DATA", Some("T_CDCV_FLAG"), Some("T_ELEM_EDATA")),
            TableSpec::new("T_MERMAID", Some("T_MERMAID_FLAG"), Some("T_ELEM_EDATA")),
            TableSpec::new("T_SVVDATA", Some("T_SVVFLAG"), Some("T_ELEM_OBS")),
            // Products
            TableSpec::new("T_MONTH", Some("T_MONTH_FLAG"), Some("T_ELEM_MONTH"))
                .family(Product)
                .import_until(1957),
            TableSpec::new("T_DIURNAL", Some("T_DIURNAL_FLAG"), Some("T_ELEM_DIURNAL"))
                .family(Product),
            TableSpec::new("T_HOMOGEN_DIURNAL", None, Some("T_ELEM_HOMOGEN_MONTH"))
                .family(Product),
            TableSpec::new("T_HOMOGEN_MONTH", None, Some("T_ELEM_HOMOGEN_MONTH"))
                .family(Product)
                .elements(&["rr", "tam"])
                .row_filter(RowFilter::MonthlySeasons),
        ])
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    /// Look up a table family by name (case-insensitive).
    pub fn get(&self, name: &str) -> MigrationResult<&TableSpec> {
        self.tables
            .iter()
            .find(|t| t.table_name.eq_ignore_ascii_case(name))
            .ok_or_else(|| MigrationError::UnknownTable(name.to_string()))
    }

    /// Tables named in `allow`, or every table when no list is given.
    ///
    /// Unknown names are returned separately so the caller can report them.
    pub fn select(&self, allow: Option<&[String]>) -> (Vec<&TableSpec>, Vec<MigrationError>) {
        match allow {
            None => (self.tables.iter().collect(), Vec::new()),
            Some(names) => {
                let mut found = Vec::new();
                let mut unknown = Vec::new();
                for name in names {
                    match self.get(name) {
                        Ok(spec) if !found.contains(&spec) => found.push(spec),
                        Ok(_) => {}
                        Err(e) => unknown.push(e),
                    }
                }
                (found, unknown)
            }
        }
    }
}
