//! Common fixtures for migration tests.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};

use kdvh_common::{ReferenceMetadata, ValidityWindow};

/// Stations that show up across the tests.
pub mod stations {
    pub const BLINDERN: i64 = 18700;
    pub const VARDO: i64 = 98550;
    pub const SVALBARD: i64 = 99840;
    pub const HEMSEDAL: i64 = 77062;
}

/// UTC timestamp shorthand.
pub fn utc(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid fixture time {year}-{month}-{day} {hour}h"))
}

/// Parameter catalog entry with level 2 and sensor 0, like most
/// surface parameters.
pub fn sample_metadata(element: &str, table: &str, param_id: i32) -> ReferenceMetadata {
    ReferenceMetadata {
        element_code: element.to_uppercase(),
        table_name: table.to_string(),
        type_id: 501,
        param_id,
        level: Some(2),
        sensor: Some(0),
        valid_from: Some(utc(1950, 1, 1, 0)),
    }
}

/// Parameter catalog entry without level or sensor.
pub fn bare_metadata(element: &str, table: &str, param_id: i32) -> ReferenceMetadata {
    ReferenceMetadata {
        level: None,
        sensor: None,
        ..sample_metadata(element, table, param_id)
    }
}

pub fn window(
    table: &str,
    station: i64,
    element: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> ValidityWindow {
    ValidityWindow {
        table_name: table.to_string(),
        station_id: station,
        element_code: element.to_uppercase(),
        from_time: from,
        to_time: to,
    }
}

/// Write a dump file at `<base>/<table>_combined/<station>/<element>.csv`.
pub fn write_dump_file(base: &Path, table: &str, station: i64, element: &str, lines: &[&str]) -> PathBuf {
    let dir = base.join(format!("{}_combined", table)).join(station.to_string());
    fs::create_dir_all(&dir).unwrap_or_else(|e| panic!("could not create {}: {e}", dir.display()));

    let path = dir.join(format!("{}.csv", element));
    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    fs::write(&path, contents).unwrap_or_else(|e| panic!("could not write {}: {e}", path.display()));
    path
}

/// Offsets CSV in the layout of `product_offsets.csv`.
pub fn write_offsets_file(dir: &Path, rows: &[(&str, &str, &str, &str)]) -> PathBuf {
    let mut contents = String::from("table_name,elem_code,paramid,fromtime_offset,timespan\n");
    for (table, element, from, span) in rows {
        contents.push_str(&format!("{},{},0,{},{}\n", table, element, from, span));
    }
    let path = dir.join("product_offsets.csv");
    fs::write(&path, contents).unwrap_or_else(|e| panic!("could not write {}: {e}", path.display()));
    path
}
