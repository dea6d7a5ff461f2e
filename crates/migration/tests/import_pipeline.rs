use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use kdvh_common::{ObsValue, ParamKey, Period};
use migration::catalog::TableSpec;
use migration::{
    DumpFormat, DumpOptions, Dumper, IdentityResolver, ImportOptions, Importer, ReferenceCache,
    Selection, TableCatalog,
};
use conversion::ConversionFamily;
use test_utils::{sample_metadata, stations, utc, window, write_dump_file, MemorySource, MemoryTarget};

fn import_options(base: &Path) -> ImportOptions {
    ImportOptions {
        base_dir: base.to_path_buf(),
        format: DumpFormat::default(),
        selection: Selection::default(),
        skip_data: false,
        skip_flags: false,
    }
}

fn importer(target: &Arc<MemoryTarget>, cache: ReferenceCache, options: ImportOptions) -> Importer {
    let resolver = Arc::new(IdentityResolver::new(target.clone(), Arc::new(cache)));
    Importer::new(resolver, target.clone(), options)
}

fn cache_for(metadata: Vec<kdvh_common::ReferenceMetadata>) -> ReferenceCache {
    ReferenceCache::new(metadata, HashMap::new(), vec![])
}

#[tokio::test]
async fn imports_a_generic_row() {
    let dir = tempfile::tempdir().unwrap();
    write_dump_file(
        dir.path(),
        "T_ADATA",
        stations::HEMSEDAL,
        "ta",
        &["2020-01-01_00:00:00;-5.3;00000"],
    );
    let table = TableSpec::new("T_ADATA", Some("T_AFLAG"), None).import_until(3000);
    let target = Arc::new(MemoryTarget::new());
    let importer = importer(
        &target,
        cache_for(vec![sample_metadata("TA", "T_ADATA", 211)]),
        import_options(dir.path()),
    );

    let report = importer.import_table(&table).await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.units.len(), 1);
    assert_eq!(report.units[0].data_inserted, Some(1));
    assert_eq!(report.units[0].flags_inserted, Some(1));

    let stored = target.timeseries();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].label.station_id, stations::HEMSEDAL);

    let data = target.data();
    assert_eq!(data, vec![(stored[0].id, utc(2020, 1, 1, 0), ObsValue::Scalar(-5.3))]);

    let flags = target.flags();
    assert_eq!(flags[0].2, "0000000000000000");
    assert_eq!(flags[0].3, "0000000900000000");
}

#[tokio::test]
async fn missing_metadata_does_not_stop_siblings() {
    let dir = tempfile::tempdir().unwrap();
    write_dump_file(dir.path(), "T_ADATA", stations::BLINDERN, "ta", &["2000-01-01_00:00:00;1.0;00000"]);
    write_dump_file(dir.path(), "T_ADATA", stations::BLINDERN, "rr_12", &["2000-01-01_06:00:00;0.2;00000"]);
    let table = TableSpec::new("T_ADATA", Some("T_AFLAG"), None).import_until(2006);
    let target = Arc::new(MemoryTarget::new());
    let importer = importer(
        &target,
        cache_for(vec![sample_metadata("TA", "T_ADATA", 211)]),
        import_options(dir.path()),
    );

    let report = importer.import_table(&table).await.unwrap();
    assert_eq!(report.units.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0.element_code, "RR_12");
    assert_eq!(target.data().len(), 1);
}

#[tokio::test]
async fn cutoff_window_and_deny_list_limit_rows() {
    let dir = tempfile::tempdir().unwrap();
    write_dump_file(
        dir.path(),
        "T_ADATA",
        stations::BLINDERN,
        "ta",
        &[
            "1949-12-31_00:00:00;0.5;00000",
            "2004-06-01_00:00:00;1.0;00000",
            "2005-12-31_18:00:00;2.0;00000",
            "2006-01-01_00:00:00;3.0;00000",
        ],
    );
    write_dump_file(dir.path(), "T_ADATA", stations::BLINDERN, "ot", &["2000-01-01_00:00:00;1.0;00000"]);
    write_dump_file(dir.path(), "T_ADATA", stations::BLINDERN, "ta_kopi", &["2000-01-01_00:00:00;1.0;00000"]);

    let table = TableSpec::new("T_ADATA", Some("T_AFLAG"), None).import_until(2006);
    let cache = ReferenceCache::new(
        vec![
            sample_metadata("TA", "T_ADATA", 211),
            sample_metadata("OT", "T_ADATA", 1),
            sample_metadata("TA_KOPI", "T_ADATA", 2),
        ],
        HashMap::new(),
        vec![window("T_ADATA", stations::BLINDERN, "ta", Some(utc(1950, 1, 1, 0)), None)],
    );
    let target = Arc::new(MemoryTarget::new());
    let importer = importer(&target, cache, import_options(dir.path()));

    let report = importer.import_table(&table).await.unwrap();
    assert_eq!(report.units.len(), 1);
    assert_eq!(report.units[0].rows_converted, 2);
    assert_eq!(target.timeseries().len(), 1);

    let times: Vec<_> = target.data().into_iter().map(|(_, t, _)| t).collect();
    assert_eq!(times, vec![utc(2004, 6, 1, 0), utc(2005, 12, 31, 18)]);
}

#[tokio::test]
async fn unit_outside_window_is_skipped_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    write_dump_file(dir.path(), "T_ADATA", stations::BLINDERN, "ta", &["1930-01-01_00:00:00;1.0;00000"]);
    let table = TableSpec::new("T_ADATA", Some("T_AFLAG"), None).import_until(2006);
    let cache = ReferenceCache::new(
        vec![sample_metadata("TA", "T_ADATA", 211)],
        HashMap::new(),
        vec![window("T_ADATA", stations::BLINDERN, "ta", Some(utc(1950, 1, 1, 0)), None)],
    );
    let target = Arc::new(MemoryTarget::new());
    let importer = importer(&target, cache, import_options(dir.path()));

    let report = importer.import_table(&table).await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.units[0].rows_converted, 0);
    assert_eq!(report.units[0].data_inserted, None);
    assert!(target.data().is_empty());
}

#[tokio::test]
async fn skip_flags_loads_data_only() {
    let dir = tempfile::tempdir().unwrap();
    write_dump_file(dir.path(), "T_ADATA", stations::BLINDERN, "ta", &["2000-01-01_00:00:00;1.0;00000"]);
    let table = TableSpec::new("T_ADATA", Some("T_AFLAG"), None).import_until(2006);
    let target = Arc::new(MemoryTarget::new());
    let importer = importer(
        &target,
        cache_for(vec![sample_metadata("TA", "T_ADATA", 211)]),
        ImportOptions {
            skip_flags: true,
            ..import_options(dir.path())
        },
    );

    let report = importer.import_table(&table).await.unwrap();
    assert_eq!(report.units[0].flags_inserted, None);
    assert_eq!(target.data().len(), 1);
    assert!(target.flags().is_empty());
}

#[tokio::test]
async fn failed_load_is_reported_per_unit() {
    let dir = tempfile::tempdir().unwrap();
    write_dump_file(dir.path(), "T_ADATA", stations::BLINDERN, "ta", &["2000-01-01_00:00:00;1.0;00000"]);
    let table = TableSpec::new("T_ADATA", Some("T_AFLAG"), None).import_until(2006);
    let target = Arc::new(MemoryTarget::new());
    target.fail_loads();
    let importer = importer(
        &target,
        cache_for(vec![sample_metadata("TA", "T_ADATA", 211)]),
        import_options(dir.path()),
    );

    let report = importer.import_table(&table).await.unwrap();
    assert!(report.units.is_empty());
    assert_eq!(report.failed.len(), 1);
}

#[tokio::test]
async fn ot_24_is_shifted_and_scaled() {
    let dir = tempfile::tempdir().unwrap();
    write_dump_file(dir.path(), "T_VDATA", stations::BLINDERN, "ot_24", &["2000-01-01_06:00:00;2.0;00000"]);
    let table = TableSpec::new("T_VDATA", Some("T_VFLAG"), None)
        .family(ConversionFamily::VData)
        .import_until(2006);
    let target = Arc::new(MemoryTarget::new());
    let importer = importer(
        &target,
        cache_for(vec![sample_metadata("OT_24", "T_VDATA", 122)]),
        import_options(dir.path()),
    );

    importer.import_table(&table).await.unwrap();
    let data = target.data();
    assert_eq!(data[0].1, utc(2000, 1, 2, 0));
    let minutes = data[0].2.as_scalar().unwrap();
    assert!((minutes - 120.0).abs() < 1e-9, "got {minutes}");
}

#[tokio::test]
async fn product_offsets_shift_observation_time() {
    let dir = tempfile::tempdir().unwrap();
    write_dump_file(dir.path(), "T_DIURNAL", stations::BLINDERN, "tam", &["2000-01-31_06:00:00;-3.0;00000"]);
    let table = TableSpec::new("T_DIURNAL", Some("T_DIURNAL_FLAG"), None)
        .family(ConversionFamily::Product)
        .import_until(2006);
    let mut offsets = HashMap::new();
    offsets.insert(
        ParamKey::new("TAM", "T_DIURNAL"),
        Period {
            days: 1,
            hours: -6,
            ..Period::ZERO
        },
    );
    let cache = ReferenceCache::new(vec![sample_metadata("TAM", "T_DIURNAL", 212)], offsets, vec![]);
    let target = Arc::new(MemoryTarget::new());
    let importer = importer(&target, cache, import_options(dir.path()));

    importer.import_table(&table).await.unwrap();
    assert_eq!(target.data()[0].1, utc(2000, 2, 1, 0));
}

#[tokio::test]
async fn dump_only_tables_are_not_imported() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = TableCatalog::standard();
    let table = catalog.get("T_MINUTE_DATA").unwrap();
    let target = Arc::new(MemoryTarget::new());
    let importer = importer(&target, ReferenceCache::default(), import_options(dir.path()));

    let report = importer.import_table(table).await.unwrap();
    assert!(report.skipped);
}

#[tokio::test]
async fn dump_then_import_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let source = MemorySource::new()
        .with_columns("T_ADATA", &["ta"])
        .with_columns("T_AFLAG", &["ta"])
        .with_value("T_ADATA", stations::BLINDERN, "ta", utc(2004, 1, 1, 0), "-1.5")
        .with_value("T_ADATA", stations::BLINDERN, "ta", utc(2004, 1, 1, 6), "-2.5")
        .with_value("T_AFLAG", stations::BLINDERN, "ta", utc(2004, 1, 1, 6), "00000")
        .with_value("T_ADATA", stations::BLINDERN, "ta", utc(2005, 7, 1, 12), "18.0")
        .with_value("T_ADATA", stations::BLINDERN, "ta", utc(2006, 1, 1, 0), "0.0")
        .with_value("T_ADATA", stations::VARDO, "ta", utc(2004, 1, 1, 0), "-8.0");
    let table = TableSpec::new("T_ADATA", Some("T_AFLAG"), None).import_until(2006);

    let dumper = Dumper::new(
        Arc::new(source),
        DumpOptions {
            base_dir: dir.path().to_path_buf(),
            format: DumpFormat::default(),
            selection: Selection::default(),
            overwrite: false,
        },
    );
    let dumped = dumper.dump_table(&table).await.unwrap();
    assert_eq!(dumped.rows(), 5);

    let target = Arc::new(MemoryTarget::new());
    let importer = importer(
        &target,
        cache_for(vec![sample_metadata("TA", "T_ADATA", 211)]),
        import_options(dir.path()),
    );
    let imported = importer.import_table(&table).await.unwrap();

    // The 2006 row is past the cutoff.
    assert_eq!(imported.rows_converted(), 4);
    assert_eq!(target.data().len(), 4);
    assert_eq!(target.timeseries().len(), 2);

    let values: Vec<f64> = target
        .data()
        .into_iter()
        .filter_map(|(_, _, v)| v.as_scalar())
        .collect();
    assert!(values.contains(&-1.5));
    assert!(values.contains(&18.0));
    assert!(values.contains(&-8.0));
}
