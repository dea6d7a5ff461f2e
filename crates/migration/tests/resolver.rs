use std::collections::HashMap;
use std::sync::Arc;

use kdvh_common::{MigrationError, Period};
use migration::{IdentityResolver, ReferenceCache};
use test_utils::{bare_metadata, sample_metadata, stations, utc, window, MemoryTarget};

fn resolver(target: Arc<MemoryTarget>, cache: ReferenceCache) -> IdentityResolver {
    IdentityResolver::new(target, Arc::new(cache))
}

#[tokio::test]
async fn resolve_is_idempotent() {
    let target = Arc::new(MemoryTarget::new());
    let cache = ReferenceCache::new(vec![sample_metadata("TA", "T_ADATA", 211)], HashMap::new(), vec![]);
    let resolver = resolver(target.clone(), cache);

    let first = resolver.resolve("TA", "T_ADATA", stations::BLINDERN).await.unwrap();
    let second = resolver.resolve("TA", "T_ADATA", stations::BLINDERN).await.unwrap();

    assert_eq!(first.timeseries, second.timeseries);
    assert_eq!(target.create_count(), 1);

    let stored = target.timeseries();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].label.station_id, stations::BLINDERN);
    assert_eq!(stored[0].label.param_id, 211);
    assert_eq!(stored[0].valid_from, Some(utc(1950, 1, 1, 0)));
}

#[tokio::test]
async fn stations_get_separate_timeseries() {
    let target = Arc::new(MemoryTarget::new());
    let cache = ReferenceCache::new(vec![sample_metadata("TA", "T_ADATA", 211)], HashMap::new(), vec![]);
    let resolver = resolver(target.clone(), cache);

    let blindern = resolver.resolve("TA", "T_ADATA", stations::BLINDERN).await.unwrap();
    let vardo = resolver.resolve("TA", "T_ADATA", stations::VARDO).await.unwrap();

    assert_ne!(blindern.timeseries, vardo.timeseries);
    assert_eq!(target.create_count(), 2);
}

#[tokio::test]
async fn null_level_does_not_match_a_level() {
    let target = Arc::new(MemoryTarget::new());
    let cache = ReferenceCache::new(
        vec![
            sample_metadata("TA", "T_ADATA", 211),
            bare_metadata("TA", "T_MDATA", 211),
        ],
        HashMap::new(),
        vec![],
    );
    let resolver = resolver(target.clone(), cache);

    let with_level = resolver.resolve("TA", "T_ADATA", stations::BLINDERN).await.unwrap();
    let without_level = resolver.resolve("TA", "T_MDATA", stations::BLINDERN).await.unwrap();

    assert_ne!(with_level.timeseries, without_level.timeseries);
}

#[tokio::test]
async fn lost_race_returns_the_existing_identity() {
    let target = Arc::new(MemoryTarget::new());
    let cache = ReferenceCache::new(vec![sample_metadata("TA", "T_ADATA", 211)], HashMap::new(), vec![]);
    let resolver = resolver(target.clone(), cache);

    target.lose_next_create();
    let resolved = resolver.resolve("TA", "T_ADATA", stations::BLINDERN).await.unwrap();

    let stored = target.timeseries();
    assert_eq!(stored.len(), 1);
    assert_eq!(resolved.timeseries, stored[0].id);
    assert_eq!(target.create_count(), 0);
}

#[tokio::test]
async fn missing_metadata_fails_the_unit() {
    let target = Arc::new(MemoryTarget::new());
    let resolver = resolver(target.clone(), ReferenceCache::default());

    let err = resolver.resolve("TA", "T_ADATA", stations::BLINDERN).await.unwrap_err();
    assert!(matches!(err, MigrationError::MissingMetadata { .. }));
    assert!(target.timeseries().is_empty());
}

#[tokio::test]
async fn offset_and_window_come_with_the_identity() {
    let target = Arc::new(MemoryTarget::new());
    let mut offsets = HashMap::new();
    offsets.insert(kdvh_common::ParamKey::new("TAM", "T_DIURNAL"), Period::hours(-6));
    let cache = ReferenceCache::new(
        vec![sample_metadata("TAM", "T_DIURNAL", 212)],
        offsets,
        vec![window("T_DIURNAL", stations::BLINDERN, "tam", Some(utc(1937, 1, 1, 0)), None)],
    );
    let resolver = resolver(target, cache);

    let resolved = resolver.resolve("TAM", "T_DIURNAL", stations::BLINDERN).await.unwrap();
    assert_eq!(resolved.offset, Period::hours(-6));
    assert_eq!(
        resolved.window.and_then(|w| w.from_time),
        Some(utc(1937, 1, 1, 0))
    );
}
