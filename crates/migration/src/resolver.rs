//! Timeseries identity resolution.

use std::sync::Arc;

use tracing::{debug, warn};

use kdvh_common::{
    MigrationError, MigrationResult, ParamKey, ResolvedUnit, TimeseriesId, TimeseriesLabel,
};
use storage::TimeseriesStore;

use crate::cache::ReferenceCache;

/// Maps (element, table, station) to a target timeseries, creating it on
/// first use.
pub struct IdentityResolver {
    store: Arc<dyn TimeseriesStore>,
    cache: Arc<ReferenceCache>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn TimeseriesStore>, cache: Arc<ReferenceCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &ReferenceCache {
        &self.cache
    }

    /// Resolve the identity of a unit together with its cached offset and
    /// validity window.
    pub async fn resolve(
        &self,
        element_code: &str,
        table_name: &str,
        station_id: i64,
    ) -> MigrationResult<ResolvedUnit> {
        let key = ParamKey::new(element_code, table_name);
        let meta = self
            .cache
            .metadata(&key)
            .ok_or_else(|| MigrationError::MissingMetadata {
                table: table_name.to_string(),
                element: element_code.to_string(),
            })?;

        let label = TimeseriesLabel::from_metadata(station_id, meta);
        let timeseries = self.find_or_create(&label, meta.valid_from).await?;

        Ok(ResolvedUnit {
            timeseries,
            offset: self.cache.offset(&key),
            window: self.cache.window(&key, station_id).cloned(),
        })
    }

    async fn find_or_create(
        &self,
        label: &TimeseriesLabel,
        valid_from: Option<chrono::DateTime<chrono::Utc>>,
    ) -> MigrationResult<TimeseriesId> {
        if let Some(id) = self.store.find_timeseries(label).await? {
            return Ok(id);
        }

        match self.store.create_timeseries(label, valid_from).await {
            Ok(id) => {
                debug!(timeseries = %id, station = label.station_id, param = label.param_id, "New timeseries");
                Ok(id)
            }
            // A concurrent unit created the same label between lookup and insert.
            Err(e) if e.is_unique_violation() => {
                warn!(
                    station = label.station_id,
                    param = label.param_id,
                    "Timeseries created concurrently, re-reading"
                );
                self.store.find_timeseries(label).await?.ok_or_else(|| {
                    MigrationError::Database(format!(
                        "Timeseries for station {} param {} vanished after unique violation",
                        label.station_id, label.param_id
                    ))
                })
            }
            Err(e) => Err(e),
        }
    }
}
