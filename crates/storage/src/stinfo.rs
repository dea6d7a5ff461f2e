//! Stinfosys parameter catalog client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::{info, instrument};

use kdvh_common::{MigrationError, MigrationResult, ReferenceMetadata};

use crate::traits::ParameterSource;

/// Connect timeout for the catalog, which is only queried while caching.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(FromRow)]
struct MetadataRow {
    elem_code: String,
    table_name: String,
    typeid: i32,
    paramid: i32,
    hlevel: Option<i32>,
    sensor: Option<i32>,
    fromtime: Option<NaiveDateTime>,
}

impl From<MetadataRow> for ReferenceMetadata {
    fn from(row: MetadataRow) -> Self {
        ReferenceMetadata {
            element_code: row.elem_code.to_uppercase(),
            table_name: row.table_name,
            type_id: row.typeid,
            param_id: row.paramid,
            level: row.hlevel,
            sensor: row.sensor,
            valid_from: row.fromtime.map(|t| t.and_utc()),
        }
    }
}

/// Read-only handle on the parameter catalog.
pub struct ParameterCatalog {
    pool: PgPool,
}

impl ParameterCatalog {
    pub async fn connect(database_url: &str) -> MigrationResult<Self> {
        info!("Connecting to Stinfosys to cache metadata");

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect(database_url)
            .await
            .map_err(|e| {
                MigrationError::Database(format!(
                    "Could not connect to Stinfosys (is the VPN up?): {}",
                    e
                ))
            })?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl ParameterSource for ParameterCatalog {
    #[instrument(skip(self, elements))]
    async fn parameter_metadata(
        &self,
        table: &str,
        elements: Option<&[String]>,
    ) -> MigrationResult<Vec<ReferenceMetadata>> {
        let rows: Vec<MetadataRow> = sqlx::query_as(
            "SELECT elem_code::text, table_name::text, typeid::int4, paramid::int4, \
                    hlevel::int4, sensor::int4, fromtime::timestamp \
             FROM elem_map_cfnames_param \
             WHERE table_name = $1 \
             AND ($2::text[] IS NULL OR upper(elem_code) = ANY($2))",
        )
        .bind(table)
        .bind(elements.map(|e| e.iter().map(|c| c.to_uppercase()).collect::<Vec<_>>()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MigrationError::Database(format!("Query failed: {}", e)))?;

        Ok(rows.into_iter().map(ReferenceMetadata::from).collect())
    }
}
