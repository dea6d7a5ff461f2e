//! LARD target archive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, instrument};

use kdvh_common::{
    MigrationError, MigrationResult, ObsValue, TargetObservation, TimeseriesId, TimeseriesLabel,
};

use crate::traits::{ObservationSink, TimeseriesStore};

/// Connection pool shared by every concurrent import unit.
#[derive(Clone)]
pub struct TargetArchive {
    pool: PgPool,
}

impl TargetArchive {
    /// Create a new connection pool from the database URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> MigrationResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| MigrationError::Database(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the target tables if they do not exist yet.
    pub async fn migrate(&self) -> MigrationResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| MigrationError::Database(format!("Migration failed: {}", e)))?;
            }
        }

        Ok(())
    }
}

/// Map a driver error, keeping unique violations distinguishable.
fn classify(context: &str, e: sqlx::Error) -> MigrationError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            MigrationError::UniqueViolation(format!("{}: {}", context, db))
        }
        _ => MigrationError::Database(format!("{}: {}", context, e)),
    }
}

#[async_trait]
impl TimeseriesStore for TargetArchive {
    async fn find_timeseries(&self, label: &TimeseriesLabel) -> MigrationResult<Option<TimeseriesId>> {
        let id: Option<(i32,)> = sqlx::query_as(
            "SELECT timeseries FROM labels.met \
             WHERE station_id = $1 \
             AND param_id = $2 \
             AND type_id = $3 \
             AND (($4::int IS NULL AND lvl IS NULL) OR (lvl = $4)) \
             AND (($5::int IS NULL AND sensor IS NULL) OR (sensor = $5))",
        )
        .bind(label.station_id)
        .bind(label.param_id)
        .bind(label.type_id)
        .bind(label.level)
        .bind(label.sensor)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("Timeseries lookup failed", e))?;

        Ok(id.map(|(id,)| TimeseriesId(id)))
    }

    #[instrument(skip(self), fields(station = label.station_id, param = label.param_id))]
    async fn create_timeseries(
        &self,
        label: &TimeseriesLabel,
        valid_from: Option<DateTime<Utc>>,
    ) -> MigrationResult<TimeseriesId> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify("Could not begin transaction", e))?;

        let (id,): (i32,) =
            sqlx::query_as("INSERT INTO public.timeseries (fromtime) VALUES ($1) RETURNING id")
                .bind(valid_from)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| classify("Timeseries insert failed", e))?;

        // Dropping `tx` on error rolls the timeseries row back as well.
        sqlx::query(
            "INSERT INTO labels.met (timeseries, station_id, param_id, type_id, lvl, sensor) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(label.station_id)
        .bind(label.param_id)
        .bind(label.type_id)
        .bind(label.level)
        .bind(label.sensor)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify("Label insert failed", e))?;

        tx.commit()
            .await
            .map_err(|e| classify("Commit failed", e))?;

        debug!(timeseries = id, "Created timeseries");
        Ok(TimeseriesId(id))
    }
}

#[async_trait]
impl ObservationSink for TargetArchive {
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn load_data(&self, rows: &[TargetObservation]) -> MigrationResult<u64> {
        let mut scalar_ids = Vec::new();
        let mut scalar_times = Vec::new();
        let mut scalar_values = Vec::new();
        let mut text_ids = Vec::new();
        let mut text_times = Vec::new();
        let mut text_values = Vec::new();

        for row in rows {
            match &row.value {
                ObsValue::Scalar(v) => {
                    scalar_ids.push(row.timeseries.0);
                    scalar_times.push(row.obs_time);
                    scalar_values.push(*v);
                }
                ObsValue::NonScalar(s) => {
                    text_ids.push(row.timeseries.0);
                    text_times.push(row.obs_time);
                    text_values.push(s.clone());
                }
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify("Could not begin transaction", e))?;

        let mut inserted = 0;
        if !scalar_ids.is_empty() {
            inserted += sqlx::query(
                "INSERT INTO public.data (timeseries, obstime, obsvalue) \
                 SELECT * FROM UNNEST($1::int4[], $2::timestamptz[], $3::float8[]) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(&scalar_ids)
            .bind(&scalar_times)
            .bind(&scalar_values)
            .execute(&mut *tx)
            .await
            .map_err(|e| MigrationError::BulkLoad(format!("Data insert failed: {}", e)))?
            .rows_affected();
        }

        if !text_ids.is_empty() {
            inserted += sqlx::query(
                "INSERT INTO public.nonscalar_data (timeseries, obstime, obsvalue) \
                 SELECT * FROM UNNEST($1::int4[], $2::timestamptz[], $3::text[]) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(&text_ids)
            .bind(&text_times)
            .bind(&text_values)
            .execute(&mut *tx)
            .await
            .map_err(|e| MigrationError::BulkLoad(format!("Non-scalar insert failed: {}", e)))?
            .rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| MigrationError::BulkLoad(format!("Commit failed: {}", e)))?;

        Ok(inserted)
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn load_flags(&self, rows: &[TargetObservation]) -> MigrationResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i32> = rows.iter().map(|r| r.timeseries.0).collect();
        let times: Vec<DateTime<Utc>> = rows.iter().map(|r| r.obs_time).collect();
        let control: Vec<&str> = rows.iter().map(|r| r.control_flags.as_str()).collect();
        let useinfo: Vec<&str> = rows.iter().map(|r| r.use_flags.as_str()).collect();

        let result = sqlx::query(
            "INSERT INTO flags.kdvh (timeseries, obstime, controlinfo, useinfo) \
             SELECT * FROM UNNEST($1::int4[], $2::timestamptz[], $3::text[], $4::text[]) \
             ON CONFLICT DO NOTHING",
        )
        .bind(&ids)
        .bind(&times)
        .bind(&control)
        .bind(&useinfo)
        .execute(&self.pool)
        .await
        .map_err(|e| MigrationError::BulkLoad(format!("Flags insert failed: {}", e)))?;

        Ok(result.rows_affected())
    }
}

/// Target schema. Levels and sensors are optional, so uniqueness of a label
/// is enforced on their COALESCEd values.
const SCHEMA_SQL: &str = r#"
CREATE SCHEMA IF NOT EXISTS labels;
CREATE SCHEMA IF NOT EXISTS flags;

CREATE TABLE IF NOT EXISTS public.timeseries (
    id SERIAL PRIMARY KEY,
    fromtime TIMESTAMPTZ,
    totime TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS labels.met (
    timeseries INTEGER PRIMARY KEY REFERENCES public.timeseries(id),
    station_id BIGINT NOT NULL,
    param_id INTEGER NOT NULL,
    type_id INTEGER NOT NULL,
    lvl INTEGER,
    sensor INTEGER
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_met_label ON labels.met (
    station_id, param_id, type_id, COALESCE(lvl, -1), COALESCE(sensor, -1)
);

CREATE TABLE IF NOT EXISTS public.data (
    timeseries INTEGER NOT NULL REFERENCES public.timeseries(id),
    obstime TIMESTAMPTZ NOT NULL,
    obsvalue DOUBLE PRECISION,
    PRIMARY KEY (timeseries, obstime)
);

CREATE TABLE IF NOT EXISTS public.nonscalar_data (
    timeseries INTEGER NOT NULL REFERENCES public.timeseries(id),
    obstime TIMESTAMPTZ NOT NULL,
    obsvalue TEXT,
    PRIMARY KEY (timeseries, obstime)
);

CREATE TABLE IF NOT EXISTS flags.kdvh (
    timeseries INTEGER NOT NULL REFERENCES public.timeseries(id),
    obstime TIMESTAMPTZ NOT NULL,
    controlinfo TEXT,
    useinfo TEXT,
    PRIMARY KEY (timeseries, obstime)
);

CREATE INDEX IF NOT EXISTS idx_data_obstime ON public.data(obstime);
CREATE INDEX IF NOT EXISTS idx_flags_obstime ON flags.kdvh(obstime)
"#;
