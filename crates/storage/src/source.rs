//! Legacy KDVH archive, reached through its Postgres proxy.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::{debug, instrument};

use kdvh_common::{MigrationError, MigrationResult, ValidityWindow};

use crate::ident::validate_ident;
use crate::traits::LegacySource;

/// Structural columns that never hold an element.
pub const EXCLUDED_COLUMNS: [&str; 5] = ["dato", "stnr", "typeid", "season", "xxx"];

/// Extra predicate applied to every row of a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowFilter {
    #[default]
    None,
    /// Monthly rows only (`season BETWEEN 1 AND 12`).
    MonthlySeasons,
}

impl RowFilter {
    fn sql(&self) -> &'static str {
        match self {
            RowFilter::None => "",
            RowFilter::MonthlySeasons => " AND season BETWEEN 1 AND 12",
        }
    }
}

/// Everything needed to query the rows of one extraction unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitQuery {
    pub table: String,
    /// Companion flag table, if the element is present there.
    pub flag_table: Option<String>,
    pub element: String,
    pub station: i64,
    /// Restrict to one calendar year (split-by-year tables).
    pub year: Option<i32>,
    pub filter: RowFilter,
}

impl UnitQuery {
    /// Build the SQL for this unit. Identifiers are validated first.
    pub fn to_sql(&self) -> MigrationResult<String> {
        let table = validate_ident(&self.table)?;
        let element = validate_ident(&self.element)?;
        let year = if self.year.is_some() {
            " AND TO_CHAR(dato, 'yyyy') = $2"
        } else {
            ""
        };
        let filter = self.filter.sql();

        let sql = match &self.flag_table {
            Some(flag_table) => {
                let flag_table = validate_ident(flag_table)?;
                format!(
                    "SELECT COALESCE(d.dato, f.dato)::timestamp AS time, d.{e} AS data, f.{e} AS flag \
                     FROM (SELECT dato, {e}::text AS {e} FROM {t} \
                           WHERE {e} IS NOT NULL AND stnr = $1{y}{r}) d \
                     FULL OUTER JOIN (SELECT dato, {e}::text AS {e} FROM {ft} \
                           WHERE {e} IS NOT NULL AND stnr = $1{y}{r}) f \
                     ON d.dato = f.dato \
                     ORDER BY time",
                    e = element,
                    t = table,
                    ft = flag_table,
                    y = year,
                    r = filter,
                )
            }
            None => format!(
                "SELECT dato::timestamp AS time, {e}::text AS data, '' AS flag FROM {t} \
                 WHERE {e} IS NOT NULL AND stnr = $1{y}{r} \
                 ORDER BY time",
                e = element,
                t = table,
                y = year,
                r = filter,
            ),
        };

        Ok(sql)
    }
}

/// One joined (time, data, flag) row of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpRow {
    pub time: DateTime<Utc>,
    pub value: Option<String>,
    pub flag: Option<String>,
}

#[derive(FromRow)]
struct JoinedRow {
    time: NaiveDateTime,
    data: Option<String>,
    flag: Option<String>,
}

impl From<JoinedRow> for DumpRow {
    fn from(row: JoinedRow) -> Self {
        DumpRow {
            time: row.time.and_utc(),
            value: row.data,
            flag: row.flag,
        }
    }
}

#[derive(FromRow)]
struct WindowRow {
    table_name: String,
    stnr: i64,
    elem_code: String,
    fdato: Option<NaiveDateTime>,
    tdato: Option<NaiveDateTime>,
}

impl From<WindowRow> for ValidityWindow {
    fn from(row: WindowRow) -> Self {
        ValidityWindow {
            table_name: row.table_name,
            station_id: row.stnr,
            element_code: row.elem_code.to_uppercase(),
            from_time: row.fdato.map(|t| t.and_utc()),
            to_time: row.tdato.map(|t| t.and_utc()),
        }
    }
}

/// Connection pool to the KDVH proxy.
pub struct SourceArchive {
    pool: PgPool,
}

impl SourceArchive {
    /// Connect to the KDVH proxy.
    pub async fn connect(database_url: &str, max_connections: u32) -> MigrationResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| MigrationError::Database(format!("KDVH proxy connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_failed(e: sqlx::Error) -> MigrationError {
    MigrationError::Database(format!("Query failed: {}", e))
}

#[async_trait]
impl LegacySource for SourceArchive {
    #[instrument(skip(self))]
    async fn table_columns(&self, table: &str) -> MigrationResult<Vec<String>> {
        let excluded: Vec<String> = EXCLUDED_COLUMNS.iter().map(|c| c.to_string()).collect();

        // information_schema stores unquoted identifiers in lowercase
        let columns: Vec<(String,)> = sqlx::query_as(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_name = $1 \
             AND NOT column_name = ANY($2::text[]) \
             AND column_name NOT LIKE '%kopi%' \
             ORDER BY ordinal_position",
        )
        .bind(table.to_lowercase())
        .bind(&excluded)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(columns.into_iter().map(|(c,)| c).collect())
    }

    #[instrument(skip(self))]
    async fn stations_with_element(&self, table: &str, element: &str) -> MigrationResult<Vec<i64>> {
        let sql = format!(
            "SELECT DISTINCT stnr::bigint FROM {} WHERE {} IS NOT NULL ORDER BY 1",
            validate_ident(table)?,
            validate_ident(element)?,
        );

        let stations: Vec<(i64,)> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        debug!(table = %table, element = %element, count = stations.len(), "Fetched stations");
        Ok(stations.into_iter().map(|(s,)| s).collect())
    }

    async fn year_range(&self, table: &str, station: i64) -> MigrationResult<Option<(i32, i32)>> {
        let sql = format!(
            "SELECT min(to_char(dato, 'yyyy')), max(to_char(dato, 'yyyy')) FROM {} WHERE stnr = $1",
            validate_ident(table)?,
        );

        let (begin, end): (Option<String>, Option<String>) = sqlx::query_as(&sql)
            .bind(station)
            .fetch_one(&self.pool)
            .await
            .map_err(query_failed)?;

        let parse = |s: String| {
            s.trim()
                .parse::<i32>()
                .map_err(|_| MigrationError::Database(format!("Could not parse year '{}'", s)))
        };

        match (begin, end) {
            (Some(b), Some(e)) => Ok(Some((parse(b)?, parse(e)?))),
            _ => Ok(None),
        }
    }

    #[instrument(skip(self, query), fields(table = %query.table, station = query.station, element = %query.element))]
    async fn fetch_rows(&self, query: &UnitQuery) -> MigrationResult<Vec<DumpRow>> {
        let sql = query.to_sql()?;

        let mut q = sqlx::query_as::<_, JoinedRow>(&sql).bind(query.station);
        if let Some(year) = query.year {
            q = q.bind(year.to_string());
        }

        let rows = q.fetch_all(&self.pool).await.map_err(query_failed)?;
        Ok(rows.into_iter().map(DumpRow::from).collect())
    }

    #[instrument(skip(self, stations, elements))]
    async fn validity_windows(
        &self,
        elem_table: &str,
        stations: Option<&[i64]>,
        elements: Option<&[String]>,
    ) -> MigrationResult<Vec<ValidityWindow>> {
        let sql = format!(
            "SELECT table_name::text, stnr::bigint, elem_code::text, \
                    fdato::timestamp, tdato::timestamp \
             FROM {} \
             WHERE ($1::bigint[] IS NULL OR stnr = ANY($1)) \
             AND ($2::text[] IS NULL OR upper(elem_code) = ANY($2))",
            validate_ident(elem_table)?,
        );

        let rows: Vec<WindowRow> = sqlx::query_as(&sql)
            .bind(stations.map(|s| s.to_vec()))
            .bind(elements.map(|e| e.iter().map(|c| c.to_uppercase()).collect::<Vec<_>>()))
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        Ok(rows.into_iter().map(ValidityWindow::from).collect())
    }
}
