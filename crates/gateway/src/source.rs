use parcelgate_policy::{BindValue, CompiledQuery, columns};
use serde::Serialize;
use sqlx::{PgPool, Row};

/// One row as read from the parcel table. Geometry stays as the raw GeoJSON text the
/// database produced; decoding happens in the query path.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelRow {
    pub id: String,
    pub address: Option<String>,
    pub county: Option<String>,
    pub sqft: Option<f64>,
    pub total_value: Option<f64>,
    pub geometry: Option<String>,
}

#[derive(Debug)]
pub enum SourceError {
    Sqlx(sqlx::Error),
    Backend(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Sqlx(err) => write!(f, "parcel source sql error: {}", err),
            SourceError::Backend(message) => write!(f, "parcel source error: {}", message),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<sqlx::Error> for SourceError {
    fn from(value: sqlx::Error) -> Self {
        SourceError::Sqlx(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRef {
    pub table_schema: String,
    pub table_name: String,
}

/// Read access to the parcel dataset.
///
/// Implementations must apply the compiled predicate, parameters and ordering as given
/// and return at most `limit` rows.
#[async_trait::async_trait]
pub trait ParcelSource: Send + Sync {
    async fn fetch_parcels(
        &self,
        query: &CompiledQuery,
        limit: usize,
    ) -> Result<Vec<ParcelRow>, SourceError>;

    /// Like [`ParcelSource::fetch_parcels`] but geometry is never read.
    async fn fetch_export_rows(
        &self,
        query: &CompiledQuery,
        limit: usize,
    ) -> Result<Vec<ParcelRow>, SourceError>;

    async fn list_tables(&self) -> Result<Vec<TableRef>, SourceError>;

    async fn ping(&self) -> Result<(), SourceError>;
}

pub struct PgParcelSource {
    pool: PgPool,
    table: String,
    statement_timeout_ms: u64,
}

impl PgParcelSource {
    /// `table` must already be validated as `ident` or `schema.ident`.
    pub fn new(pool: PgPool, table: impl Into<String>, statement_timeout_ms: u64) -> Self {
        Self {
            pool,
            table: table.into(),
            statement_timeout_ms,
        }
    }

    async fn fetch(
        &self,
        query: &CompiledQuery,
        limit: usize,
        with_geometry: bool,
    ) -> Result<Vec<ParcelRow>, SourceError> {
        let sql = select_sql(&self.table, query, limit, with_geometry);

        let mut tx = self.pool.begin().await?;

        if self.statement_timeout_ms > 0 {
            sqlx::query("SELECT set_config('statement_timeout', $1, true)")
                .bind(format!("{}ms", self.statement_timeout_ms))
                .execute(&mut *tx)
                .await?;
        }

        let mut statement = sqlx::query(&sql);
        for value in query.parameters() {
            statement = match value {
                BindValue::Float(v) => statement.bind(*v),
                BindValue::Text(v) => statement.bind(v.clone()),
            };
        }

        let rows = statement.fetch_all(&mut *tx).await?;
        tx.commit().await?;

        rows.into_iter()
            .map(|row| -> Result<ParcelRow, SourceError> {
                Ok(ParcelRow {
                    id: row.try_get("id")?,
                    address: row.try_get("address")?,
                    county: row.try_get("county")?,
                    sqft: row.try_get("sqft")?,
                    total_value: row.try_get("total_value")?,
                    geometry: if with_geometry {
                        row.try_get("geometry")?
                    } else {
                        None
                    },
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ParcelSource for PgParcelSource {
    async fn fetch_parcels(
        &self,
        query: &CompiledQuery,
        limit: usize,
    ) -> Result<Vec<ParcelRow>, SourceError> {
        self.fetch(query, limit, true).await
    }

    async fn fetch_export_rows(
        &self,
        query: &CompiledQuery,
        limit: usize,
    ) -> Result<Vec<ParcelRow>, SourceError> {
        self.fetch(query, limit, false).await
    }

    async fn list_tables(&self) -> Result<Vec<TableRef>, SourceError> {
        let rows = sqlx::query(
            "SELECT table_schema::text AS table_schema, table_name::text AS table_name \
             FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE' \
             ORDER BY table_schema, table_name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<TableRef, SourceError> {
                Ok(TableRef {
                    table_schema: row.try_get("table_schema")?,
                    table_name: row.try_get("table_name")?,
                })
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), SourceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub fn select_sql(table: &str, query: &CompiledQuery, limit: usize, with_geometry: bool) -> String {
    let mut select = format!(
        "{id} AS id, {address}::text AS address, {county}::text AS county, \
         {sqft}::float8 AS sqft, {total_value}::float8 AS total_value",
        id = columns::ID,
        address = columns::ADDRESS,
        county = columns::COUNTY,
        sqft = columns::SQFT,
        total_value = columns::TOTAL_VALUE,
    );
    if with_geometry {
        select.push_str(&format!(", ST_AsGeoJSON({}) AS geometry", columns::GEOMETRY));
    }

    format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {} LIMIT {}",
        select,
        table,
        query.where_sql(),
        query.ordering_expression(),
        limit
    )
}
