//! Operational database read capability

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::schema::quote_ident;
use crate::table::Table;

/// Anything that can hand back the full contents of a named table
#[async_trait]
pub trait SourceDatabase: Send + Sync {
    /// Unfiltered, unordered `SELECT *`, fully materialized
    async fn fetch_table(&self, table: &str) -> PipelineResult<Table>;
}

/// Postgres-backed source
///
/// Every column is rendered as text server-side so the landing file carries
/// Postgres' own text representation. Booleans are spelled `true`/`false`.
pub struct PgSource {
    pool: PgPool,
    conn_id: String,
    schema: String,
}

impl PgSource {
    pub fn new(pool: PgPool, conn_id: impl Into<String>) -> Self {
        Self {
            pool,
            conn_id: conn_id.into(),
            schema: "public".to_string(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    async fn column_types(&self, table: &str) -> PipelineResult<Vec<(String, String)>> {
        sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT column_name::text, data_type::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::from_source_query(&self.conn_id, table, e))
    }
}

fn text_projection(column: &str, data_type: &str) -> String {
    let ident = quote_ident(column);
    if data_type == "boolean" {
        format!(
            "CASE WHEN {ident} THEN 'true' WHEN NOT {ident} THEN 'false' END AS {ident}",
            ident = ident
        )
    } else {
        format!("{ident}::text AS {ident}", ident = ident)
    }
}

#[async_trait]
impl SourceDatabase for PgSource {
    async fn fetch_table(&self, table: &str) -> PipelineResult<Table> {
        let columns = self.column_types(table).await?;
        if columns.is_empty() {
            return Err(PipelineError::TableNotFound {
                table: table.to_string(),
            });
        }

        let projection = columns
            .iter()
            .map(|(name, data_type)| text_projection(name, data_type))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {}.{}",
            projection,
            quote_ident(&self.schema),
            quote_ident(table)
        );
        debug!(table, sql = %sql, "Reading source table");

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PipelineError::from_source_query(&self.conn_id, table, e))?;

        let mut result = Table::new(columns.into_iter().map(|(name, _)| name).collect());
        for row in rows {
            let cells = (0..row.len())
                .map(|i| row.try_get::<Option<String>, _>(i))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| PipelineError::from_source_query(&self.conn_id, table, e))?;
            result.push_row(cells);
        }

        Ok(result)
    }
}
