//! Warehouse write capability with full-replace semantics

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::schema::{create_table_sql, drop_table_sql, infer_schema, quote_ident, ColumnType};
use crate::table::Table;

/// Postgres accepts at most 65535 bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_000;

/// Destination for landed tables
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Drop and recreate `name` with `table`'s columns and rows; returns rows written
    async fn replace_table(&self, name: &str, table: &Table) -> PipelineResult<u64>;
}

/// Postgres warehouse
///
/// Each replacement runs in its own transaction: a failure leaves the previous
/// version of that one table intact, while tables replaced earlier in the same
/// run stay committed.
pub struct PgWarehouse {
    pool: PgPool,
    conn_id: String,
}

impl PgWarehouse {
    pub fn new(pool: PgPool, conn_id: impl Into<String>) -> Self {
        Self {
            pool,
            conn_id: conn_id.into(),
        }
    }
}

fn cast_suffix(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::BigInt => "::bigint",
        ColumnType::DoublePrecision => "::double precision",
        ColumnType::Boolean => "::boolean",
        ColumnType::Text => "",
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn replace_table(&self, name: &str, table: &Table) -> PipelineResult<u64> {
        let map_err = |e: sqlx::Error| PipelineError::from_warehouse_write(&self.conn_id, name, e);
        let schema = infer_schema(table);

        let mut tx = self.pool.begin().await.map_err(map_err)?;

        sqlx::query(&drop_table_sql(name))
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        sqlx::query(&create_table_sql(name, &schema))
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;

        let mut written = 0u64;
        if !schema.is_empty() {
            let column_list = schema
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", ");
            let rows_per_batch = (MAX_BIND_PARAMS / schema.len()).max(1);

            for batch in table.rows().chunks(rows_per_batch) {
                let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                    "INSERT INTO {} ({}) ",
                    quote_ident(name),
                    column_list
                ));

                builder.push_values(batch, |mut b, row| {
                    for (cell, column) in row.iter().zip(&schema) {
                        b.push_bind(cell.as_deref())
                            .push_unseparated(cast_suffix(column.ty));
                    }
                });

                let result = builder.build().execute(&mut *tx).await.map_err(map_err)?;
                written += result.rows_affected();
            }
        }

        tx.commit().await.map_err(map_err)?;

        debug!(table = name, rows = written, "Warehouse table replaced");
        Ok(written)
    }
}
