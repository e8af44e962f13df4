use super::traits::TableStore;
use super::{check_batch, column_type_from_decl};
use crate::error::{PipelineError, Result};
use crate::types::{Column, ColumnType, RecordBatch, SqlValue};
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// MySQL destination. MySQL commits DDL implicitly, so a replace fills a staging table
/// inside one transaction and then swaps it in with a single `RENAME TABLE`.
pub struct MySqlTableStore {
    url: String,
    pool: OnceCell<MySqlPool>,
}

impl MySqlTableStore {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            pool: OnceCell::new(),
        }
    }

    async fn pool(&self, table: &str) -> Result<&MySqlPool> {
        self.pool
            .get_or_try_init(|| async {
                info!("Connecting to MySQL database");
                MySqlPoolOptions::new()
                    .max_connections(2)
                    .connect(&self.url)
                    .await
            })
            .await
            .map_err(|e| PipelineError::load(table, format!("Failed to connect to database: {e}")))
    }

    async fn table_exists(&self, pool: &MySqlPool, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await
        .map_err(|e| PipelineError::load(table, format!("Failed to look up table: {e}")))?;
        Ok(count > 0)
    }
}

/// Backtick-quoted MySQL identifier.
fn quote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "BIGINT",
        ColumnType::Text => "TEXT",
    }
}

fn create_sql(table: &str, batch: &RecordBatch) -> String {
    let columns = batch
        .columns
        .iter()
        .map(|c| format!("{} {}", quote(&c.name), sql_type(c.column_type)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote(table), columns)
}

fn insert_sql(table: &str, batch: &RecordBatch) -> String {
    let names = batch
        .columns
        .iter()
        .map(|c| quote(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; batch.columns.len()].join(", ");
    format!("INSERT INTO {} ({}) VALUES ({})", quote(table), names, placeholders)
}

fn staging_name(table: &str) -> String {
    format!("{table}__staging")
}

fn retired_name(table: &str) -> String {
    format!("{table}__retired")
}

#[async_trait]
impl TableStore for MySqlTableStore {
    fn backend(&self) -> &'static str {
        "mysql"
    }

    async fn replace_table(&self, table: &str, batch: &RecordBatch) -> Result<u64> {
        check_batch(table, batch)?;
        let pool = self.pool(table).await?;
        let load_err = |step: &str, e: sqlx::Error| PipelineError::load(table, format!("{step}: {e}"));
        let staging = staging_name(table);
        let retired = retired_name(table);

        for statement in [
            format!("DROP TABLE IF EXISTS {}", quote(&staging)),
            create_sql(&staging, batch),
            format!("DROP TABLE IF EXISTS {}", quote(&retired)),
        ] {
            sqlx::query(&statement)
                .execute(pool)
                .await
                .map_err(|e| load_err("Failed to prepare staging table", e))?;
        }

        let insert = insert_sql(&staging, batch);
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| load_err("Failed to begin transaction", e))?;
        let mut written = 0u64;
        for row in &batch.rows {
            let mut query = sqlx::query(&insert);
            for value in row {
                query = match value {
                    SqlValue::Null => query.bind(None::<String>),
                    SqlValue::Integer(v) => query.bind(*v),
                    SqlValue::Text(s) => query.bind(s.as_str()),
                };
            }
            written += query
                .execute(&mut *tx)
                .await
                .map_err(|e| load_err("Failed to insert row", e))?
                .rows_affected();
        }
        tx.commit()
            .await
            .map_err(|e| load_err("Failed to commit", e))?;

        let swap = if self.table_exists(pool, table).await? {
            vec![
                format!(
                    "RENAME TABLE {} TO {}, {} TO {}",
                    quote(table),
                    quote(&retired),
                    quote(&staging),
                    quote(table)
                ),
                format!("DROP TABLE {}", quote(&retired)),
            ]
        } else {
            vec![format!("RENAME TABLE {} TO {}", quote(&staging), quote(table))]
        };
        for statement in swap {
            sqlx::query(&statement)
                .execute(pool)
                .await
                .map_err(|e| load_err("Failed to swap in new table", e))?;
        }

        info!(table, rows = written, "replaced mysql table");
        Ok(written)
    }

    async fn read_table(&self, table: &str) -> Result<RecordBatch> {
        let pool = self.pool(table).await?;
        let read_err = |e: sqlx::Error| PipelineError::load(table, format!("Failed to read table: {e}"));

        let columns = sqlx::query(
            "SELECT CAST(column_name AS CHAR), CAST(data_type AS CHAR) \
             FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? \
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(read_err)?
        .iter()
        .map(|row| {
            let name: String = row.try_get(0)?;
            let decl: String = row.try_get(1)?;
            Ok(Column {
                name,
                column_type: column_type_from_decl(&decl),
            })
        })
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
        .map_err(read_err)?;
        if columns.is_empty() {
            return Err(PipelineError::load(table, "no such table"));
        }

        // no ordering column exists; InnoDB returns rows of a key-less table in insert order
        let select = format!(
            "SELECT {} FROM {}",
            columns
                .iter()
                .map(|c| quote(&c.name))
                .collect::<Vec<_>>()
                .join(", "),
            quote(table)
        );
        let mut rows = Vec::new();
        for row in sqlx::query(&select).fetch_all(pool).await.map_err(read_err)? {
            let mut values = Vec::with_capacity(columns.len());
            for (i, column) in columns.iter().enumerate() {
                let value = match column.column_type {
                    ColumnType::Integer => row
                        .try_get::<Option<i64>, _>(i)
                        .map_err(read_err)?
                        .map_or(SqlValue::Null, SqlValue::Integer),
                    ColumnType::Text => row
                        .try_get::<Option<String>, _>(i)
                        .map_err(read_err)?
                        .map_or(SqlValue::Null, SqlValue::Text),
                };
                values.push(value);
            }
            rows.push(values);
        }
        debug!(table, rows = rows.len(), "read mysql table");

        Ok(RecordBatch { columns, rows })
    }
}
