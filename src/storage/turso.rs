use super::traits::TableStore;
use super::{check_batch, column_type_from_decl, insert_sql, quote_ident, recreate_table_sql};
use crate::error::{PipelineError, Result};
use crate::types::{Column, RecordBatch, SqlValue};
use async_trait::async_trait;
use libsql::params::Params;
use libsql::{Builder, Connection, Database, Value};
use tokio::sync::OnceCell;
use tracing::info;

/// Remote Turso/libSQL destination. The database handle is built on first use and then
/// shared by every load of the run.
pub struct LibsqlTableStore {
    url: String,
    auth_token: String,
    db: OnceCell<Database>,
}

impl LibsqlTableStore {
    pub fn new(url: &str, auth_token: &str) -> Self {
        Self {
            url: url.to_string(),
            auth_token: auth_token.to_string(),
            db: OnceCell::new(),
        }
    }

    async fn connection(&self, table: &str) -> Result<Connection> {
        let db = self
            .db
            .get_or_try_init(|| async {
                info!("Connecting to libSQL database at {}", self.url);
                Builder::new_remote(self.url.clone(), self.auth_token.clone())
                    .build()
                    .await
            })
            .await
            .map_err(|e| PipelineError::load(table, format!("Failed to connect to database: {e}")))?;
        db.connect().map_err(|e| {
            PipelineError::load(table, format!("Failed to get database connection: {e}"))
        })
    }
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Text(s) => Value::Text(s.clone()),
    }
}

fn from_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(v),
        Value::Real(v) => SqlValue::Text(v.to_string()),
        Value::Text(s) => SqlValue::Text(s),
        Value::Blob(bytes) => SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

#[async_trait]
impl TableStore for LibsqlTableStore {
    fn backend(&self) -> &'static str {
        "libsql"
    }

    async fn replace_table(&self, table: &str, batch: &RecordBatch) -> Result<u64> {
        check_batch(table, batch)?;
        let conn = self.connection(table).await?;

        let tx = conn
            .transaction()
            .await
            .map_err(|e| PipelineError::load(table, format!("Failed to begin transaction: {e}")))?;
        tx.execute_batch(&recreate_table_sql(table, batch))
            .await
            .map_err(|e| PipelineError::load(table, format!("Failed to recreate table: {e}")))?;

        let insert = insert_sql(table, batch);
        let mut written = 0u64;
        for row in &batch.rows {
            let values: Vec<Value> = row.iter().map(to_value).collect();
            written += tx
                .execute(&insert, Params::Positional(values))
                .await
                .map_err(|e| PipelineError::load(table, format!("Failed to insert row: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| PipelineError::load(table, format!("Failed to commit: {e}")))?;

        info!(table, rows = written, "replaced libsql table");
        Ok(written)
    }

    async fn read_table(&self, table: &str) -> Result<RecordBatch> {
        let conn = self.connection(table).await?;
        let read_err = |e: libsql::Error| PipelineError::load(table, format!("Failed to read table: {e}"));

        let mut info_rows = conn
            .query(
                &format!("PRAGMA table_info({})", quote_ident(table)),
                Params::None,
            )
            .await
            .map_err(read_err)?;
        let mut columns = Vec::new();
        while let Some(row) = info_rows.next().await.map_err(read_err)? {
            let name: String = row.get(1).map_err(read_err)?;
            let decl: String = row.get(2).map_err(read_err)?;
            columns.push(Column {
                name,
                column_type: column_type_from_decl(&decl),
            });
        }
        if columns.is_empty() {
            return Err(PipelineError::load(table, "no such table"));
        }

        let select = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            columns
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", "),
            quote_ident(table)
        );
        let mut data_rows = conn.query(&select, Params::None).await.map_err(read_err)?;
        let mut rows = Vec::new();
        while let Some(row) = data_rows.next().await.map_err(read_err)? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(from_value(row.get_value(i as i32).map_err(read_err)?));
            }
            rows.push(values);
        }

        Ok(RecordBatch { columns, rows })
    }
}
